//! Black-box tests for the AI agent adapter (4.D). Mock mode is exercised
//! without any subprocess; live mode is exercised against small throwaway
//! shell scripts written to a tempdir, so no real AI CLI or API key is
//! required. The adapter always prepends its own fixed flags
//! (`--print --output-format text -p <prompt>`) ahead of whatever `cli_path`
//! points at, so the fixture scripts below ignore argv entirely rather than
//! relying on `sh -c` semantics, which those fixed flags would break.
//! Output forwarding is observed through an in-memory sink fake, so none of
//! these tests touch a live Redis instance.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use repobox_agent::{Agent, AgentConfig, ExecuteRequest};
use repobox_core::error::ExecutionError;
use repobox_core::sink::test_support::RecordingSink;
use repobox_core::sink::OutputPort;
use tokio_util::sync::CancellationToken;

fn mock_config() -> AgentConfig {
    AgentConfig {
        enabled: false,
        cli_path: String::new(),
        api_key: String::new(),
        timeout: Duration::from_secs(5),
        max_output_lines: 10_000,
    }
}

fn live_config(cli_path: &str, timeout: Duration, max_output_lines: u64) -> AgentConfig {
    AgentConfig {
        enabled: true,
        cli_path: cli_path.to_string(),
        api_key: "test-key".to_string(),
        timeout,
        max_output_lines,
    }
}

/// Writes an executable shell script whose body ignores whatever argv the
/// adapter spawns it with (`--print --output-format text -p <prompt>`), so
/// the script's behavior is controlled entirely by `body`.
fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path.to_str().expect("utf8 path").to_string()
}

#[tokio::test]
async fn mock_mode_writes_sentinel_file_and_does_not_spawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink: Arc<dyn OutputPort> = Arc::new(RecordingSink::new());
    let agent = Agent::new(mock_config(), sink);
    let cancel = CancellationToken::new();

    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "do the thing",
                environment: "default",
                job_id: "job-0",
                session_id: "sess-0",
            },
            &cancel,
        )
        .await;
    assert!(result.is_ok());

    let sentinel = dir.path().join("job-job-0.json");
    let body = std::fs::read_to_string(&sentinel).expect("sentinel file written");
    let parsed: serde_json::Value = serde_json::from_str(&body).expect("valid json");
    assert_eq!(parsed["job_id"], "job-0");
    assert_eq!(parsed["prompt"], "do the thing");
    assert_eq!(parsed["mode"], "mock");
}

#[tokio::test]
async fn live_mode_non_zero_exit_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "exit7.sh", "exit 7");
    let sink: Arc<dyn OutputPort> = Arc::new(RecordingSink::new());
    let agent = Agent::new(live_config(&script, Duration::from_secs(5), 10_000), sink);
    let cancel = CancellationToken::new();
    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "ignored",
                environment: "default",
                job_id: "job-1",
                session_id: "sess-1",
            },
            &cancel,
        )
        .await;
    match result {
        Err(ExecutionError::NonZeroExit(code)) => assert_eq!(code, 7),
        other => panic!("expected NonZeroExit, got {other:?}"),
    }
}

#[tokio::test]
async fn live_mode_forwards_stdout_lines_to_sink() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "print_lines.sh", "printf 'one\\ntwo\\n'");
    let recording = Arc::new(RecordingSink::new());
    let sink: Arc<dyn OutputPort> = recording.clone();
    let agent = Agent::new(live_config(&script, Duration::from_secs(5), 10_000), sink);
    let cancel = CancellationToken::new();

    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "ignored",
                environment: "default",
                job_id: "job-4",
                session_id: "sess-4",
            },
            &cancel,
        )
        .await;
    assert!(result.is_ok());

    let lines = recording.lines();
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert!(lines.iter().all(|l| l.source == "agent"));
    assert!(lines.iter().all(|l| l.session_id == "sess-4"));
}

#[tokio::test]
async fn live_mode_spawn_failure_for_missing_binary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink: Arc<dyn OutputPort> = Arc::new(RecordingSink::new());
    let agent = Agent::new(
        live_config(
            "/nonexistent/path/to/binary-that-does-not-exist",
            Duration::from_secs(5),
            10_000,
        ),
        sink,
    );
    let cancel = CancellationToken::new();
    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "irrelevant",
                environment: "default",
                job_id: "job-2",
                session_id: "sess-2",
            },
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(ExecutionError::SpawnFailure(_))));
}

#[tokio::test]
async fn live_mode_respects_cancellation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep30.sh", "sleep 30");
    let sink: Arc<dyn OutputPort> = Arc::new(RecordingSink::new());
    let agent = Agent::new(live_config(&script, Duration::from_secs(30), 10_000), sink);
    let cancel = CancellationToken::new();
    let child_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        child_cancel.cancel();
    });
    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "ignored",
                environment: "default",
                job_id: "job-3",
                session_id: "sess-3",
            },
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(ExecutionError::Cancelled)));
}

#[tokio::test]
async fn live_mode_times_out_past_deadline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep30.sh", "sleep 30");
    let sink: Arc<dyn OutputPort> = Arc::new(RecordingSink::new());
    let agent = Agent::new(live_config(&script, Duration::from_millis(100), 10_000), sink);
    let cancel = CancellationToken::new();
    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "ignored",
                environment: "default",
                job_id: "job-6",
                session_id: "sess-6",
            },
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(ExecutionError::Timeout)));
}

#[tokio::test]
async fn line_cap_truncates_and_emits_single_notice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "four_lines.sh", "printf 'a\\nb\\nc\\nd\\n'");
    let recording = Arc::new(RecordingSink::new());
    let sink: Arc<dyn OutputPort> = recording.clone();
    let agent = Agent::new(live_config(&script, Duration::from_secs(5), 2), sink);
    let cancel = CancellationToken::new();

    let result = agent
        .execute(
            ExecuteRequest {
                workdir: dir.path().to_str().unwrap(),
                prompt: "ignored",
                environment: "default",
                job_id: "job-5",
                session_id: "sess-5",
            },
            &cancel,
        )
        .await;
    assert!(result.is_ok());

    let lines = recording.lines();
    let agent_lines: Vec<&str> = lines
        .iter()
        .filter(|l| l.source == "agent")
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(agent_lines, vec!["a", "b"]);

    let runner_notices: Vec<&str> = lines
        .iter()
        .filter(|l| l.source == "runner")
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(runner_notices, vec!["output truncated: line cap reached"]);
}

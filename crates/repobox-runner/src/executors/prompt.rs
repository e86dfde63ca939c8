//! Prompt executor (4.L): runs the AI agent adapter in the session's
//! existing workspace, computes this prompt's own diff stats, and toggles
//! the session `ready ⇄ running`.
//!
//! Commit semantics: this executor never commits. The working tree is
//! left dirty after a successful prompt; the push executor commits once,
//! immediately before pushing, aggregating every prompt in the session
//! into a single commit. Because of that, [`Git::diff_stats`] reports
//! only the lines changed since its own previous call rather than the
//! full diff against HEAD, so a job's `lines_added`/`lines_removed` and
//! the session-wide running totals aren't inflated by earlier prompts in
//! the same session.

use std::sync::Arc;

use anyhow::{Context, Result};
use repobox_core::error::ExecutionError;
use repobox_core::git::Git;
use repobox_core::sink::OutputSink;
use repobox_core::store::SessionStore;
use repobox_core::types::{JobPatch, JobStatus, OutputStream, PromptMsg, SessionPatch, SessionStatus};
use repobox_core::workspace;
use repobox_agent::{Agent, ExecuteRequest};
use tokio_util::sync::CancellationToken;

use super::common::{now_millis, truncate_chars};

pub struct PromptExecutor {
    session_store: SessionStore,
    sink: OutputSink,
    agent: Arc<Agent>,
    temp_dir: String,
}

impl PromptExecutor {
    pub fn new(session_store: SessionStore, sink: OutputSink, agent: Arc<Agent>, temp_dir: String) -> Self {
        Self {
            session_store,
            sink,
            agent,
            temp_dir,
        }
    }

    pub async fn handle(&self, msg: &PromptMsg, cancel: &CancellationToken) -> Result<()> {
        let repo_dir = workspace::repo_dir(&self.temp_dir, &msg.session_id);

        if !std::path::Path::new(&repo_dir).join(".git").is_dir() {
            // A janitor raced the dispatcher: the workspace is gone but the
            // message still arrived. This is a handled outcome, not a crash.
            self.session_store
                .update_job_status(
                    &msg.job_id,
                    JobStatus::Failed,
                    JobPatch {
                        finished_at: Some(now_millis()),
                        error_message: Some("session workdir not found".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .context("recording missing-workdir job failure")?;
            return Ok(());
        }

        self.session_store
            .update_status(&msg.session_id, SessionStatus::Running, SessionPatch::default())
            .await
            .context("marking session running")?;

        let started_at = now_millis();
        self.session_store
            .update_job_status(
                &msg.job_id,
                JobStatus::Running,
                JobPatch {
                    started_at: Some(started_at),
                    ..Default::default()
                },
            )
            .await
            .context("marking job running")?;

        let summary = truncate_chars(&msg.prompt, 100);
        self.sink
            .append_runner(&msg.session_id, format!("Running prompt: {summary}"))
            .await;

        let request = ExecuteRequest {
            workdir: &repo_dir,
            prompt: &msg.prompt,
            environment: &msg.environment,
            job_id: &msg.job_id,
            session_id: &msg.session_id,
        };
        let outcome = self.agent.execute(request, cancel).await;

        match outcome {
            Ok(()) => self.complete_success(msg, &repo_dir).await,
            Err(e) => self.complete_failure(msg, agent_error_message(&e)).await,
        }
    }

    async fn complete_success(&self, msg: &PromptMsg, repo_dir: &str) -> Result<()> {
        let git = Git::new(repo_dir);
        let (added, removed) = match git.diff_stats().await {
            Ok(stats) => stats,
            Err(e) => return self.complete_failure(msg, e.masked_message).await,
        };

        let finished_at = now_millis();
        self.session_store
            .update_job_status(
                &msg.job_id,
                JobStatus::Success,
                JobPatch {
                    finished_at: Some(finished_at),
                    lines_added: Some(added),
                    lines_removed: Some(removed),
                    error_message: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .context("recording job success")?;

        self.session_store
            .record_job_success(&msg.session_id, added, removed)
            .await
            .context("bumping session job_count/line totals")?;

        self.session_store
            .update_status(
                &msg.session_id,
                SessionStatus::Ready,
                SessionPatch {
                    error_message: Some(String::new()),
                    last_job_status: Some(JobStatus::Success.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await
            .context("returning session to ready after success")?;

        self.sink
            .append_runner(
                &msg.session_id,
                format!("Prompt completed: +{added} -{removed} lines"),
            )
            .await;
        Ok(())
    }

    async fn complete_failure(&self, msg: &PromptMsg, error_message: String) -> Result<()> {
        self.session_store
            .update_job_status(
                &msg.job_id,
                JobStatus::Failed,
                JobPatch {
                    finished_at: Some(now_millis()),
                    error_message: Some(error_message.clone()),
                    ..Default::default()
                },
            )
            .await
            .context("recording job failure")?;

        self.session_store
            .update_status(
                &msg.session_id,
                SessionStatus::Ready,
                SessionPatch {
                    error_message: Some(error_message.clone()),
                    last_job_status: Some(JobStatus::Failed.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await
            .context("returning session to ready after failure")?;

        self.sink
            .append_runner_stream(&msg.session_id, OutputStream::Stderr, format!("Prompt failed: {error_message}"))
            .await;
        Ok(())
    }
}

fn agent_error_message(e: &ExecutionError) -> String {
    match e {
        ExecutionError::Timeout => "agent execution timed out".to_string(),
        ExecutionError::Cancelled => "agent execution cancelled".to_string(),
        ExecutionError::NonZeroExit(code) => format!("agent exited with code {code}"),
        ExecutionError::SpawnFailure(cause) => format!("failed to spawn agent: {cause}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_messages_describe_each_failure_mode() {
        assert_eq!(
            agent_error_message(&ExecutionError::NonZeroExit(1)),
            "agent exited with code 1"
        );
        assert!(agent_error_message(&ExecutionError::Timeout).contains("timed out"));
    }
}

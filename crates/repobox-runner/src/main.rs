//! Supervisor (4.O): boots the logger and config, opens the shared Redis
//! connection, wires the four dispatchers, the worker pool, and the
//! janitor, and drains them all on `SIGINT`/`SIGTERM`.

mod dispatcher;
mod executors;
mod janitor;
mod logging;
mod stream_source;
mod worker;

use std::sync::Arc;

use repobox_agent::Agent;
use repobox_core::admission::AdmissionController;
use repobox_core::config::Config;
use repobox_core::sink::OutputSink;
use repobox_core::store::{CredentialStore, SessionStore};
use repobox_core::streams::StreamKind;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dispatcher::Dispatcher;
use executors::{InitExecutor, LegacyExecutor, PromptExecutor, PushExecutor};
use janitor::Janitor;
use stream_source::{RedisStreamSource, StreamSource};
use worker::{Executors, WorkerPool};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            // The logger isn't up yet — a malformed/missing config is
            // fatal before anything else runs (§6.5).
            eprintln!("repobox-runner: startup configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    logging::init(&config.log_level, &config.log_format);
    tracing::info!(runner_id = %config.runner_id, "repobox-runner starting");

    let client = match redis::Client::open(config.redis_url.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid REDIS_URL");
            std::process::exit(1);
        }
    };
    let conn = match client.get_connection_manager().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to redis");
            std::process::exit(1);
        }
    };

    let session_store = SessionStore::new(conn.clone());
    let credential_store = CredentialStore::new(conn.clone(), config.encryption_key);
    let sink = OutputSink::new(conn.clone());
    let admission = AdmissionController::new(conn.clone());
    let stream_source: Arc<dyn StreamSource> = Arc::new(RedisStreamSource::new(conn.clone()));

    let agent = Arc::new(Agent::new(
        repobox_agent::AgentConfig {
            enabled: config.ai_enabled,
            cli_path: config.ai_cli_path.clone(),
            api_key: config.ai_api_key.clone(),
            timeout: std::time::Duration::from_secs(config.ai_timeout_secs),
            max_output_lines: config.ai_max_output_lines,
        },
        Arc::new(sink.clone()),
    ));

    let init_executor = Arc::new(InitExecutor::new(
        session_store.clone(),
        credential_store.clone(),
        sink.clone(),
        config.temp_dir.clone(),
        config.git_author_name.clone(),
        config.git_author_email.clone(),
    ));
    let prompt_executor = Arc::new(PromptExecutor::new(
        session_store.clone(),
        sink.clone(),
        agent.clone(),
        config.temp_dir.clone(),
    ));
    let push_executor = Arc::new(PushExecutor::new(
        session_store.clone(),
        credential_store.clone(),
        sink.clone(),
        config.temp_dir.clone(),
    ));
    let legacy_executor = Arc::new(LegacyExecutor::new(
        session_store.clone(),
        init_executor.clone(),
        prompt_executor.clone(),
        push_executor.clone(),
    ));

    let cancel = CancellationToken::new();
    let (sender, receiver) = mpsc::channel(config.max_concurrent_jobs as usize * 4);

    let mut tasks = Vec::new();

    for kind in [StreamKind::Init, StreamKind::Prompt, StreamKind::Push, StreamKind::Legacy] {
        let dispatcher = Dispatcher::new(
            kind,
            stream_source.clone(),
            admission.clone(),
            config.max_jobs_per_user,
            config.runner_id.clone(),
            sender.clone(),
        );
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(dispatcher.run(cancel)));
    }
    drop(sender);

    let worker_pool = WorkerPool::new(
        receiver,
        stream_source.clone(),
        session_store.clone(),
        Executors {
            init: init_executor,
            prompt: prompt_executor,
            push: push_executor,
            legacy: legacy_executor,
        },
        config.max_concurrent_jobs,
        std::time::Duration::from_secs(config.job_timeout_secs),
    );
    tasks.push(tokio::spawn(worker_pool.run(cancel.clone())));

    let janitor = Janitor::new(
        session_store,
        config.temp_dir.clone(),
        config.cleanup_interval_secs,
        config.cleanup_max_age_secs,
        config.cleanup_max_disk_mb,
        config.cleanup_on_startup,
    );
    tasks.push(tokio::spawn(janitor.run(cancel.clone())));

    let exit_code = wait_for_shutdown(cancel).await;

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!(exit_code, "repobox-runner drained, exiting");
    std::process::exit(exit_code);
}

/// Waits for `SIGINT`/`SIGTERM`, cancels the supervisor token, and reports
/// the exit code per §6.6: `130` for `SIGINT`, `0` for a clean `SIGTERM`
/// drain.
async fn wait_for_shutdown(cancel: CancellationToken) -> i32 {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            cancel.cancel();
            130
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
            cancel.cancel();
            0
        }
    }
}

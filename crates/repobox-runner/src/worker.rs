//! Worker pool (4.J): `MAX_CONCURRENT_JOBS` tasks draining the
//! dispatchers' shared channel. Each executor call runs inside its own
//! `tokio::spawn` so a panic surfaces as `Err(JoinError)` instead of
//! taking the worker down; both that and an ordinary executor error mark
//! the relevant session/job `failed` before the message is still
//! acknowledged — poison messages never wedge the consumer group.

use std::sync::Arc;
use std::time::Duration;

use repobox_core::store::SessionStore;
use repobox_core::types::{JobPatch, JobStatus, SessionPatch, SessionStatus, StreamMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatchItem;
use crate::executors::{InitExecutor, LegacyExecutor, PromptExecutor, PushExecutor};
use crate::stream_source::StreamSource;

pub struct Executors {
    pub init: Arc<InitExecutor>,
    pub prompt: Arc<PromptExecutor>,
    pub push: Arc<PushExecutor>,
    pub legacy: Arc<LegacyExecutor>,
}

pub struct WorkerPool {
    receiver: mpsc::Receiver<DispatchItem>,
    source: Arc<dyn StreamSource>,
    session_store: SessionStore,
    executors: Arc<Executors>,
    worker_count: u32,
    job_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        receiver: mpsc::Receiver<DispatchItem>,
        source: Arc<dyn StreamSource>,
        session_store: SessionStore,
        executors: Executors,
        worker_count: u32,
        job_timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            source,
            session_store,
            executors: Arc::new(executors),
            worker_count,
            job_timeout,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let receiver = Arc::new(tokio::sync::Mutex::new(self.receiver));
        let mut handles = Vec::new();
        for id in 0..self.worker_count {
            let receiver = receiver.clone();
            let source = self.source.clone();
            let session_store = self.session_store.clone();
            let executors = self.executors.clone();
            let cancel = cancel.clone();
            let job_timeout = self.job_timeout;
            handles.push(tokio::spawn(async move {
                worker_loop(id, receiver, source, session_store, executors, job_timeout, cancel).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: u32,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchItem>>>,
    source: Arc<dyn StreamSource>,
    session_store: SessionStore,
    executors: Arc<Executors>,
    job_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let item = {
            let mut guard = receiver.lock().await;
            tokio::select! {
                item = guard.recv() => item,
                _ = cancel.cancelled() => None,
            }
        };
        let Some(item) = item else { break };

        let DispatchItem {
            message,
            stream,
            group,
            entry_id,
            admission,
        } = item;

        let outcome = run_executor(&executors, message, job_timeout, &cancel).await;
        if let Err(failure) = outcome {
            tracing::warn!(worker_id, stream, error = %failure.cause, "executor failed, marking failed");
            record_failure(&session_store, &failure).await;
        }

        if let Err(e) = source.ack(stream, &group, &entry_id).await {
            tracing::warn!(worker_id, stream, entry_id, error = %e, "failed to ack processed message");
        }

        drop(admission);
    }
    tracing::info!(worker_id, "worker shutting down");
}

struct Failure {
    cause: anyhow::Error,
    session_id: Option<String>,
    job_id: Option<String>,
}

/// Runs one executor under the per-executor deadline from `JOB_TIMEOUT`
/// (§5: "default 1 h for a prompt"), independent of the AI adapter's own
/// shorter internal deadline. The executor gets a child token of the
/// supervisor's shutdown token, so either a timeout here or a process-wide
/// shutdown cancels the same in-flight git/agent calls; on timeout the
/// child token is cancelled and the task is given a chance to unwind, but
/// the result is reported as a failure either way so the message is still
/// acked and the session/job don't wedge in `running`.
async fn run_executor(
    executors: &Executors,
    message: StreamMessage,
    job_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), Failure> {
    let (session_id, job_id) = match &message {
        StreamMessage::Init(m) => (Some(m.session_id.clone()), None),
        StreamMessage::Prompt(m) => (Some(m.session_id.clone()), Some(m.job_id.clone())),
        StreamMessage::Push(m) => (Some(m.session_id.clone()), None),
        StreamMessage::Legacy(m) => (None, Some(m.job_id.clone())),
    };

    let init = executors.init.clone();
    let prompt = executors.prompt.clone();
    let push = executors.push.clone();
    let legacy = executors.legacy.clone();
    let child_cancel = cancel.child_token();
    let cancel_for_task = child_cancel.clone();

    let task = tokio::spawn(async move {
        match message {
            StreamMessage::Init(m) => init.handle(&m, &cancel_for_task).await,
            StreamMessage::Prompt(m) => prompt.handle(&m, &cancel_for_task).await,
            StreamMessage::Push(m) => push.handle(&m, &cancel_for_task).await,
            StreamMessage::Legacy(m) => legacy.handle(&m, &cancel_for_task).await,
        }
    });

    let joined = tokio::select! {
        result = task => result,
        _ = tokio::time::sleep(job_timeout) => {
            child_cancel.cancel();
            return Err(Failure {
                cause: anyhow::anyhow!("executor exceeded the {job_timeout:?} job deadline"),
                session_id,
                job_id,
            });
        }
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Failure {
            cause: e,
            session_id,
            job_id,
        }),
        Err(join_err) => Err(Failure {
            cause: anyhow::anyhow!("executor panicked: {join_err}"),
            session_id,
            job_id,
        }),
    }
}

async fn record_failure(session_store: &SessionStore, failure: &Failure) {
    let message = failure.cause.to_string();
    if let Some(session_id) = &failure.session_id {
        let result = session_store
            .update_status(
                session_id,
                SessionStatus::Failed,
                SessionPatch {
                    error_message: Some(message.clone()),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "failed to record session failure");
        }
    }
    if let Some(job_id) = &failure.job_id {
        let result = session_store
            .update_job_status(
                job_id,
                JobStatus::Failed,
                JobPatch {
                    error_message: Some(message),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(job_id, error = %e, "failed to record job failure");
        }
    }
}

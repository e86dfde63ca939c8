//! Stream dispatcher (4.I): one independent loop per stream kind, each
//! reclaiming stale pending entries, blocking for a new one, parsing it,
//! optionally gating it through admission control, and handing it off to
//! the worker pool. `XACK` is never issued here — see `worker.rs`.

use std::sync::Arc;
use std::time::Duration;

use repobox_core::admission::{AdmissionController, AdmissionResult};
use repobox_core::config::defaults;
use repobox_core::streams::StreamKind;
use repobox_core::types::StreamMessage;
use tokio_util::sync::CancellationToken;

use crate::stream_source::StreamSource;

/// One parsed message plus everything the worker needs to `XACK` it and
/// release its admission slot afterward.
pub struct DispatchItem {
    pub message: StreamMessage,
    pub stream: &'static str,
    pub group: String,
    pub entry_id: String,
    pub admission: Option<repobox_core::admission::Admission>,
}

pub struct Dispatcher {
    kind: StreamKind,
    source: Arc<dyn StreamSource>,
    admission: AdmissionController,
    admission_cap: u64,
    consumer: String,
    sender: tokio::sync::mpsc::Sender<DispatchItem>,
}

impl Dispatcher {
    pub fn new(
        kind: StreamKind,
        source: Arc<dyn StreamSource>,
        admission: AdmissionController,
        admission_cap: u64,
        consumer: String,
        sender: tokio::sync::mpsc::Sender<DispatchItem>,
    ) -> Self {
        Self {
            kind,
            source,
            admission,
            admission_cap,
            consumer,
            sender,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let stream = self.kind.stream_name();
        let group = self.kind.group_name();

        if let Err(e) = self.source.ensure_group(stream, &group).await {
            tracing::error!(stream, error = %e, "failed to ensure consumer group, dispatcher exiting");
            return;
        }

        while !cancel.is_cancelled() {
            match self
                .source
                .claim_stale(
                    stream,
                    &group,
                    &self.consumer,
                    defaults::CLAIM_IDLE_THRESHOLD_MS,
                    50,
                )
                .await
            {
                Ok(entries) => {
                    for (entry_id, fields) in entries {
                        self.dispatch_one(stream, &group, entry_id, fields, &cancel).await;
                    }
                }
                Err(e) => tracing::warn!(stream, error = %e, "XAUTOCLAIM failed"),
            }

            if cancel.is_cancelled() {
                break;
            }

            let read = tokio::select! {
                r = self.source.read_one(stream, &group, &self.consumer, defaults::STREAM_BLOCK_MS) => r,
                _ = cancel.cancelled() => break,
            };

            match read {
                Ok(Some((entry_id, fields))) => {
                    self.dispatch_one(stream, &group, entry_id, fields, &cancel).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(stream, error = %e, "XREADGROUP failed");
                    tokio::time::sleep(Duration::from_millis(defaults::STREAM_BLOCK_MS)).await;
                }
            }
        }

        tracing::info!(stream, "dispatcher shutting down");
    }

    async fn dispatch_one(
        &self,
        stream: &'static str,
        group: &str,
        entry_id: String,
        fields: std::collections::HashMap<String, String>,
        cancel: &CancellationToken,
    ) {
        let message = match self.kind.parse(&fields) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(stream, entry_id, error = %e, "dropping unparseable stream entry");
                if let Err(ack_err) = self.source.ack(stream, group, &entry_id).await {
                    tracing::warn!(stream, entry_id, error = %ack_err, "failed to ack poison message");
                }
                return;
            }
        };

        let admission = if self.kind.rate_limited() {
            let user_id = admission_user_id(&message, &fields);
            match self.admission.try_acquire(&user_id, self.admission_cap).await {
                Ok(AdmissionResult::Acquired) => Some(self.admission.acquire_guard(&user_id)),
                Ok(AdmissionResult::Rejected) => {
                    tokio::time::sleep(Duration::from_millis(defaults::ADMISSION_RETRY_SLEEP_MS)).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(stream, entry_id, error = %e, "admission check failed, retrying later");
                    tokio::time::sleep(Duration::from_millis(defaults::ADMISSION_RETRY_SLEEP_MS)).await;
                    return;
                }
            }
        } else {
            None
        };

        let item = DispatchItem {
            message,
            stream,
            group: group.to_string(),
            entry_id,
            admission,
        };

        tokio::select! {
            result = self.sender.send(item) => {
                if result.is_err() {
                    tracing::warn!(stream, "worker pool channel closed, dropping message");
                }
            }
            _ = cancel.cancelled() => {}
        }
    }
}

/// `Prompt` messages carry `user_id` directly; `Legacy` messages don't
/// (§6.1's `jobs:stream` schema predates the per-stream split), so this
/// falls back to the raw field map for that one case.
fn admission_user_id(message: &StreamMessage, fields: &std::collections::HashMap<String, String>) -> String {
    match message {
        StreamMessage::Prompt(m) => m.user_id.clone(),
        _ => fields.get("user_id").cloned().unwrap_or_default(),
    }
}

//! Output sink (4.C): appends one JSON-encoded [`OutputLine`] per event to
//! an ordered per-session Redis list and refreshes its TTL. Best-effort —
//! a write that the store rejects is logged and dropped, never
//! propagated to the caller.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keys;
use crate::types::{OutputLine, OutputSource, OutputStream};

const OUTPUT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Port over the output sink's two append operations. Lets callers that
/// only ever append runner/agent lines (the agent adapter, the executors)
/// depend on the behavior rather than on `OutputSink`'s concrete Redis
/// connection, so tests can supply an in-memory fake instead of a live
/// store — matching the "no test depends on a live Redis instance" rule.
#[async_trait::async_trait]
pub trait OutputPort: Send + Sync {
    async fn append_runner(&self, session_id: &str, text: String);
    async fn append_runner_stream(&self, session_id: &str, stream: OutputStream, text: String);
    async fn append_agent(&self, session_id: &str, stream: OutputStream, text: String);
}

#[derive(Clone)]
pub struct OutputSink {
    conn: ConnectionManager,
}

impl OutputSink {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Appends a fully-formed line. Never fails the caller; Redis errors
    /// are logged at `warn!` and swallowed.
    pub async fn append(&self, session_id: &str, line: OutputLine) {
        let encoded = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to encode output line");
                return;
            }
        };

        let key = keys::session_output(session_id);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = async {
            conn.rpush(&key, encoded).await?;
            conn.expire(&key, OUTPUT_TTL_SECS).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "output sink append failed, dropping line");
        }
    }

    pub async fn append_runner(&self, session_id: &str, text: impl Into<String>) {
        self.append_runner_stream(session_id, OutputStream::Stdout, text).await;
    }

    pub async fn append_runner_stream(
        &self,
        session_id: &str,
        stream: OutputStream,
        text: impl Into<String>,
    ) {
        self.append(
            session_id,
            OutputLine {
                timestamp: now_millis(),
                stream,
                source: OutputSource::Runner,
                line: text.into(),
            },
        )
        .await;
    }

    pub async fn append_agent(&self, session_id: &str, stream: OutputStream, text: impl Into<String>) {
        self.append(
            session_id,
            OutputLine {
                timestamp: now_millis(),
                stream,
                source: OutputSource::Agent,
                line: text.into(),
            },
        )
        .await;
    }
}

#[async_trait::async_trait]
impl OutputPort for OutputSink {
    async fn append_runner(&self, session_id: &str, text: String) {
        OutputSink::append_runner(self, session_id, text).await;
    }

    async fn append_runner_stream(&self, session_id: &str, stream: OutputStream, text: String) {
        OutputSink::append_runner_stream(self, session_id, stream, text).await;
    }

    async fn append_agent(&self, session_id: &str, stream: OutputStream, text: String) {
        OutputSink::append_agent(self, session_id, stream, text).await;
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An in-memory [`OutputPort`] fake. Not behind `#[cfg(test)]` so that
/// downstream crates' integration tests (`repobox-agent`, `repobox-runner`)
/// can depend on it too, without needing a live Redis instance to exercise
/// line forwarding and ordering (§8 property 7).
pub mod test_support {

    use std::sync::Mutex;

    use super::OutputPort;
    use crate::types::OutputStream;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedLine {
        pub session_id: String,
        pub source: &'static str,
        pub stream: Option<OutputStream>,
        pub text: String,
    }

    #[derive(Default)]
    pub struct RecordingSink {
        lines: Mutex<Vec<RecordedLine>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<RecordedLine> {
            self.lines.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait::async_trait]
    impl OutputPort for RecordingSink {
        async fn append_runner(&self, session_id: &str, text: String) {
            self.lines.lock().expect("lock poisoned").push(RecordedLine {
                session_id: session_id.to_string(),
                source: "runner",
                stream: None,
                text,
            });
        }

        async fn append_runner_stream(&self, session_id: &str, stream: OutputStream, text: String) {
            self.lines.lock().expect("lock poisoned").push(RecordedLine {
                session_id: session_id.to_string(),
                source: "runner",
                stream: Some(stream),
                text,
            });
        }

        async fn append_agent(&self, session_id: &str, stream: OutputStream, text: String) {
            self.lines.lock().expect("lock poisoned").push(RecordedLine {
                session_id: session_id.to_string(),
                source: "agent",
                stream: Some(stream),
                text,
            });
        }
    }
}

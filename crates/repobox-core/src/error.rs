use thiserror::Error;

/// Failure modes for [`crate::crypto::decrypt`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed ciphertext")]
    MalformedInput,
    #[error("decryption authentication failed")]
    AuthenticationFailure,
    #[error("encryption key misconfigured: {0}")]
    KeyMisconfigured(String),
}

/// A git subprocess failure, with the raw token already masked out of
/// every field.
#[derive(Debug, Error)]
#[error("git {stage} failed (exit {exit_status}): {masked_message}")]
pub struct GitFailure {
    pub stage: &'static str,
    pub exit_status: i32,
    pub masked_message: String,
}

/// Outcome categories for [`repobox_agent`]'s adapter, matching 4.D.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("agent execution timed out")]
    Timeout,
    #[error("agent execution cancelled")]
    Cancelled,
    #[error("agent exited with code {0}")]
    NonZeroExit(i32),
    #[error("failed to spawn agent process: {0}")]
    SpawnFailure(String),
}

/// MR/PR client failures.
#[derive(Debug, Error)]
pub enum MrError {
    #[error("merge request API call failed with status {status}: {masked_body}")]
    ApiFailure { status: u16, masked_body: String },
    #[error("request error: {0}")]
    Request(String),
}

/// Store/record access failures, per the "dynamic hashes -> typed
/// records" rule in spec.md's design notes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("store backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

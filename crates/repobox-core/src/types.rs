//! The data model from spec §3: Session, Job, Provider, OutputLine, and
//! the three stream message envelopes.

use serde::{Deserialize, Serialize};

/// Session lifecycle states, forming the DAG in §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Running,
    Pushed,
    Archived,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::Pushed => "pushed",
            SessionStatus::Archived => "archived",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pushed | SessionStatus::Archived | SessionStatus::Failed
        )
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "initializing" => SessionStatus::Initializing,
            "ready" => SessionStatus::Ready,
            "running" => SessionStatus::Running,
            "pushed" => SessionStatus::Pushed,
            "archived" => SessionStatus::Archived,
            "failed" => SessionStatus::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Gitlab,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "github" => ProviderKind::Github,
            "gitlab" => ProviderKind::Gitlab,
            _ => return None,
        })
    }
}

/// A long-lived workspace anchored to one repository and feature branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub repo_url: String,
    pub repo_name: String,
    pub base_branch: String,
    pub work_branch: String,
    pub status: SessionStatus,
    pub job_count: u64,
    pub total_lines_added: u64,
    pub total_lines_removed: u64,
    pub mr_url: Option<String>,
    pub mr_warning: Option<String>,
    pub error_message: Option<String>,
    pub last_job_status: Option<String>,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub pushed_at: Option<i64>,
}

/// Field delta for [`crate::store::SessionStore::update_status`]; `None`
/// means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub job_count: Option<u64>,
    pub total_lines_added: Option<u64>,
    pub total_lines_removed: Option<u64>,
    pub mr_url: Option<String>,
    pub mr_warning: Option<String>,
    pub error_message: Option<String>,
    pub last_job_status: Option<String>,
    pub pushed_at: Option<i64>,
    pub work_branch: Option<String>,
}

/// One prompt execution inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub prompt: String,
    pub environment: String,
    pub status: JobStatus,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub lines_added: Option<u64>,
    pub lines_removed: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub lines_added: Option<u64>,
    pub lines_removed: Option<u64>,
    pub error_message: Option<String>,
}

/// An encrypted credential for a git host. `token` holds the decrypted
/// plaintext behind [`SecretToken`] once read through the credential
/// store; it is never safe to log directly.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: String,
    pub user_id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub token: SecretToken,
    pub verified: bool,
}

/// A plaintext provider token. `Debug`/`Display` always print the masked
/// form; `expose` is the only way to get the raw bytes back, and is
/// called only from the git driver's authenticated-URL builder and the
/// MR/PR clients' auth headers.
#[derive(Clone)]
pub struct SecretToken {
    value: String,
    masker: crate::mask::Masker,
}

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let masker = crate::mask::Masker::new(value.clone());
        Self { value, masker }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn masker(&self) -> &crate::mask::Masker {
        &self.masker
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretToken({})", self.masker.mask(&self.value))
    }
}

impl std::fmt::Display for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.masker.mask(&self.value))
    }
}

/// One log record in a session's output list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: i64,
    pub stream: OutputStream,
    pub source: OutputSource,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Runner,
    Agent,
}

/// The three disjoint stream envelopes from §3/§6.1, plus the legacy
/// single-shot kind.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Init(InitMsg),
    Prompt(PromptMsg),
    Push(PushMsg),
    Legacy(LegacyMsg),
}

#[derive(Debug, Clone)]
pub struct InitMsg {
    pub session_id: String,
    pub user_id: String,
    pub provider_id: String,
    pub repo_url: String,
    pub repo_name: String,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct PromptMsg {
    pub session_id: String,
    pub job_id: String,
    pub user_id: String,
    pub prompt: String,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct PushMsg {
    pub session_id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Fields carried by the legacy `jobs:stream` (§6.1).
#[derive(Debug, Clone)]
pub struct LegacyMsg {
    pub job_id: String,
    pub provider_id: String,
}

/// The branch name for a session, shared by the init executor (which
/// creates it) and the push executor's default MR title (which echoes
/// it) so the two can never drift apart.
pub fn branch_name(session_id: &str) -> String {
    let short = session_id.chars().take(8).collect::<String>();
    format!("repobox/{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_truncates_to_eight_chars() {
        assert_eq!(branch_name("0123456789abcdef"), "repobox/01234567");
    }

    #[test]
    fn branch_name_handles_short_ids() {
        assert_eq!(branch_name("abc"), "repobox/abc");
    }

    #[test]
    fn session_status_round_trips_through_str() {
        for status in [
            SessionStatus::Initializing,
            SessionStatus::Ready,
            SessionStatus::Running,
            SessionStatus::Pushed,
            SessionStatus::Archived,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Pushed.is_terminal());
        assert!(SessionStatus::Archived.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Ready.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Initializing.is_terminal());
    }

    #[test]
    fn secret_token_debug_is_masked() {
        let token = SecretToken::new("ghp_abcdef1234567890");
        let debug = format!("{token:?}");
        assert!(!debug.contains("abcdef1234567890"));
    }
}

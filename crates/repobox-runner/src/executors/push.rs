//! Push executor (4.M): commits once (see `prompt.rs` for the commit-
//! semantics decision), pushes the branch, and creates the MR/PR.

use anyhow::{Context, Result};
use repobox_core::error::MrError;
use repobox_core::git::Git;
use repobox_core::sink::OutputSink;
use repobox_core::store::{CredentialStore, SessionStore};
use repobox_core::types::{branch_name, OutputStream, PushMsg, Session, SessionPatch, SessionStatus};
use repobox_core::workspace;
use repobox_hosts::{client_for, CreateMrRequest};
use tokio_util::sync::CancellationToken;

use super::common::{now_millis, parse_owner_repo};

pub struct PushExecutor {
    session_store: SessionStore,
    credential_store: CredentialStore,
    sink: OutputSink,
    temp_dir: String,
}

impl PushExecutor {
    pub fn new(
        session_store: SessionStore,
        credential_store: CredentialStore,
        sink: OutputSink,
        temp_dir: String,
    ) -> Self {
        Self {
            session_store,
            credential_store,
            sink,
            temp_dir,
        }
    }

    pub async fn handle(&self, msg: &PushMsg, cancel: &CancellationToken) -> Result<()> {
        let session = self
            .session_store
            .get(&msg.session_id)
            .await
            .context("loading session for push")?;

        let repo_dir = workspace::repo_dir(&self.temp_dir, &session.id);
        if !std::path::Path::new(&repo_dir).join(".git").is_dir() {
            self.warn_and_stay_ready(&session.id, "workspace not found".to_string())
                .await?;
            return Ok(());
        }

        let provider = self
            .credential_store
            .get_provider(&session.user_id, &session.provider_id)
            .await
            .context("loading provider for push")?;

        let git = Git::new(&repo_dir).with_secret(provider.token.expose());

        if let Err(e) = git.commit_all("repobox: automated changes").await {
            self.warn_and_stay_ready(&session.id, e.masked_message).await?;
            return Ok(());
        }

        self.sink.append_runner(&session.id, "Pushing branch...").await;
        let branch = if session.work_branch.is_empty() {
            branch_name(&session.id)
        } else {
            session.work_branch.clone()
        };

        if let Err(e) = git.push(&branch, cancel).await {
            self.warn_and_stay_ready(&session.id, e.masked_message).await?;
            return Ok(());
        }

        let (title, body) = synthesize_mr_text(&session, msg, &branch);
        let (owner, repo) = match parse_owner_repo(&session.repo_url) {
            Ok(pair) => pair,
            Err(e) => {
                self.finish_pushed_with_warning(&session.id, e.to_string()).await?;
                return Ok(());
            }
        };

        let client = client_for(provider.kind, &provider.base_url);
        let request = CreateMrRequest {
            owner: &owner,
            repo: &repo,
            title: &title,
            body: &body,
            head: &branch,
            base: &session.base_branch,
            token: provider.token.expose(),
        };

        match client.create(request).await {
            Ok(response) => {
                self.session_store
                    .update_status(
                        &session.id,
                        SessionStatus::Pushed,
                        SessionPatch {
                            mr_url: Some(response.url.clone()),
                            mr_warning: Some(String::new()),
                            pushed_at: Some(now_millis()),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("recording mr_url after successful push")?;
                self.sink
                    .append_runner(&session.id, format!("Merge request created: {}", response.url))
                    .await;
            }
            Err(e) => {
                self.finish_pushed_with_warning(&session.id, mr_error_message(&e)).await?;
            }
        }
        Ok(())
    }

    /// Push itself succeeded; only MR creation failed. Per §7's table the
    /// session still moves to `pushed` — the branch landed upstream, only
    /// the MR/PR surface has a warning attached (S6).
    async fn finish_pushed_with_warning(&self, session_id: &str, warning: String) -> Result<()> {
        self.session_store
            .update_status(
                session_id,
                SessionStatus::Pushed,
                SessionPatch {
                    mr_warning: Some(warning.clone()),
                    pushed_at: Some(now_millis()),
                    ..Default::default()
                },
            )
            .await
            .context("recording mr_warning after pushed branch")?;
        self.sink
            .append_runner_stream(session_id, OutputStream::Stderr, format!("Warning: {warning}"))
            .await;
        Ok(())
    }

    /// Push (or the pre-push commit) itself failed: the session goes back
    /// to `ready` so the user can retry, per §4.M.2.
    async fn warn_and_stay_ready(&self, session_id: &str, warning: String) -> Result<()> {
        self.session_store
            .update_status(
                session_id,
                SessionStatus::Ready,
                SessionPatch {
                    mr_warning: Some(warning.clone()),
                    ..Default::default()
                },
            )
            .await
            .context("returning session to ready after push failure")?;
        self.sink
            .append_runner_stream(session_id, OutputStream::Stderr, format!("Warning: {warning}"))
            .await;
        Ok(())
    }
}

fn synthesize_mr_text(session: &Session, msg: &PushMsg, branch: &str) -> (String, String) {
    let short_id: String = session.id.chars().take(8).collect();
    let title = msg
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("repobox: Work session {short_id}"));
    let body = msg.description.clone().filter(|d| !d.is_empty()).unwrap_or_else(|| {
        format!(
            "Automated changes from repobox work session `{short_id}`.\n\n\
             - Branch: `{branch}`\n\
             - Jobs run: {}\n\
             - Lines changed: +{} -{}\n",
            session.job_count, session.total_lines_added, session.total_lines_removed,
        )
    });
    (title, body)
}

fn mr_error_message(e: &MrError) -> String {
    match e {
        MrError::ApiFailure { status, masked_body } => {
            format!("merge request creation failed with status {status}: {masked_body}")
        }
        MrError::Request(cause) => format!("merge request request failed: {cause}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repobox_core::types::ProviderKind;

    fn sample_session() -> Session {
        Session {
            id: "0123456789abcdef".to_string(),
            user_id: "u1".to_string(),
            provider_id: "p1".to_string(),
            repo_url: "https://github.com/acme/widgets.git".to_string(),
            repo_name: "widgets".to_string(),
            base_branch: "main".to_string(),
            work_branch: "repobox/01234567".to_string(),
            status: SessionStatus::Ready,
            job_count: 2,
            total_lines_added: 10,
            total_lines_removed: 3,
            mr_url: None,
            mr_warning: None,
            error_message: None,
            last_job_status: Some("success".to_string()),
            created_at: 0,
            last_activity_at: 0,
            pushed_at: None,
        }
    }

    #[test]
    fn default_title_uses_short_session_id() {
        let session = sample_session();
        let msg = PushMsg {
            session_id: session.id.clone(),
            user_id: "u1".to_string(),
            title: None,
            description: None,
        };
        let (title, body) = synthesize_mr_text(&session, &msg, "repobox/01234567");
        assert_eq!(title, "repobox: Work session 01234567");
        assert!(body.contains("Jobs run: 2"));
        assert!(body.contains("+10 -3"));
    }

    #[test]
    fn caller_supplied_title_wins() {
        let session = sample_session();
        let msg = PushMsg {
            session_id: session.id.clone(),
            user_id: "u1".to_string(),
            title: Some("Custom title".to_string()),
            description: Some("Custom body".to_string()),
        };
        let (title, body) = synthesize_mr_text(&session, &msg, "repobox/01234567");
        assert_eq!(title, "Custom title");
        assert_eq!(body, "Custom body");
    }

    #[test]
    fn mr_error_message_includes_status_and_body() {
        let err = MrError::ApiFailure {
            status: 500,
            masked_body: "internal error".to_string(),
        };
        assert!(mr_error_message(&err).contains("500"));
    }

    #[test]
    fn provider_kind_is_exhaustively_matched_by_client_for() {
        // client_for panics on no match; this just documents both variants
        // are wired through repobox_hosts.
        let _ = ProviderKind::Github;
        let _ = ProviderKind::Gitlab;
    }
}

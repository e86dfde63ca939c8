//! Init executor (4.K): creates the workspace, clones the repo, cuts the
//! feature branch. Idempotent — re-entry after a crash (S4) lands back on
//! the same `.git` check and skips straight to `ready`.

use anyhow::{Context, Result};
use repobox_core::git::{authenticated_url, Git};
use repobox_core::sink::OutputSink;
use repobox_core::store::{CredentialStore, SessionStore};
use repobox_core::types::{branch_name, InitMsg, SessionPatch, SessionStatus};
use repobox_core::workspace;
use tokio_util::sync::CancellationToken;

pub struct InitExecutor {
    session_store: SessionStore,
    credential_store: CredentialStore,
    sink: OutputSink,
    temp_dir: String,
    git_author_name: String,
    git_author_email: String,
}

impl InitExecutor {
    pub fn new(
        session_store: SessionStore,
        credential_store: CredentialStore,
        sink: OutputSink,
        temp_dir: String,
        git_author_name: String,
        git_author_email: String,
    ) -> Self {
        Self {
            session_store,
            credential_store,
            sink,
            temp_dir,
            git_author_name,
            git_author_email,
        }
    }

    pub async fn handle(&self, msg: &InitMsg, cancel: &CancellationToken) -> Result<()> {
        let repo_dir = workspace::repo_dir(&self.temp_dir, &msg.session_id);

        if std::path::Path::new(&repo_dir).join(".git").is_dir() {
            self.sink
                .append_runner(&msg.session_id, "skipping clone: workspace already initialized")
                .await;
            self.session_store
                .update_status(&msg.session_id, SessionStatus::Ready, SessionPatch::default())
                .await
                .context("marking session ready on idempotent re-entry")?;
            return Ok(());
        }

        tokio::fs::create_dir_all(&repo_dir)
            .await
            .with_context(|| format!("creating workspace dir {repo_dir}"))?;

        let provider = match self
            .credential_store
            .get_provider(&msg.user_id, &msg.provider_id)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                self.fail(&msg.session_id, format!("credential error: {e}")).await;
                return Err(e.into());
            }
        };

        self.sink
            .append_runner(&msg.session_id, format!("Cloning {}...", msg.repo_name))
            .await;

        let auth_url = match authenticated_url(&msg.repo_url, provider.token.expose()) {
            Ok(u) => u,
            Err(e) => {
                self.fail(&msg.session_id, e.masked_message.clone()).await;
                return Err(e.into());
            }
        };

        let git = Git::new(&repo_dir).with_secret(provider.token.expose());
        if let Err(e) = git.clone_authenticated(&auth_url, &repo_dir, cancel).await {
            self.fail(&msg.session_id, e.masked_message.clone()).await;
            return Err(e.into());
        }

        if let Err(e) = git
            .set_author(&self.git_author_name, &self.git_author_email)
            .await
        {
            self.fail(&msg.session_id, e.masked_message.clone()).await;
            return Err(e.into());
        }

        let branch = branch_name(&msg.session_id);
        if let Err(e) = git.create_branch(&branch).await {
            self.fail(&msg.session_id, e.masked_message.clone()).await;
            return Err(e.into());
        }

        self.session_store
            .update_status(
                &msg.session_id,
                SessionStatus::Ready,
                SessionPatch {
                    work_branch: Some(branch),
                    error_message: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .context("marking session ready after clone")?;
        self.sink.append_runner(&msg.session_id, "Workspace ready").await;
        Ok(())
    }

    async fn fail(&self, session_id: &str, masked_message: String) {
        self.sink
            .append_runner_stream(
                session_id,
                repobox_core::types::OutputStream::Stderr,
                format!("Init failed: {masked_message}"),
            )
            .await;
        let result = self
            .session_store
            .update_status(
                session_id,
                SessionStatus::Failed,
                SessionPatch {
                    error_message: Some(masked_message),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "failed to record init failure");
        }
    }
}

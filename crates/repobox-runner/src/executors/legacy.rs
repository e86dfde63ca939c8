//! Legacy executor: drives the old single-message `jobs:stream` protocol
//! (§9 open question, resolved in SPEC_FULL.md) by loading the job's and
//! session's full records and replaying them through init→prompt→push
//! synchronously, rather than dropping the stream.

use std::sync::Arc;

use anyhow::{Context, Result};
use repobox_core::store::SessionStore;
use repobox_core::types::{InitMsg, LegacyMsg, PromptMsg, PushMsg, SessionStatus};
use tokio_util::sync::CancellationToken;

use super::init::InitExecutor;
use super::prompt::PromptExecutor;
use super::push::PushExecutor;

pub struct LegacyExecutor {
    session_store: SessionStore,
    init: Arc<InitExecutor>,
    prompt: Arc<PromptExecutor>,
    push: Arc<PushExecutor>,
}

impl LegacyExecutor {
    pub fn new(
        session_store: SessionStore,
        init: Arc<InitExecutor>,
        prompt: Arc<PromptExecutor>,
        push: Arc<PushExecutor>,
    ) -> Self {
        Self {
            session_store,
            init,
            prompt,
            push,
        }
    }

    pub async fn handle(&self, msg: &LegacyMsg, cancel: &CancellationToken) -> Result<()> {
        let job = self
            .session_store
            .get_job(&msg.job_id)
            .await
            .context("loading legacy job")?;
        let session = self
            .session_store
            .get(&job.session_id)
            .await
            .context("loading legacy session")?;

        if session.status == SessionStatus::Initializing {
            let init_msg = InitMsg {
                session_id: session.id.clone(),
                user_id: session.user_id.clone(),
                provider_id: msg.provider_id.clone(),
                repo_url: session.repo_url.clone(),
                repo_name: session.repo_name.clone(),
                base_branch: session.base_branch.clone(),
            };
            self.init.handle(&init_msg, cancel).await?;
        }

        let prompt_msg = PromptMsg {
            session_id: session.id.clone(),
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            prompt: job.prompt.clone(),
            environment: job.environment.clone(),
        };
        self.prompt.handle(&prompt_msg, cancel).await?;

        let push_msg = PushMsg {
            session_id: session.id.clone(),
            user_id: job.user_id.clone(),
            title: None,
            description: None,
        };
        self.push.handle(&push_msg, cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Full coverage of the three-stage replay lives in the executors'
    // own test modules; this module only wires them together and has no
    // branching logic worth a dedicated fake-store test.
}

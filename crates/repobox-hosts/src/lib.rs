//! MR/PR clients (4.E): creates a pull/merge request against the provider
//! that owns a session's repository, behind a shared [`MrClient`] trait so
//! the push executor never branches on provider kind itself.

pub mod client;
pub mod github;
pub mod gitlab;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use client::{CreateMrRequest, CreateMrResponse, MrClient};
pub use github::{AuthScheme, GitHubClient};
pub use gitlab::GitLabClient;
pub use retry::RetryPolicy;

use repobox_core::types::ProviderKind;

/// Builds the client for a provider's kind, against its configured
/// `base_url`. The push executor holds a `Box<dyn MrClient>` so it never
/// needs to match on `kind` itself once a session is past this point.
pub fn client_for(kind: ProviderKind, base_url: &str) -> Box<dyn MrClient> {
    match kind {
        ProviderKind::Github => Box::new(GitHubClient::new(base_url)),
        ProviderKind::Gitlab => Box::new(GitLabClient::new(base_url)),
    }
}

//! The MR/PR client abstraction (4.E): one trait, two host implementations
//! selected by [`repobox_core::ProviderKind`].

use repobox_core::error::MrError;

pub struct CreateMrRequest<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMrResponse {
    pub url: String,
}

#[async_trait::async_trait]
pub trait MrClient: Send + Sync {
    async fn create(&self, request: CreateMrRequest<'_>) -> Result<CreateMrResponse, MrError>;
}

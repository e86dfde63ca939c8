use repobox_core::error::MrError;
use repobox_core::mask::Masker;

use crate::client::{CreateMrRequest, CreateMrResponse, MrClient};
use crate::retry::RetryPolicy;

/// Auth scheme used in the `Authorization` header. GitHub accepts both;
/// `Bearer` is the default for new tokens, `Token` is kept for hosts
/// still issuing the legacy scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Token,
}

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    auth_scheme: AuthScheme,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_scheme: AuthScheme::Bearer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    #[cfg(test)]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn auth_header(&self, token: &str) -> String {
        match self.auth_scheme {
            AuthScheme::Bearer => format!("Bearer {token}"),
            AuthScheme::Token => format!("token {token}"),
        }
    }
}

#[async_trait::async_trait]
impl MrClient for GitHubClient {
    async fn create(&self, request: CreateMrRequest<'_>) -> Result<CreateMrResponse, MrError> {
        let url = format!(
            "{}/repos/{}/{}/pulls",
            self.base_url, request.owner, request.repo
        );
        let body = serde_json::json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
        });
        let masker = Masker::new(request.token);
        let auth = self.auth_header(request.token);

        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .header("Authorization", &auth)
                .header("User-Agent", "repobox")
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| MrError::Request(masker.mask(&e.to_string())))?;
                        let pr_url = parsed
                            .get("html_url")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        return Ok(CreateMrResponse { url: pr_url });
                    }
                    let status_code = status.as_u16();
                    if self.retry.should_retry(status_code, attempt) {
                        attempt += 1;
                        tokio::time::sleep(self.retry.calculate_delay(attempt)).await;
                        continue;
                    }
                    let raw = response.text().await.unwrap_or_default();
                    return Err(MrError::ApiFailure {
                        status: status_code,
                        masked_body: masker.mask(&raw),
                    });
                }
                Err(e) => {
                    return Err(MrError::Request(masker.mask(&e.to_string())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockServer;
    use std::time::Duration;

    #[tokio::test]
    async fn successful_create_parses_html_url() {
        let server = MockServer::start(vec![(
            201,
            r#"{"html_url": "https://github.com/acme/widgets/pull/42"}"#.to_string(),
        )])
        .await;
        let client = GitHubClient::new(server.base_url());
        let result = client
            .create(CreateMrRequest {
                owner: "acme",
                repo: "widgets",
                title: "t",
                body: "b",
                head: "repobox/abcd1234",
                base: "main",
                token: "ghp_supersecrettoken1234",
            })
            .await
            .expect("success");
        assert_eq!(result.url, "https://github.com/acme/widgets/pull/42");
    }

    #[tokio::test]
    async fn non_success_status_masks_token_in_body() {
        let server = MockServer::start(vec![(
            422,
            r#"{"message": "invalid head ref ghp_supersecrettoken1234"}"#.to_string(),
        )])
        .await;
        let client = GitHubClient::new(server.base_url());
        let err = client
            .create(CreateMrRequest {
                owner: "acme",
                repo: "widgets",
                title: "t",
                body: "b",
                head: "repobox/abcd1234",
                base: "main",
                token: "ghp_supersecrettoken1234",
            })
            .await
            .expect_err("should fail");
        match err {
            MrError::ApiFailure { status, masked_body } => {
                assert_eq!(status, 422);
                assert!(!masked_body.contains("supersecrettoken"));
            }
            other => panic!("expected ApiFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_server_error_then_succeeds() {
        let server = MockServer::start(vec![
            (503, "service unavailable".to_string()),
            (
                201,
                r#"{"html_url": "https://github.com/acme/widgets/pull/9"}"#.to_string(),
            ),
        ])
        .await;
        let client = GitHubClient::new(server.base_url())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            });
        let result = client
            .create(CreateMrRequest {
                owner: "acme",
                repo: "widgets",
                title: "t",
                body: "b",
                head: "repobox/abcd1234",
                base: "main",
                token: "tok",
            })
            .await
            .expect("eventually succeeds");
        assert_eq!(result.url, "https://github.com/acme/widgets/pull/9");
        assert_eq!(server.request_count(), 2);
    }

    #[tokio::test]
    async fn does_not_retry_client_error() {
        let server = MockServer::start(vec![(401, "unauthorized".to_string())]).await;
        let client = GitHubClient::new(server.base_url());
        let err = client
            .create(CreateMrRequest {
                owner: "acme",
                repo: "widgets",
                title: "t",
                body: "b",
                head: "repobox/abcd1234",
                base: "main",
                token: "tok",
            })
            .await
            .expect_err("should fail");
        assert!(matches!(err, MrError::ApiFailure { status: 401, .. }));
        assert_eq!(server.request_count(), 1);
    }
}

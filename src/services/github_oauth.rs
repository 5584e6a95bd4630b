//! GitHub OAuth client
//!
//! Builds the authorization redirect, exchanges callback codes for access
//! tokens and fetches the authenticated user's profile.

use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GitHubArgs;

/// Why an OAuth step failed
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth app is not configured")]
    NotConfigured,

    #[error("authorization code rejected: {0}")]
    CodeRejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Parse(String),
}

impl OAuthError {
    /// Short machine-readable kind, used in redirect query strings
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::CodeRejected(_) => "code_rejected",
            Self::Network(_) => "network",
            Self::Status(_) => "upstream_status",
            Self::Parse(_) => "malformed_response",
        }
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Access token granted by the code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
}

/// Authenticated GitHub user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitHubProfile {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Token endpoint body. GitHub answers 200 with an `error` field on failure.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_bundle(self) -> Result<TokenBundle, OAuthError> {
        match self.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(TokenBundle {
                access_token,
                token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
                scope: self.scope.unwrap_or_default(),
            }),
            _ => Err(OAuthError::CodeRejected(
                self.error_description
                    .or(self.error)
                    .unwrap_or_else(|| "no access token returned".to_string()),
            )),
        }
    }
}

/// OAuth collaborator of the connect flow
#[async_trait::async_trait]
pub trait OAuthService: Send + Sync {
    /// URL the user is redirected to; `state` round-trips to the callback
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError>;

    async fn exchange_code_for_token(&self, code: &str) -> Result<TokenBundle, OAuthError>;

    async fn get_user_profile(&self, access_token: &str) -> Result<GitHubProfile, OAuthError>;
}

/// GitHub OAuth app client
pub struct GitHubOAuthService {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: String,
    scope: String,
    oauth_url: String,
    api_url: String,
    http_client: reqwest::Client,
}

impl GitHubOAuthService {
    pub fn new(args: &GitHubArgs, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("checkin-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client_id: args.github_client_id.clone(),
            client_secret: args.github_client_secret.clone(),
            redirect_uri: args.github_redirect_uri.clone(),
            scope: args.github_scope.clone(),
            oauth_url: args.github_oauth_url.trim_end_matches('/').to_string(),
            api_url: args.github_api_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), OAuthError> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok((id.as_str(), secret.as_str())),
            _ => Err(OAuthError::NotConfigured),
        }
    }
}

#[async_trait::async_trait]
impl OAuthService for GitHubOAuthService {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let client_id = self.client_id.as_deref().ok_or(OAuthError::NotConfigured)?;
        Ok(format!(
            "{}/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            self.oauth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state),
        ))
    }

    async fn exchange_code_for_token(&self, code: &str) -> Result<TokenBundle, OAuthError> {
        let (client_id, client_secret) = self.credentials()?;

        let response = self
            .http_client
            .post(format!("{}/login/oauth/access_token", self.oauth_url))
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Token exchange rejected");
            return Err(OAuthError::Status(status.as_u16()));
        }

        let bundle = response.json::<TokenResponse>().await?.into_bundle()?;
        debug!(scope = %bundle.scope, "Exchanged authorization code");
        Ok(bundle)
    }

    async fn get_user_profile(&self, access_token: &str) -> Result<GitHubProfile, OAuthError> {
        let response = self
            .http_client
            .get(format!("{}/user", self.api_url))
            .header(ACCEPT, "application/vnd.github+json")
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(client_id: Option<&str>) -> GitHubArgs {
        GitHubArgs {
            github_client_id: client_id.map(str::to_string),
            github_client_secret: client_id.map(|_| "secret".to_string()),
            github_redirect_uri: "http://localhost:8080/agent/github/callback".to_string(),
            github_scope: "read:user".to_string(),
            github_oauth_url: "https://github.com/".to_string(),
            github_api_url: "https://api.github.com".to_string(),
        }
    }

    #[test]
    fn test_authorization_url_carries_state() {
        let service = GitHubOAuthService::new(&args(Some("Iv1.abc")), Duration::from_secs(5));
        let url = service.authorization_url("0xA1").unwrap();

        assert!(url.starts_with("https://github.com/login/oauth/authorize?client_id=Iv1.abc"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fagent%2Fgithub%2Fcallback"));
        assert!(url.contains("scope=read%3Auser"));
        assert!(url.ends_with("&state=0xA1"));
    }

    #[test]
    fn test_unconfigured_app_cannot_authorize() {
        let service = GitHubOAuthService::new(&args(None), Duration::from_secs(5));
        let err = service.authorization_url("0xA1").unwrap_err();
        assert_eq!(err.kind(), "not_configured");
    }

    #[tokio::test]
    async fn test_unconfigured_app_cannot_exchange() {
        let service = GitHubOAuthService::new(&args(None), Duration::from_secs(5));
        let err = service.exchange_code_for_token("code").await.unwrap_err();
        assert!(matches!(err, OAuthError::NotConfigured));
    }

    #[test]
    fn test_token_response_error_field_is_rejection() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"error":"bad_verification_code","error_description":"The code passed is incorrect or expired."}"#,
        )
        .unwrap();
        let err = body.into_bundle().unwrap_err();
        assert_eq!(err.kind(), "code_rejected");
        assert!(err.to_string().contains("incorrect or expired"));
    }

    #[test]
    fn test_token_response_success() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"access_token":"gho_abc","token_type":"bearer","scope":"read:user"}"#,
        )
        .unwrap();
        let bundle = body.into_bundle().unwrap();
        assert_eq!(bundle.access_token, "gho_abc");
        assert_eq!(bundle.scope, "read:user");
    }
}

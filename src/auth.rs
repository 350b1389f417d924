use std::fmt;

use anyhow::{Context, Result};
use reqwest::{Certificate, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::VaultSettings;
use crate::request::ValidationError;

/// Application identity exchanged for a token. Never persisted.
#[derive(Clone, Serialize)]
pub struct Identity {
    app_id: String,
    user_id: String,
}

impl Identity {
    /// # Errors
    /// Returns an error naming the empty field.
    pub fn new(app_id: &str, user_id: &str) -> Result<Self, ValidationError> {
        if app_id.trim().is_empty() {
            return Err(ValidationError::Empty("app_id"));
        }
        if user_id.trim().is_empty() {
            return Err(ValidationError::Empty("user_id"));
        }
        Ok(Self {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
        })
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("app_id", &self.app_id)
            .field("user_id", &"****")
            .finish()
    }
}

/// Bearer token returned by a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", mask_value(&self.0))
    }
}

/// Why a login produced no token. Every variant means "denied".
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("secret store unreachable: {0}")]
    Transport(String),
    #[error("secret store rejected login with status {status}")]
    Rejected { status: StatusCode },
    #[error("login response is not valid JSON: {0}")]
    MalformedBody(String),
    #[error("login response has no auth.client_token")]
    MissingToken,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    client_token: Option<String>,
}

/// Performs the identity-exchange handshake against the secret store.
#[derive(Debug, Clone)]
pub struct AuthTokenClient {
    base_url: String,
    backend: String,
    client: Client,
}

impl AuthTokenClient {
    /// Builds a client from `[vault]` settings.
    ///
    /// # Errors
    /// Returns an error if the CA bundle cannot be read or the HTTP client
    /// cannot be built.
    pub fn new(settings: &VaultSettings) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout());
        if let Some(path) = &settings.ca_bundle_path {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read CA bundle {}", path.display()))?;
            let certs = Certificate::from_pem_bundle(&pem)
                .with_context(|| format!("Failed to parse CA bundle {}", path.display()))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        if settings.insecure_skip_verify {
            warn!("TLS verification for the secret store is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .context("Failed to build secret store HTTP client")?;
        Ok(Self {
            base_url: settings.addr.trim().trim_end_matches('/').to_string(),
            backend: settings.auth_backend.trim().to_string(),
            client,
        })
    }

    /// Exchanges `identity` for a token. Single attempt, no retries.
    ///
    /// # Errors
    /// Returns an [`AuthFailure`] describing why no token was obtained.
    pub async fn fetch_token(&self, identity: &Identity) -> Result<Token, AuthFailure> {
        let url = self.login_url();
        debug!("Logging in to {url} as app_id '{}'", identity.app_id());
        let response = self
            .client
            .post(&url)
            .json(identity)
            .send()
            .await
            .map_err(|err| AuthFailure::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthFailure::Rejected { status });
        }
        let text = response
            .text()
            .await
            .map_err(|err| AuthFailure::Transport(err.to_string()))?;
        parse_login_body(&text)
    }

    /// Fail-closed variant: any failure is logged and becomes `None`.
    pub async fn fetch_token_opt(&self, identity: &Identity) -> Option<Token> {
        match self.fetch_token(identity).await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!("No token for app_id '{}': {err}", identity.app_id());
                None
            }
        }
    }

    fn login_url(&self) -> String {
        format!("{}/v1/auth/{}/login", self.base_url, self.backend)
    }
}

fn parse_login_body(text: &str) -> Result<Token, AuthFailure> {
    let parsed: LoginResponse =
        serde_json::from_str(text).map_err(|err| AuthFailure::MalformedBody(err.to_string()))?;
    parsed
        .auth
        .and_then(|auth| auth.client_token)
        .map(Token)
        .ok_or(AuthFailure::MissingToken)
}

fn mask_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= 4 || !trimmed.is_ascii() {
        "****".to_string()
    } else {
        format!("****{}", &trimmed[trimmed.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_body_returns_token() {
        let token = parse_login_body(r#"{"auth":{"client_token":"T"}}"#).unwrap();
        assert_eq!(token.expose(), "T");
    }

    #[test]
    fn test_parse_login_body_missing_client_token() {
        let err = parse_login_body(r#"{"auth":{}}"#).unwrap_err();
        assert!(matches!(err, AuthFailure::MissingToken));
    }

    #[test]
    fn test_parse_login_body_missing_auth() {
        let err = parse_login_body("{}").unwrap_err();
        assert!(matches!(err, AuthFailure::MissingToken));
        let err = parse_login_body(r#"{"auth":null}"#).unwrap_err();
        assert!(matches!(err, AuthFailure::MissingToken));
    }

    #[test]
    fn test_parse_login_body_rejects_non_json() {
        let err = parse_login_body("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, AuthFailure::MalformedBody(_)));
    }

    #[test]
    fn test_parse_login_body_rejects_non_string_token() {
        let err = parse_login_body(r#"{"auth":{"client_token":42}}"#).unwrap_err();
        assert!(matches!(err, AuthFailure::MalformedBody(_)));
    }

    #[test]
    fn test_identity_rejects_empty_fields() {
        assert_eq!(
            Identity::new("", "user").unwrap_err(),
            ValidationError::Empty("app_id")
        );
        assert_eq!(
            Identity::new("app", " ").unwrap_err(),
            ValidationError::Empty("user_id")
        );
    }

    #[test]
    fn test_token_debug_is_masked() {
        let token = Token("s.abcdefgh1234".to_string());
        assert_eq!(format!("{token:?}"), "Token(****1234)");
        assert_eq!(format!("{:?}", Token("abc".to_string())), "Token(****)");
    }

    #[test]
    fn test_identity_debug_hides_user_id() {
        let identity = Identity::new("puppet", "secret-user").unwrap();
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("puppet"));
        assert!(!rendered.contains("secret-user"));
    }
}

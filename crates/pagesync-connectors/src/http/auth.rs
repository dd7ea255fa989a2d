//! Credentials for the HTTP source: a static bearer token or an OAuth2
//! password grant whose token is cached until shortly before it expires.

use chrono::{DateTime, Duration, Utc};
use pagesync_types::error::ConnectorError;
use pagesync_types::protocol::Secrets;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before the server-reported expiry.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Lifetime assumed when the token response carries no `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// How the source authenticates, resolved from the request secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    PasswordGrant {
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::PasswordGrant { client_id, username, .. } => f
                .debug_struct("PasswordGrant")
                .field("client_id", client_id)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// `access_token` wins; otherwise all four password-grant keys are
    /// required.
    ///
    /// # Errors
    ///
    /// Returns an `auth` error naming the missing keys.
    pub fn from_secrets(secrets: &Secrets) -> Result<Self, ConnectorError> {
        if let Some(token) = secrets.get_str("access_token").filter(|t| !t.is_empty()) {
            return Ok(Self::Bearer(token));
        }

        let keys = ["client_id", "client_secret", "username", "password"];
        let values: Vec<Option<String>> = keys.iter().map(|k| secrets.get_str(k)).collect();
        let missing: Vec<&str> = keys
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(ConnectorError::auth(
                "MISSING_CREDENTIALS",
                format!(
                    "secrets must contain 'access_token' or {}; missing: {}",
                    keys.join(", "),
                    missing.join(", ")
                ),
            ));
        }

        let mut values = values.into_iter().flatten();
        let mut next = || values.next().unwrap_or_default();
        Ok(Self::PasswordGrant {
            client_id: next(),
            client_secret: next(),
            username: next(),
            password: next(),
        })
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            Self::Bearer(_) => None,
            Self::PasswordGrant { client_id, username, .. } => Some(format!("{client_id}:{username}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    key: String,
    header: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Password-grant token cache shared by every request of one source.
#[derive(Debug)]
pub struct TokenCache {
    token_url: String,
    user_agent: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    #[must_use]
    pub fn new(token_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            user_agent: user_agent.into(),
            cached: Mutex::new(None),
        }
    }

    /// `Authorization` header value for `credentials`.
    ///
    /// # Errors
    ///
    /// Returns an `auth` error if the token endpoint refuses the grant,
    /// or a `transient_network` error if it cannot be reached.
    pub async fn authorization(
        &self,
        client: &reqwest::Client,
        credentials: &Credentials,
    ) -> Result<String, ConnectorError> {
        let (client_id, client_secret, username, password) = match credentials {
            Credentials::Bearer(token) => return Ok(format!("Bearer {token}")),
            Credentials::PasswordGrant {
                client_id,
                client_secret,
                username,
                password,
            } => (client_id, client_secret, username, password),
        };
        let key = credentials.cache_key().unwrap_or_default();

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.key == key && token.is_fresh(Utc::now()) {
                return Ok(token.header.clone());
            }
        }

        tracing::info!(token_url = %self.token_url, "Requesting OAuth access token");
        let response = client
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                ConnectorError::transient_network("TOKEN_REQUEST_FAILED", format!("token request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::auth(
                "TOKEN_REQUEST_REJECTED",
                format!("token endpoint returned {status}"),
            ));
        }
        let body: TokenResponse = response.json().await.map_err(|e| {
            ConnectorError::auth("INVALID_TOKEN_RESPONSE", format!("token response unreadable: {e}"))
        })?;
        if body.access_token.is_empty() {
            return Err(ConnectorError::auth(
                "INVALID_TOKEN_RESPONSE",
                "token response carried an empty access_token",
            ));
        }

        let token = CachedToken {
            key,
            header: format!("Bearer {}", body.access_token),
            expires_at: Utc::now() + Duration::seconds(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
        };
        tracing::info!(expires_at = %token.expires_at, "OAuth access token acquired");
        let header = token.header.clone();
        *cached = Some(token);
        Ok(header)
    }

    /// Drop the cached token so the next request fetches a new one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

//! Paginated HTTP/JSON page source.
//!
//! Each resource maps to `GET {base_url}/{endpoint}` with a page-size
//! query parameter and, after the first page, a continuation parameter
//! carrying the previous page's token. The defaults match listing
//! responses of the shape `{"data": {"children": [{"data": {...}}], "after": "t3_x"}}`.

pub mod auth;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;
use pagesync_engine::{Page, PageRequest, PageSource, RequestContext};
use pagesync_types::error::ConnectorError;
use pagesync_types::record::RawRecord;
use pagesync_types::schema::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use auth::{Credentials, TokenCache};
pub use status::{classify_status, classify_transport};

/// Source settings, read from the `source:` block of the connector config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// JSON pointer to the array of records in a response body.
    #[serde(default = "default_records_pointer")]
    pub records_pointer: String,
    /// JSON pointer applied to each array element; empty keeps the element.
    #[serde(default = "default_item_pointer")]
    pub item_pointer: String,
    /// JSON pointer to the continuation token; absent or null ends paging.
    #[serde(default = "default_next_pointer")]
    pub next_pointer: String,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,
    /// Endpoint hit by the connection test instead of the first resource.
    #[serde(default)]
    pub probe_path: Option<String>,
}

fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_token_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}
fn default_user_agent() -> String {
    format!("pagesync/{}", env!("CARGO_PKG_VERSION"))
}
fn default_records_pointer() -> String {
    "/data/children".to_string()
}
fn default_item_pointer() -> String {
    "/data".to_string()
}
fn default_next_pointer() -> String {
    "/data/after".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
fn default_cursor_param() -> String {
    "after".to_string()
}

impl HttpSourceConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            token_url: default_token_url(),
            user_agent: default_user_agent(),
            records_pointer: default_records_pointer(),
            item_pointer: default_item_pointer(),
            next_pointer: default_next_pointer(),
            limit_param: default_limit_param(),
            cursor_param: default_cursor_param(),
            probe_path: None,
        }
    }

    /// Parse the `source:` block of a connector config.
    ///
    /// # Errors
    ///
    /// Returns an error if required settings are missing or mistyped.
    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Invalid source settings: {e}"))?;
        if config.base_url.trim().is_empty() {
            anyhow::bail!("Invalid source settings: base_url must not be empty");
        }
        if config.page_size == 0 {
            anyhow::bail!("Invalid source settings: page_size must be at least 1");
        }
        Ok(config)
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// [`PageSource`] over a JSON HTTP API.
#[derive(Debug)]
pub struct HttpPageSource {
    config: HttpSourceConfig,
    client: reqwest::Client,
    tokens: TokenCache,
}

impl HttpPageSource {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: HttpSourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        let tokens = TokenCache::new(config.token_url.clone(), config.user_agent.clone());
        Ok(Self { config, client, tokens })
    }

    #[must_use]
    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    async fn get_json(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ConnectorError> {
        let credentials = Credentials::from_secrets(&ctx.secrets)?;
        let authorization = self.tokens.authorization(&self.client, &credentials).await?;
        let url = self.config.url_for(path);

        tracing::debug!(url = %url, query = ?query, "GET");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            return Err(classify_status(status, &headers, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ConnectorError::schema("INVALID_RESPONSE_BODY", format!("{url}: response is not JSON: {e}"))
        })
    }

    /// Split a response body into records and the continuation token.
    ///
    /// # Errors
    ///
    /// Returns a `schema` error if the body does not have the configured shape.
    pub fn parse_page(&self, body: &Value) -> Result<Page, ConnectorError> {
        let items = body
            .pointer(&self.config.records_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ConnectorError::schema(
                    "UNEXPECTED_RESPONSE_SHAPE",
                    format!("no array at '{}' in response", self.config.records_pointer),
                )
            })?;

        let mut records: Vec<RawRecord> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let record = if self.config.item_pointer.is_empty() {
                Some(item)
            } else {
                item.pointer(&self.config.item_pointer)
            };
            match record {
                Some(Value::Object(map)) => records.push(map.clone()),
                _ => {
                    return Err(ConnectorError::schema(
                        "UNEXPECTED_RESPONSE_SHAPE",
                        format!(
                            "element {i} at '{}' has no object at '{}'",
                            self.config.records_pointer, self.config.item_pointer
                        ),
                    ))
                }
            }
        }

        let next = match body.pointer(&self.config.next_pointer) {
            Some(Value::String(token)) if !token.is_empty() => Some(token.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Ok(match next {
            Some(token) => Page::more(records, token),
            None => Page::last(records, None),
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn next_page(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        request: &PageRequest,
    ) -> Result<Page, ConnectorError> {
        let mut query = vec![(self.config.limit_param.as_str(), self.config.page_size.to_string())];
        if let Some(token) = &request.page_token {
            query.push((self.config.cursor_param.as_str(), token.clone()));
        }
        let body = self.get_json(ctx, resource.endpoint(), &query).await?;
        let page = self.parse_page(&body)?;
        tracing::debug!(
            resource = resource.name(),
            records = page.records.len(),
            has_more = page.has_more,
            "Page received"
        );
        Ok(page)
    }

    async fn probe(&self, ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError> {
        match &self.config.probe_path {
            Some(path) => self.get_json(ctx, path, &[]).await.map(|_| ()),
            None => {
                let query = [(self.config.limit_param.as_str(), "1".to_string())];
                let body = self.get_json(ctx, resource.endpoint(), &query).await?;
                self.parse_page(&body).map(|_| ())
            }
        }
    }
}

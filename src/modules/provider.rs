use std::future::Future;
use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::modules::query::{SearchQuery, Searchable};
use crate::modules::types::{Candidate, Record};

pub const DEFAULT_PROVIDER_URL: &str = "https://www.omdbapi.com/";
const DEFAULT_USER_AGENT: &str = "movie-admin/0.1";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider answered {0}: {1}")]
    Status(u16, String),
    #[error("provider has no match: {0}")]
    NotFound(String),
    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unreadable provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read-only movie metadata source.
pub trait MetadataProvider: Send + Sync {
    /// Identifier queries yield at most one candidate; title queries yield the
    /// provider's match list. No match is an empty list, not an error.
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<Candidate>, ProviderError>> + Send;

    fn lookup_id(&self, imdb_id: &str) -> impl Future<Output = Result<Record, ProviderError>> + Send;
}

impl<P: MetadataProvider> MetadataProvider for std::sync::Arc<P> {
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<Candidate>, ProviderError>> + Send {
        (**self).search(query)
    }

    fn lookup_id(&self, imdb_id: &str) -> impl Future<Output = Result<Record, ProviderError>> + Send {
        (**self).lookup_id(imdb_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl ProviderConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TitleSearchResponse {
    #[serde(rename = "Search", default)]
    search: Vec<Candidate>,
}

/// OMDb flags misses in-band with `"Response": "False"` and an `Error` text.
fn provider_miss(body: &Value) -> Option<String> {
    if body.get("Response").and_then(Value::as_str) == Some("False") {
        let message = body
            .get("Error")
            .and_then(Value::as_str)
            .unwrap_or("no match");
        Some(message.to_string())
    } else {
        None
    }
}

pub struct OmdbProvider {
    config: ProviderConfig,
    client: Client,
}

impl OmdbProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn url_for(&self, pairs: &[(&'static str, String)]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.url)?;
        url.query_pairs_mut().append_pair("apikey", &self.config.api_key);
        for (key, value) in pairs {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn get_json(&self, pairs: Vec<(&'static str, String)>) -> Result<Value, ProviderError> {
        let url = self.url_for(&pairs)?;
        debug!("Provider lookup {pairs:?}");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16(), body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl MetadataProvider for OmdbProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>, ProviderError> {
        let body = self.get_json(query.to_query_pairs()).await?;
        if let Some(message) = provider_miss(&body) {
            debug!("No provider match for {query}: {message}");
            return Ok(Vec::new());
        }

        match query {
            SearchQuery::ImdbId(_) => {
                let record: Record = serde_json::from_value(body)?;
                Ok(record.to_candidate().into_iter().collect())
            }
            SearchQuery::Title(_) => {
                let found: TitleSearchResponse = serde_json::from_value(body)?;
                Ok(found.search)
            }
        }
    }

    async fn lookup_id(&self, imdb_id: &str) -> Result<Record, ProviderError> {
        let body = self.get_json(vec![("i", imdb_id.to_string())]).await?;
        if let Some(message) = provider_miss(&body) {
            return Err(ProviderError::NotFound(message));
        }
        Ok(serde_json::from_value(body)?)
    }
}

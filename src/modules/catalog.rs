use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::debug;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::modules::provider::{default_timeout_secs, default_user_agent};
use crate::modules::types::Record;

const LOOKUP_PATH: &str = "movie/get/imdbid";
const ADD_PATH: &str = "movie/add";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success answer; carries the response body so callers can show it.
    #[error("catalog answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid catalog url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid credential: {0}")]
    Credential(#[from] reqwest::header::InvalidHeaderValue),
    #[error("unreadable catalog response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Token sent verbatim as the `Authorization` header of catalog requests.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(Option<String>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// No token: requests go out without an `Authorization` header.
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn from_option(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    fn headers(&self) -> Result<HeaderMap, CatalogError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.0 {
            let mut value = HeaderValue::from_str(token)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Credential(***)"),
            None => f.write_str("Credential(none)"),
        }
    }
}

/// Backend store of published movie records.
pub trait Catalog: Send + Sync {
    fn find_by_imdb_id(
        &self,
        imdb_id: &str,
    ) -> impl Future<Output = Result<Vec<Record>, CatalogError>> + Send;

    /// Returns the catalog's confirmation body.
    fn add(&self, record: &Record) -> impl Future<Output = Result<Value, CatalogError>> + Send;
}

impl<C: Catalog> Catalog for std::sync::Arc<C> {
    fn find_by_imdb_id(
        &self,
        imdb_id: &str,
    ) -> impl Future<Output = Result<Vec<Record>, CatalogError>> + Send {
        (**self).find_by_imdb_id(imdb_id)
    }

    fn add(&self, record: &Record) -> impl Future<Output = Result<Value, CatalogError>> + Send {
        (**self).add(record)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl CatalogConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

pub struct HttpCatalog {
    base: Url,
    credential: Credential,
    client: Client,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig, credential: Credential) -> Result<Self, CatalogError> {
        // A base without a trailing slash would lose its last segment on join.
        let mut base = config.url.trim_end_matches('/').to_string();
        base.push('/');
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base: Url::parse(&base)?,
            credential,
            client,
        })
    }

    fn lookup_url(&self, imdb_id: &str) -> Result<Url, CatalogError> {
        let mut url = self.base.join(LOOKUP_PATH)?;
        url.query_pairs_mut().append_pair("imdbID", imdb_id);
        Ok(url)
    }

    fn add_url(&self) -> Result<Url, CatalogError> {
        Ok(self.base.join(ADD_PATH)?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, CatalogError> {
        let response = request.headers(self.credential.headers()?).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CatalogError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl Catalog for HttpCatalog {
    async fn find_by_imdb_id(&self, imdb_id: &str) -> Result<Vec<Record>, CatalogError> {
        let url = self.lookup_url(imdb_id)?;
        debug!("Catalog lookup {url}");
        let body = self.send(self.client.get(url)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn add(&self, record: &Record) -> Result<Value, CatalogError> {
        let url = self.add_url()?;
        debug!("Catalog add {record} -> {url}");
        let body = self.send(self.client.post(url).json(record)).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        // Some backends confirm with plain text instead of JSON.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

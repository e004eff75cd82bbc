use serde::{Deserialize, Serialize};
use std::env;
use std::error::Error;
use std::fs;
use crate::modules::catalog::{CatalogConfig, Credential, HttpCatalog};
use crate::modules::coordinator::Coordinator;
use crate::modules::navigation::{DEFAULT_LISTING_PATH, Navigator};
use crate::modules::provider::{OmdbProvider, ProviderConfig};

/// Environment variable consulted for the catalog token when none is given explicitly.
pub const TOKEN_ENV: &str = "MOVIE_ADMIN_TOKEN";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
    pub provider: ProviderConfig,
    pub catalog: CatalogConfig,
}

fn default_listing_path() -> String {
    DEFAULT_LISTING_PATH.to_string()
}

impl AdminConfig {
    pub fn new(provider: ProviderConfig, catalog: CatalogConfig) -> Self {
        Self {
            listing_path: default_listing_path(),
            provider,
            catalog,
        }
    }
}

pub type HttpCoordinator<N> = Coordinator<OmdbProvider, HttpCatalog, N>;

pub fn load_config(path: &str) -> Result<AdminConfig, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let config: AdminConfig = toml::from_str(&text)?;
    Ok(config)
}

pub fn save_config(path: &str, config: &AdminConfig) -> Result<(), Box<dyn Error>> {
    let toml_str = toml::to_string_pretty(config)?;
    fs::write(path, toml_str)?;
    Ok(())
}

/// Explicit token first, then the environment, then the config file.
pub fn resolve_credential(config: &AdminConfig, explicit: Option<String>) -> Credential {
    let token = explicit
        .filter(|t| !t.is_empty())
        .or_else(|| env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()))
        .or_else(|| config.catalog.token.clone());
    Credential::from_option(token)
}

pub fn build_coordinator<N: Navigator>(
    config: &AdminConfig,
    credential: Credential,
    navigator: N,
) -> Result<HttpCoordinator<N>, Box<dyn Error>> {
    let provider = OmdbProvider::new(config.provider.clone())?;
    let catalog = HttpCatalog::new(&config.catalog, credential)?;
    Ok(Coordinator::new(provider, catalog, navigator).with_listing_path(config.listing_path.clone()))
}

use serde::{Deserialize, Serialize};
use std::env;
use config::{Config, ConfigError, File, Environment};

// --- Constants for Default Configuration ---
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8201";

pub const DEFAULT_AUTH_MAPPING_URL: &str = "http://arborist-service/auth/mapping";
pub const DEFAULT_AUTH_SERVICE_NAME: &str = "peregrine";
pub const DEFAULT_AUTH_SCOPE_TTL_SECS: u64 = 3600;
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_AUTH_RESOURCE_FIELD: &str = "auth_resource_path";

pub const DEFAULT_QUERY_LIMIT: u64 = 100;
pub const DEFAULT_QUERY_OFFSET: u64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub http_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authorization service endpoint returning `{resourcePath: [permission]}`.
    pub mapping_url: String,
    /// Service name accepted in permission entries, besides `*`.
    pub service_name: String,
    pub scope_ttl_secs: u64,
    pub request_timeout_secs: u64,
    /// Vertex property holding the resource path used for accessibility filtering.
    pub resource_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_limit: u64,
    pub default_offset: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file of graph dumps loaded into the in-memory store at startup.
    #[serde(default)]
    pub seed_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub query: QueryConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.into(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mapping_url: DEFAULT_AUTH_MAPPING_URL.into(),
            service_name: DEFAULT_AUTH_SERVICE_NAME.into(),
            scope_ttl_secs: DEFAULT_AUTH_SCOPE_TTL_SECS,
            request_timeout_secs: DEFAULT_AUTH_REQUEST_TIMEOUT_SECS,
            resource_field: DEFAULT_AUTH_RESOURCE_FIELD.into(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
            default_offset: DEFAULT_QUERY_OFFSET,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            query: QueryConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Layered load: defaults, then `<file>.toml` (optional), then
    /// `PEREGRINE_<SECTION>__<KEY>` environment variables.
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Default settings
            .set_default("server.http_addr", DEFAULT_HTTP_ADDR)?
            .set_default("auth.mapping_url", DEFAULT_AUTH_MAPPING_URL)?
            .set_default("auth.service_name", DEFAULT_AUTH_SERVICE_NAME)?
            .set_default("auth.scope_ttl_secs", DEFAULT_AUTH_SCOPE_TTL_SECS)?
            .set_default("auth.request_timeout_secs", DEFAULT_AUTH_REQUEST_TIMEOUT_SECS)?
            .set_default("auth.resource_field", DEFAULT_AUTH_RESOURCE_FIELD)?
            .set_default("query.default_limit", DEFAULT_QUERY_LIMIT)?
            .set_default("query.default_offset", DEFAULT_QUERY_OFFSET)?

            // File: config.toml
            .add_source(File::with_name(file).required(false))

            // Environment: PEREGRINE_AUTH__MAPPING_URL=... -> auth.mapping_url
            .add_source(Environment::with_prefix("PEREGRINE").prefix_separator("_").separator("__"))

            // Legacy ENV overrides
            .set_override_option("auth.mapping_url", env::var("AUTH_MAPPING_URL").ok())?
            .set_override_option("server.http_addr", env::var("HTTP_ADDR").ok())?

            .build()?;

        s.try_deserialize()
    }

    pub fn scope_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auth.scope_ttl_secs)
    }

    pub fn auth_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auth.request_timeout_secs)
    }
}

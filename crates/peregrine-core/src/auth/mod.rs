pub mod cache;
pub mod http;

pub use cache::{AuthScopeCache, ScopeState};
pub use http::HttpAuthorizationService;

use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

pub const WILDCARD: &str = "*";
pub const READ_METHOD: &str = "read";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
}

impl Permission {
    pub fn grants_read(&self, service_name: &str) -> bool {
        (self.service == WILDCARD || self.service == service_name)
            && (self.method == WILDCARD || self.method == READ_METHOD)
    }
}

/// Resource path to the permissions a caller holds on it.
pub type ResourceMapping = HashMap<String, Vec<Permission>>;

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn resource_mapping(&self, credential: &str) -> Result<ResourceMapping, AuthError>;
}

/// Paths on which at least one permission grants read, sorted.
pub fn readable_resources(mapping: &ResourceMapping, service_name: &str) -> Vec<String> {
    mapping
        .iter()
        .filter(|(_, permissions)| permissions.iter().any(|p| p.grants_read(service_name)))
        .map(|(path, _)| path.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

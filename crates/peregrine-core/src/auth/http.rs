use super::{AuthorizationService, ResourceMapping};
use crate::error::AuthError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Fetches the caller's resource mapping from the authorization service.
pub struct HttpAuthorizationService {
    client: Client,
    mapping_url: String,
}

impl HttpAuthorizationService {
    pub fn new(mapping_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { client, mapping_url }
    }
}

#[async_trait]
impl AuthorizationService for HttpAuthorizationService {
    async fn resource_mapping(&self, credential: &str) -> Result<ResourceMapping, AuthError> {
        let res = self
            .client
            .get(&self.mapping_url)
            .header("Authorization", credential)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mapping: ResourceMapping = serde_json::from_str(&body)?;
        Ok(mapping)
    }
}

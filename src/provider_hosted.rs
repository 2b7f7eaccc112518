//! Hosted document suite adapter.
//!
//! Talks to a hosted-docs REST API with bearer authentication. The document
//! UUID round-trips through a custom property named `hermes-uuid`. Listing
//! paginates with an opaque `page_token` until the server stops returning
//! one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::ProviderKind;
use crate::provider::{
    ProviderDocument, ProviderListing, WorkspaceProvider, UUID_METADATA_KEY,
};

#[derive(Debug, Deserialize, Clone)]
pub struct HostedDocsConfig {
    pub base_url: String,
    pub collection_id: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Environment variable consulted when `api_token` is absent.
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Rendering artifacts this suite injects into exported content.
    #[serde(default)]
    pub rendering_artifacts: Vec<String>,
}

fn default_token_env() -> String {
    "HERMES_HOSTED_TOKEN".to_string()
}
fn default_timeout() -> u64 {
    30
}

pub struct HostedDocsProvider {
    config: HostedDocsConfig,
    token: String,
    client: reqwest::Client,
}

impl HostedDocsProvider {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: HostedDocsConfig = serde_json::from_value(config.clone()).map_err(|e| {
            HermesError::PermanentBackend(format!("bad hosted-docs provider config: {}", e))
        })?;
        Self::new(config)
    }

    pub fn new(config: HostedDocsConfig) -> Result<Self> {
        let token = match &config.api_token {
            Some(token) => token.clone(),
            None => std::env::var(&config.api_token_env).map_err(|_| {
                HermesError::PermanentBackend(format!(
                    "hosted-docs token not configured and {} not set",
                    config.api_token_env
                ))
            })?,
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HermesError::PermanentBackend(format!("http client: {}", e)))?;

        Ok(Self {
            config,
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            Err(HermesError::NotFound(format!("hosted-docs: {}", body)))
        } else if status.as_u16() == 429 || status.is_server_error() {
            Err(HermesError::TransientBackend(format!(
                "hosted-docs {}: {}",
                status, body
            )))
        } else {
            Err(HermesError::PermanentBackend(format!(
                "hosted-docs {}: {}",
                status, body
            )))
        }
    }
}

#[derive(Deserialize)]
struct ListPage {
    documents: Vec<ListedDoc>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListedDoc {
    id: String,
    #[serde(default)]
    title: String,
    modified_time: DateTime<Utc>,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Deserialize)]
struct ReadDoc {
    content: String,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Deserialize)]
struct CreatedDoc {
    id: String,
}

#[async_trait]
impl WorkspaceProvider for HostedDocsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HostedDocs
    }

    fn rendering_artifacts(&self) -> &[String] {
        &self.config.rendering_artifacts
    }

    async fn list(&self) -> Result<Vec<ProviderListing>> {
        let mut listings = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.url(&format!(
                    "/api/collections/{}/documents",
                    self.config.collection_id
                )))
                .bearer_auth(&self.token);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| HermesError::TransientBackend(format!("hosted-docs list: {}", e)))?;
            let page: ListPage = self
                .check(response)
                .await?
                .json()
                .await
                .map_err(|e| HermesError::TransientBackend(format!("hosted-docs list body: {}", e)))?;

            for doc in page.documents {
                let declared_uuid = doc
                    .properties
                    .get(UUID_METADATA_KEY)
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                listings.push(ProviderListing {
                    provider_document_id: doc.id,
                    title: doc.title,
                    modified_time: doc.modified_time,
                    declared_uuid,
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(listings)
    }

    async fn read(&self, provider_document_id: &str) -> Result<ProviderDocument> {
        let response = self
            .client
            .get(self.url(&format!("/api/documents/{}", provider_document_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("hosted-docs read: {}", e)))?;
        let doc: ReadDoc = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("hosted-docs read body: {}", e)))?;
        Ok(ProviderDocument {
            content: doc.content,
            metadata: doc.properties,
        })
    }

    async fn write(
        &self,
        provider_document_id: Option<&str>,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        match provider_document_id {
            Some(id) => {
                let response = self
                    .client
                    .put(self.url(&format!("/api/documents/{}", id)))
                    .bearer_auth(&self.token)
                    .json(&serde_json::json!({
                        "content": content,
                        "properties": metadata,
                    }))
                    .send()
                    .await
                    .map_err(|e| {
                        HermesError::TransientBackend(format!("hosted-docs write: {}", e))
                    })?;
                self.check(response).await?;
                Ok(id.to_string())
            }
            None => {
                let response = self
                    .client
                    .post(self.url(&format!(
                        "/api/collections/{}/documents",
                        self.config.collection_id
                    )))
                    .bearer_auth(&self.token)
                    .json(&serde_json::json!({
                        "content": content,
                        "properties": metadata,
                    }))
                    .send()
                    .await
                    .map_err(|e| {
                        HermesError::TransientBackend(format!("hosted-docs create: {}", e))
                    })?;
                let created: CreatedDoc = self.check(response).await?.json().await.map_err(|e| {
                    HermesError::TransientBackend(format!("hosted-docs create body: {}", e))
                })?;
                Ok(created.id)
            }
        }
    }

    async fn update_metadata(
        &self,
        provider_document_id: &str,
        kv: &serde_json::Value,
    ) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!(
                "/api/documents/{}/properties",
                provider_document_id
            )))
            .bearer_auth(&self.token)
            .json(kv)
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("hosted-docs patch: {}", e)))?;
        self.check(response).await?;
        Ok(())
    }

    async fn delete(&self, provider_document_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/documents/{}", provider_document_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("hosted-docs delete: {}", e)))?;
        self.check(response).await?;
        Ok(())
    }
}

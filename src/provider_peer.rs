//! Peer instance adapter.
//!
//! Treats another Hermes deployment as a workspace: listing and reading go
//! through the peer's public read API, while writes and deletes submit
//! envelopes to the peer's admission API under an indexer identity issued
//! by that peer. The provider document id on a peer is the peer-side
//! document UUID, which doubles as the declared UUID, so federated
//! documents keep one global identity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::{
    DocumentEnvelope, EnvelopeAction, EnvelopeDocument, ProviderKind, SubmitRequest,
    SubmitResponse,
};
use crate::normalize;
use crate::provider::{ProviderDocument, ProviderListing, WorkspaceProvider};

#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    pub base_url: String,
    /// Project id on the peer instance.
    pub project_id: String,
    /// Indexer identity issued by the peer, used for writes.
    #[serde(default)]
    pub indexer_uuid: Option<Uuid>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "HERMES_PEER_TOKEN".to_string()
}
fn default_timeout() -> u64 {
    30
}

pub struct PeerProvider {
    config: PeerConfig,
    token: String,
    client: reqwest::Client,
}

impl PeerProvider {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: PeerConfig = serde_json::from_value(config.clone()).map_err(|e| {
            HermesError::PermanentBackend(format!("bad peer provider config: {}", e))
        })?;
        Self::new(config)
    }

    pub fn new(config: PeerConfig) -> Result<Self> {
        let token = match &config.api_token {
            Some(token) => token.clone(),
            None => std::env::var(&config.api_token_env).map_err(|_| {
                HermesError::PermanentBackend(format!(
                    "peer token not configured and {} not set",
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
        match status.as_u16() {
            404 => Err(HermesError::NotFound(format!("peer: {}", body))),
            429 | 500..=599 => Err(HermesError::TransientBackend(format!(
                "peer {}: {}",
                status, body
            ))),
            _ => Err(HermesError::PermanentBackend(format!(
                "peer {}: {}",
                status, body
            ))),
        }
    }

    fn require_write_identity(&self) -> Result<Uuid> {
        self.config.indexer_uuid.ok_or_else(|| {
            HermesError::PermanentBackend(
                "peer provider has no indexer_uuid; writes require a peer-issued identity".into(),
            )
        })
    }

    async fn submit(&self, envelope: DocumentEnvelope) -> Result<SubmitResponse> {
        let indexer_id = self.require_write_identity()?;
        let response = self
            .client
            .post(self.url("/indexer/documents"))
            .bearer_auth(&self.token)
            .json(&SubmitRequest {
                indexer_id,
                documents: vec![envelope],
            })
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer submit: {}", e)))?;
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer submit body: {}", e)))
    }
}

#[derive(Deserialize)]
struct PeerDocumentList {
    documents: Vec<PeerListedDoc>,
}

#[derive(Deserialize)]
struct PeerListedDoc {
    document_uuid: Uuid,
    #[serde(default)]
    title: String,
    modified_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PeerReadDoc {
    document_uuid: Uuid,
    #[serde(default)]
    title: String,
    #[serde(default)]
    doc_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    modified_time: DateTime<Utc>,
}

#[async_trait]
impl WorkspaceProvider for PeerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Peer
    }

    async fn list(&self) -> Result<Vec<ProviderListing>> {
        let response = self
            .client
            .get(self.url(&format!(
                "/api/projects/{}/documents",
                self.config.project_id
            )))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer list: {}", e)))?;
        let page: PeerDocumentList = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer list body: {}", e)))?;

        Ok(page
            .documents
            .into_iter()
            .map(|doc| ProviderListing {
                provider_document_id: doc.document_uuid.to_string(),
                title: doc.title,
                modified_time: doc.modified_time,
                declared_uuid: Some(doc.document_uuid),
            })
            .collect())
    }

    async fn read(&self, provider_document_id: &str) -> Result<ProviderDocument> {
        let response = self
            .client
            .get(self.url(&format!("/api/documents/{}", provider_document_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer read: {}", e)))?;
        let doc: PeerReadDoc = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| HermesError::TransientBackend(format!("peer read body: {}", e)))?;

        let mut metadata = match doc.metadata {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };
        if let serde_json::Value::Object(ref mut map) = metadata {
            map.insert(
                "title".to_string(),
                serde_json::Value::String(doc.title.clone()),
            );
            map.insert(
                "doc_type".to_string(),
                serde_json::Value::String(doc.doc_type.clone()),
            );
            map.insert(
                "status".to_string(),
                serde_json::Value::String(doc.status.clone()),
            );
            map.insert(
                "modified_time".to_string(),
                serde_json::Value::String(doc.modified_time.to_rfc3339()),
            );
            map.insert(
                crate::provider::UUID_METADATA_KEY.to_string(),
                serde_json::Value::String(doc.document_uuid.to_string()),
            );
        }

        Ok(ProviderDocument {
            content: doc.content.unwrap_or_default(),
            metadata,
        })
    }

    async fn write(
        &self,
        provider_document_id: Option<&str>,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let title = metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("untitled")
            .to_string();
        let declared = metadata
            .get(crate::provider::UUID_METADATA_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let uuid = declared
            .or_else(|| provider_document_id.and_then(|id| Uuid::parse_str(id).ok()))
            .unwrap_or_else(Uuid::new_v4);

        let modified_time = Utc::now();
        let (_, content_hash) = normalize::hash_document(content, &title, modified_time, &[]);

        let envelope = DocumentEnvelope {
            action: EnvelopeAction::Upsert,
            document: EnvelopeDocument {
                uuid: Some(uuid),
                project_id: self.config.project_id.clone(),
                provider_type: ProviderKind::Peer,
                provider_document_id: uuid.to_string(),
                title,
                doc_type: metadata
                    .get("doc_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                status: metadata
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                content: Some(content.to_string()),
                content_hash,
                revision_reference: None,
                modified_time,
                metadata: metadata.clone(),
                summary: None,
                embedding: None,
            },
        };

        let response = self.submit(envelope).await?;
        if let Some(result) = response.results.first() {
            if result.status == "rejected" {
                return Err(HermesError::PermanentBackend(format!(
                    "peer rejected write: {}",
                    result.errors.join("; ")
                )));
            }
        }
        Ok(uuid.to_string())
    }

    async fn update_metadata(
        &self,
        provider_document_id: &str,
        kv: &serde_json::Value,
    ) -> Result<()> {
        // A peer has no partial-metadata endpoint; read, merge, resubmit.
        let existing = self.read(provider_document_id).await?;
        let mut metadata = existing.metadata;
        if let (serde_json::Value::Object(ref mut map), serde_json::Value::Object(updates)) =
            (&mut metadata, kv)
        {
            for (k, v) in updates {
                map.insert(k.clone(), v.clone());
            }
        }
        self.write(Some(provider_document_id), &existing.content, &metadata)
            .await?;
        Ok(())
    }

    async fn delete(&self, provider_document_id: &str) -> Result<()> {
        let uuid = Uuid::parse_str(provider_document_id).map_err(|_| {
            HermesError::InvalidRequest(format!(
                "peer document id is not a uuid: {}",
                provider_document_id
            ))
        })?;
        let envelope = DocumentEnvelope {
            action: EnvelopeAction::Delete,
            document: EnvelopeDocument {
                uuid: Some(uuid),
                project_id: self.config.project_id.clone(),
                provider_type: ProviderKind::Peer,
                provider_document_id: provider_document_id.to_string(),
                title: String::new(),
                doc_type: String::new(),
                status: String::new(),
                content: None,
                content_hash: String::new(),
                revision_reference: None,
                modified_time: Utc::now(),
                metadata: serde_json::json!({}),
                summary: None,
                embedding: None,
            },
        };
        self.submit(envelope).await?;
        Ok(())
    }
}

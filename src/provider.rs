//! Workspace provider contract and routing.
//!
//! A provider adapter wraps one concrete backend (local filesystem, hosted
//! document suite, peer instance) behind a single trait. Dispatch is a
//! tagged variant on [`ProviderKind`]; adapters are constructed from the
//! project's `provider_config` JSON, never looked up at runtime by type
//! name.
//!
//! Routing follows the migration rule: while a project carries a target
//! provider, writes go to the target and reads prefer the target, falling
//! back to the source when the target does not yet hold the document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::{Project, ProviderKind};

/// Metadata key under which the document UUID is round-tripped in sources.
pub const UUID_METADATA_KEY: &str = "hermes-uuid";

/// One enumerated document from a provider listing.
#[derive(Debug, Clone)]
pub struct ProviderListing {
    pub provider_document_id: String,
    pub title: String,
    pub modified_time: DateTime<Utc>,
    /// UUID the source itself declares (frontmatter or custom property).
    pub declared_uuid: Option<Uuid>,
}

/// Content and metadata read from a provider.
#[derive(Debug, Clone)]
pub struct ProviderDocument {
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Contract every workspace adapter implements.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Variant discriminator for this adapter.
    fn kind(&self) -> ProviderKind;

    /// Rendering artifacts this backend injects into content, stripped
    /// during normalization so hashes agree across providers.
    fn rendering_artifacts(&self) -> &[String] {
        &[]
    }

    /// Enumerate the documents in this workspace scope.
    async fn list(&self) -> Result<Vec<ProviderListing>>;

    /// Read one document's content and metadata.
    async fn read(&self, provider_document_id: &str) -> Result<ProviderDocument>;

    /// Write a document; creates when `provider_document_id` is `None`.
    /// Returns the native id of the written document.
    async fn write(
        &self,
        provider_document_id: Option<&str>,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<String>;

    /// Merge key/value pairs into the document's native metadata
    /// (frontmatter for markdown, custom properties for hosted docs).
    async fn update_metadata(
        &self,
        provider_document_id: &str,
        kv: &serde_json::Value,
    ) -> Result<()>;

    /// Delete a document from the workspace.
    async fn delete(&self, provider_document_id: &str) -> Result<()>;
}

/// Construct the adapter for a provider kind and its JSON configuration.
pub fn create_provider(
    kind: ProviderKind,
    config: &serde_json::Value,
) -> Result<Box<dyn WorkspaceProvider>> {
    match kind {
        ProviderKind::Local => Ok(Box::new(crate::provider_fs::LocalProvider::from_config(
            config,
        )?)),
        ProviderKind::HostedDocs => Ok(Box::new(
            crate::provider_hosted::HostedDocsProvider::from_config(config)?,
        )),
        ProviderKind::Peer => Ok(Box::new(crate::provider_peer::PeerProvider::from_config(
            config,
        )?)),
    }
}

/// The providers routing resolves for one project.
pub struct RoutedProject {
    pub source: Box<dyn WorkspaceProvider>,
    pub target: Option<Box<dyn WorkspaceProvider>>,
}

impl RoutedProject {
    /// Read a document, preferring the migration target.
    pub async fn read(&self, provider_document_id: &str) -> Result<ProviderDocument> {
        if let Some(target) = &self.target {
            match target.read(provider_document_id).await {
                Ok(doc) => return Ok(doc),
                Err(HermesError::NotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }
        self.source.read(provider_document_id).await
    }

    /// The provider that receives writes: the target during migration,
    /// otherwise the primary.
    pub fn write_provider(&self) -> &dyn WorkspaceProvider {
        match &self.target {
            Some(target) => target.as_ref(),
            None => self.source.as_ref(),
        }
    }
}

/// Maps a project to its provider adapters.
pub struct WorkspaceRouter;

impl WorkspaceRouter {
    /// Build the routed providers for a project from its stored config.
    pub fn resolve(project: &Project) -> Result<RoutedProject> {
        let source = create_provider(project.provider_type, &project.provider_config)?;
        let target = match (
            project.target_provider_type,
            project.target_provider_config.as_ref(),
        ) {
            (Some(kind), Some(config)) => Some(create_provider(kind, config)?),
            _ => None,
        };
        Ok(RoutedProject { source, target })
    }

    /// Adapter for the primary provider only.
    pub fn resolve_source(project: &Project) -> Result<Box<dyn WorkspaceProvider>> {
        create_provider(project.provider_type, &project.provider_config)
    }

    /// Adapter for the migration target; errors when none is attached.
    pub fn resolve_target(project: &Project) -> Result<Box<dyn WorkspaceProvider>> {
        match (
            project.target_provider_type,
            project.target_provider_config.as_ref(),
        ) {
            (Some(kind), Some(config)) => create_provider(kind, config),
            _ => Err(HermesError::PermanentBackend(format!(
                "project {} has no migration target attached",
                project.project_id
            ))),
        }
    }
}

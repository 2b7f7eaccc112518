//! Core data models used throughout Hermes.
//!
//! Catalog entities carry Unix-second timestamps the way the store persists
//! them; wire types carry RFC 3339 timestamps the way the admission API
//! serializes them. Status fields that form state machines are typed enums
//! with stable string forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============ Status enums ============

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Active,
    Archived,
    Migrating,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
            ProjectStatus::Migrating => "migrating",
            ProjectStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProjectStatus::Active),
            "archived" => Some(ProjectStatus::Archived),
            "migrating" => Some(ProjectStatus::Migrating),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

/// Status of one revision row.
///
/// `active` and `canonical` are the steady states; `source` and `target`
/// coexist only during migration; `conflict` is terminal until an operator
/// resolves it; `archived` rows are the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionStatus {
    Active,
    Source,
    Target,
    Conflict,
    Archived,
    Canonical,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Active => "active",
            RevisionStatus::Source => "source",
            RevisionStatus::Target => "target",
            RevisionStatus::Conflict => "conflict",
            RevisionStatus::Archived => "archived",
            RevisionStatus::Canonical => "canonical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RevisionStatus::Active),
            "source" => Some(RevisionStatus::Source),
            "target" => Some(RevisionStatus::Target),
            "conflict" => Some(RevisionStatus::Conflict),
            "archived" => Some(RevisionStatus::Archived),
            "canonical" => Some(RevisionStatus::Canonical),
            _ => None,
        }
    }

    /// Live revisions participate in conflict detection; archived and
    /// conflict rows do not.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            RevisionStatus::Active
                | RevisionStatus::Source
                | RevisionStatus::Target
                | RevisionStatus::Canonical
        )
    }
}

/// Classification of a divergence between live revisions of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    MigrationDivergence,
    ConcurrentEdit,
    ContentDivergence,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::MigrationDivergence => "migration-divergence",
            ConflictType::ConcurrentEdit => "concurrent-edit",
            ConflictType::ContentDivergence => "content-divergence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "migration-divergence" => Some(ConflictType::MigrationDivergence),
            "concurrent-edit" => Some(ConflictType::ConcurrentEdit),
            "content-divergence" => Some(ConflictType::ContentDivergence),
            _ => None,
        }
    }
}

/// How a conflict was (or will be) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    Pending,
    SourceWins,
    TargetWins,
    Manual,
    ResolvedIdentical,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Pending => "pending",
            ConflictResolution::SourceWins => "source-wins",
            ConflictResolution::TargetWins => "target-wins",
            ConflictResolution::Manual => "manual",
            ConflictResolution::ResolvedIdentical => "resolved-identical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConflictResolution::Pending),
            "source-wins" => Some(ConflictResolution::SourceWins),
            "target-wins" => Some(ConflictResolution::TargetWins),
            "manual" => Some(ConflictResolution::Manual),
            "resolved-identical" => Some(ConflictResolution::ResolvedIdentical),
            _ => None,
        }
    }
}

/// Migration resolution policy chosen by the operator at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    SourceWins,
    TargetWins,
    HashTieThenManual,
}

impl ResolutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPolicy::SourceWins => "source-wins",
            ResolutionPolicy::TargetWins => "target-wins",
            ResolutionPolicy::HashTieThenManual => "hash-tie-then-manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source-wins" => Some(ResolutionPolicy::SourceWins),
            "target-wins" => Some(ResolutionPolicy::TargetWins),
            "hash-tie-then-manual" => Some(ResolutionPolicy::HashTieThenManual),
            _ => None,
        }
    }
}

/// Workspace provider discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Local,
    HostedDocs,
    Peer,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::HostedDocs => "hosted-docs",
            ProviderKind::Peer => "peer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ProviderKind::Local),
            "hosted-docs" => Some(ProviderKind::HostedDocs),
            "peer" => Some(ProviderKind::Peer),
            _ => None,
        }
    }
}

/// Enrichment progress of a document's current canonical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrichmentState {
    Pending,
    Complete,
    Failed,
}

impl EnrichmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentState::Pending => "pending",
            EnrichmentState::Complete => "complete",
            EnrichmentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentState::Pending),
            "complete" => Some(EnrichmentState::Complete),
            "failed" => Some(EnrichmentState::Failed),
            _ => None,
        }
    }
}

// ============ Catalog entities ============

/// The singleton identity row of a deployed server.
#[derive(Debug, Clone)]
pub struct Instance {
    pub instance_uuid: Uuid,
    pub instance_name: String,
    pub base_url: String,
    pub environment: String,
    pub created_at: i64,
}

/// A named workspace scope owning documents.
#[derive(Debug, Clone)]
pub struct Project {
    pub project_uuid: Uuid,
    /// Kebab-case local id, unique within the instance.
    pub project_id: String,
    pub title: String,
    /// Uppercase tag, at most 4 characters, not globally unique.
    pub short_tag: String,
    pub status: ProjectStatus,
    pub provider_type: ProviderKind,
    /// Provider-specific JSON configuration.
    pub provider_config: serde_json::Value,
    /// Canonicalized hash of `provider_config`, for change detection.
    pub config_hash: String,
    /// Target provider attached while a migration is in flight.
    pub target_provider_type: Option<ProviderKind>,
    pub target_provider_config: Option<serde_json::Value>,
    pub resolution_policy: Option<ResolutionPolicy>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The logical, provider-independent identity of a document.
#[derive(Debug, Clone)]
pub struct Document {
    pub document_uuid: Uuid,
    pub project_uuid: Uuid,
    pub title: String,
    pub doc_type: String,
    /// Application-defined status string; `"deleted"` marks logical deletion.
    pub status: String,
    pub metadata: serde_json::Value,
    /// Retained content, subject to the admission retention rule.
    pub content: Option<String>,
    pub enrichment_state: EnrichmentState,
    pub modified_time: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One observed (document, project, provider, content_hash) combination.
#[derive(Debug, Clone)]
pub struct Revision {
    pub revision_id: i64,
    pub document_uuid: Uuid,
    pub project_uuid: Uuid,
    pub provider_type: ProviderKind,
    /// Native id inside the provider: file path, hosted-doc id, peer uuid.
    pub provider_document_id: String,
    /// `sha256:<hex>` over normalized content and critical metadata.
    pub content_hash: String,
    pub modified_time: i64,
    /// Optional commit SHA or version string from the source.
    pub revision_reference: Option<String>,
    pub status: RevisionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// AI-generated analysis of a specific revision's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub document_uuid: Uuid,
    pub content_hash: String,
    pub model_id: String,
    pub generated_at: i64,
    pub summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub suggested_status: Option<String>,
    pub confidence: f64,
    pub tokens_used: i64,
}

/// Vector representation of a specific revision's content.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub document_uuid: Uuid,
    pub content_hash: String,
    pub model_id: String,
    pub dimensions: usize,
    pub content_vector: Vec<f32>,
    pub chunks: Vec<EmbeddingChunk>,
    pub created_at: i64,
}

/// One chunk vector with its position inside the normalized content.
#[derive(Debug, Clone)]
pub struct EmbeddingChunk {
    pub chunk_index: i64,
    pub start_pos: i64,
    pub end_pos: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Per-agent registration record.
#[derive(Debug, Clone)]
pub struct Indexer {
    pub indexer_uuid: Uuid,
    pub indexer_type: String,
    pub project_uuid: Uuid,
    pub workspace_scope: String,
    /// SHA-256 of the issued API token; the token itself is never stored.
    pub token_hash: String,
    pub hostname: Option<String>,
    pub version: Option<String>,
    pub created_at: i64,
    pub last_heartbeat: Option<i64>,
    pub last_scan: Option<i64>,
    pub document_count: i64,
    pub reported_status: String,
    pub revoked: bool,
}

/// A recorded divergence between live revisions of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: i64,
    pub document_uuid: Uuid,
    pub conflict_type: ConflictType,
    pub detected_at: i64,
    /// Participating revisions with their hashes and modified times.
    pub revisions: Vec<ConflictRevision>,
    pub resolution: ConflictResolution,
    pub note: Option<String>,
}

/// One participant in a conflict report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRevision {
    pub revision_id: i64,
    pub provider_type: ProviderKind,
    pub content_hash: String,
    pub modified_time: i64,
    pub status: RevisionStatus,
}

// ============ Wire types (agent <-> server) ============

/// Batch submission request for `POST /indexer/documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub indexer_id: Uuid,
    pub documents: Vec<DocumentEnvelope>,
}

/// What the agent wants done with one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeAction {
    Upsert,
    Delete,
    Refresh,
}

/// One document submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    pub action: EnvelopeAction,
    pub document: EnvelopeDocument,
}

/// Document payload inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeDocument {
    /// Omitted on first ingest when the source declared no UUID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub project_id: String,
    pub provider_type: ProviderKind,
    pub provider_document_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default)]
    pub status: String,
    /// Full content; optional for delete/refresh and hash-only submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_reference: Option<String>,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Pre-computed summary, when the agent is configured to enrich locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingPayload>,
}

/// Summary shape shared by envelopes and `PUT .../summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub model: String,
    pub content_hash: String,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_status: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tokens_used: i64,
}

/// Embedding shape shared by envelopes and `PUT .../embeddings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingPayload {
    pub model: String,
    pub dimensions: usize,
    pub content_hash: String,
    pub content_vector: Vec<f32>,
    #[serde(default)]
    pub chunks: Vec<ChunkVectorPayload>,
}

/// One chunk vector on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVectorPayload {
    pub index: i64,
    #[serde(default)]
    pub start_pos: i64,
    #[serde(default)]
    pub end_pos: i64,
    #[serde(default)]
    pub text: String,
    pub vector: Vec<f32>,
}

/// Outcome of one submitted envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeResult {
    /// `created`, `updated`, `duplicate`, or `rejected`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<i64>,
    pub is_duplicate: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Batch response for `POST /indexer/documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub results: Vec<EnvelopeResult>,
}

/// Bootstrap request for `POST /indexer/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub indexer_type: String,
    pub project_id: String,
    pub workspace_scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Bootstrap response carrying the long-lived API token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub indexer_uuid: Uuid,
    pub api_token: String,
    pub expires_at: DateTime<Utc>,
    pub config: AgentServerConfig,
}

/// Server-pushed agent tuning, returned at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentServerConfig {
    pub heartbeat_interval_secs: u64,
    pub batch_size: usize,
}

/// Liveness report for `POST /indexer/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub indexer_uuid: Uuid,
    /// Self-reported: `healthy`, `degraded`, or `error`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub document_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            RevisionStatus::Active,
            RevisionStatus::Source,
            RevisionStatus::Target,
            RevisionStatus::Conflict,
            RevisionStatus::Archived,
            RevisionStatus::Canonical,
        ] {
            assert_eq!(RevisionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RevisionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_live_statuses() {
        assert!(RevisionStatus::Active.is_live());
        assert!(RevisionStatus::Source.is_live());
        assert!(RevisionStatus::Target.is_live());
        assert!(RevisionStatus::Canonical.is_live());
        assert!(!RevisionStatus::Archived.is_live());
        assert!(!RevisionStatus::Conflict.is_live());
    }

    #[test]
    fn test_provider_kind_wire_form() {
        let json = serde_json::to_string(&ProviderKind::HostedDocs).unwrap();
        assert_eq!(json, "\"hosted-docs\"");
        let back: ProviderKind = serde_json::from_str("\"peer\"").unwrap();
        assert_eq!(back, ProviderKind::Peer);
    }

    #[test]
    fn test_envelope_deserializes_without_uuid() {
        let raw = r#"{
            "action": "upsert",
            "document": {
                "project_id": "docs-internal",
                "provider_type": "local",
                "provider_document_id": "RFC-001.md",
                "title": "RFC-001",
                "doc_type": "RFC",
                "status": "Draft",
                "content": "Hello",
                "content_hash": "sha256:abc",
                "modified_time": "2026-01-01T00:00:00Z",
                "metadata": {}
            }
        }"#;
        let env: DocumentEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.action, EnvelopeAction::Upsert);
        assert!(env.document.uuid.is_none());
        assert_eq!(env.document.provider_type, ProviderKind::Local);
    }
}

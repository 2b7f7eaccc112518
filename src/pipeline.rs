//! Per-document admission pipeline.
//!
//! Every submitted envelope runs the ordered stage sequence:
//!
//! ```text
//! resolve_identity → normalize_and_hash → record_revision → update_catalog
//!   → summarize → embed → index_keyword → index_vector → detect_conflicts → ack
//! ```
//!
//! Stages 1–4 share one store transaction under a per-document advisory
//! lock, so concurrent submissions of the same document linearize. Stages
//! 5–6 run outside the transaction under their own deadline; failures leave
//! the document `enrichment_pending` for the reconciler. Stages 7–8 are
//! fed by an outbox row written inside the stage 1–4 transaction and
//! delivered with bounded inline retry; leftovers drain through the
//! reconciler. Stage 9 runs after the ack.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ai::{AiError, Embedder, Summarizer};
use crate::config::{AiConfig, PipelineConfig};
use crate::error::{HermesError, Result};
use crate::identity::IdentityEngine;
use crate::index::{SearchIndex, SearchableDoc, VectorDoc, VectorIndex};
use crate::models::{
    Document, DocumentEnvelope, EnrichmentState, EnvelopeAction, EnvelopeDocument, EnvelopeResult,
    Project, ProjectStatus, ProviderKind, RevisionStatus, Summary,
};
use crate::normalize;
use crate::store::CatalogStore;

/// Advisory locks keyed by document identity, serializing stages 1–4.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Pipeline {
    store: CatalogStore,
    identity: IdentityEngine,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    search_index: Arc<dyn SearchIndex>,
    vector_index: Arc<dyn VectorIndex>,
    locks: DocumentLocks,
    config: PipelineConfig,
    ai: AiConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CatalogStore,
        identity: IdentityEngine,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        search_index: Arc<dyn SearchIndex>,
        vector_index: Arc<dyn VectorIndex>,
        config: PipelineConfig,
        ai: AiConfig,
    ) -> Self {
        Self {
            store,
            identity,
            summarizer,
            embedder,
            search_index,
            vector_index,
            locks: DocumentLocks::default(),
            config,
            ai,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn identity(&self) -> &IdentityEngine {
        &self.identity
    }

    /// Admit one envelope. `scope` restricts the envelope to the project
    /// an indexer token is bound to; operator-driven calls pass `None`.
    pub async fn admit(
        &self,
        envelope: &DocumentEnvelope,
        scope: Option<Uuid>,
    ) -> Result<EnvelopeResult> {
        let project = match self.load_project(&envelope.document, scope).await {
            Ok(project) => project,
            Err(HermesError::InvalidRequest(message)) => return Ok(rejected(message)),
            Err(other) => return Err(other),
        };

        match envelope.action {
            EnvelopeAction::Upsert => self.admit_upsert(&project, &envelope.document).await,
            EnvelopeAction::Delete => self.admit_delete(&project, &envelope.document).await,
            EnvelopeAction::Refresh => self.admit_refresh(&project, &envelope.document).await,
        }
    }

    async fn load_project(
        &self,
        doc: &EnvelopeDocument,
        scope: Option<Uuid>,
    ) -> Result<Project> {
        let project = self
            .store
            .get_project_by_id(&doc.project_id)
            .await?
            .ok_or_else(|| {
                HermesError::InvalidRequest(format!("unknown project: {}", doc.project_id))
            })?;
        if let Some(scope_uuid) = scope {
            if project.project_uuid != scope_uuid {
                return Err(HermesError::InvalidRequest(format!(
                    "token is not scoped to project {}",
                    doc.project_id
                )));
            }
        }
        if project.status == ProjectStatus::Archived {
            return Err(HermesError::InvalidRequest(format!(
                "project {} is archived",
                doc.project_id
            )));
        }
        Ok(project)
    }

    // ============ Upsert ============

    async fn admit_upsert(
        &self,
        project: &Project,
        doc: &EnvelopeDocument,
    ) -> Result<EnvelopeResult> {
        if !normalize::is_valid_hash(&doc.content_hash) {
            return Ok(rejected(format!(
                "malformed content_hash: {}",
                doc.content_hash
            )));
        }

        // Stage 2 part one: verify an agent-supplied hash by recomputing
        // it from the content, when content travelled with the envelope.
        let artifacts = rendering_artifacts(project, doc.provider_type);
        let normalized = match &doc.content {
            Some(raw) => {
                let (normalized, computed) =
                    normalize::hash_document(raw, &doc.title, doc.modified_time, &artifacts);
                if computed != doc.content_hash {
                    return Ok(rejected(format!(
                        "content hash mismatch: agent sent {}, server computed {}",
                        doc.content_hash, computed
                    )));
                }
                Some(normalized)
            }
            None => None,
        };

        let lock_key = match doc.uuid {
            Some(uuid) => format!("uuid:{}", uuid),
            None => format!(
                "bind:{}/{}/{}",
                project.project_uuid,
                doc.provider_type.as_str(),
                doc.provider_document_id
            ),
        };
        let _guard = self.locks.acquire(&lock_key).await;

        // Stages 1, 3, 4 inside one transaction.
        let mut tx = self.store.begin().await?;

        let (document_uuid, _needs_write_back) = IdentityEngine::resolve_document_uuid(
            &mut tx,
            project.project_uuid,
            doc.provider_type,
            &doc.provider_document_id,
            doc.uuid,
        )
        .await?;

        let (revision, created) = IdentityEngine::record_revision(
            &mut tx,
            project,
            document_uuid,
            doc.provider_type,
            &doc.provider_document_id,
            &doc.content_hash,
            doc.modified_time.timestamp(),
            doc.revision_reference.as_deref(),
        )
        .await?;

        let doc_existed = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM documents WHERE document_uuid = ?",
        )
        .bind(document_uuid.to_string())
        .fetch_one(&mut *tx)
        .await?
            > 0;

        let catalog_content = normalized.as_deref().map(|normalized| {
            retained_content(
                normalized,
                doc.provider_type,
                self.config.retention_bytes,
                self.config.search_copy_bytes,
            )
        });

        let enrichment_needed = self.ai.summarize_enabled() || self.ai.embed_enabled();
        let now = Utc::now().timestamp();
        let catalog_doc = Document {
            document_uuid,
            project_uuid: project.project_uuid,
            title: doc.title.clone(),
            doc_type: doc.doc_type.clone(),
            status: doc.status.clone(),
            metadata: doc.metadata.clone(),
            content: catalog_content,
            enrichment_state: if enrichment_needed {
                EnrichmentState::Pending
            } else {
                EnrichmentState::Complete
            },
            modified_time: doc.modified_time.timestamp(),
            created_at: now,
            updated_at: now,
        };
        CatalogStore::upsert_document(&mut tx, &catalog_doc).await?;

        // Outbox rows commit atomically with the catalog write.
        CatalogStore::enqueue_index_write(&mut tx, document_uuid, "keyword").await?;
        if self.ai.embed_enabled() || doc.embedding.is_some() {
            CatalogStore::enqueue_index_write(&mut tx, document_uuid, "vector").await?;
        }

        tx.commit().await?;

        // A fresh source edit during migration re-queues the copy.
        if created
            && project.status == ProjectStatus::Migrating
            && revision.status == RevisionStatus::Source
        {
            self.store
                .upsert_migration_item(project.project_uuid, document_uuid, "pending", None)
                .await?;
        }

        // Agent-supplied enrichment becomes a cache write before the
        // stages run, turning them into cache hits.
        self.store_supplied_enrichment(document_uuid, doc).await?;

        // Stages 5–6 under the enrichment deadline.
        self.run_enrichment(document_uuid, &doc.content_hash, 0)
            .await?;

        // Stages 7–8 with bounded inline retry.
        self.drain_outbox_for(document_uuid).await;

        // Stage 9 runs async post-ack.
        let identity = self.identity.clone();
        let window = self.config.concurrent_edit_window_secs;
        tokio::spawn(async move {
            if let Err(e) = identity.detect_conflicts(document_uuid, window).await {
                tracing::warn!(document_uuid = %document_uuid, error = %e, "conflict detection failed");
            }
        });

        let status = if !created {
            "duplicate"
        } else if doc_existed {
            "updated"
        } else {
            "created"
        };
        Ok(EnvelopeResult {
            status: status.to_string(),
            document_uuid: Some(document_uuid),
            revision_id: Some(revision.revision_id),
            is_duplicate: !created,
            errors: Vec::new(),
        })
    }

    // ============ Delete ============

    async fn admit_delete(
        &self,
        project: &Project,
        doc: &EnvelopeDocument,
    ) -> Result<EnvelopeResult> {
        let document_uuid = match self.lookup_uuid(project, doc).await? {
            Some(uuid) => uuid,
            None => {
                return Ok(rejected(format!(
                    "delete for unknown document: {}",
                    doc.provider_document_id
                )))
            }
        };

        let _guard = self.locks.acquire(&format!("uuid:{}", document_uuid)).await;

        self.store.archive_document_revisions(document_uuid).await?;
        self.store.set_document_status(document_uuid, "deleted").await?;

        let mut tx = self.store.begin().await?;
        CatalogStore::enqueue_index_write(&mut tx, document_uuid, "delete").await?;
        tx.commit().await?;
        self.drain_outbox_for(document_uuid).await;

        tracing::info!(document_uuid = %document_uuid, "document deleted");
        Ok(EnvelopeResult {
            status: "updated".to_string(),
            document_uuid: Some(document_uuid),
            revision_id: None,
            is_duplicate: false,
            errors: Vec::new(),
        })
    }

    // ============ Refresh ============

    async fn admit_refresh(
        &self,
        project: &Project,
        doc: &EnvelopeDocument,
    ) -> Result<EnvelopeResult> {
        let document_uuid = match self.lookup_uuid(project, doc).await? {
            Some(uuid) => uuid,
            None => {
                return Ok(rejected(format!(
                    "refresh for unknown document: {}",
                    doc.provider_document_id
                )))
            }
        };

        let hash = match self.current_hash(document_uuid).await? {
            Some(hash) => hash,
            None => {
                return Ok(rejected(format!(
                    "refresh for document with no live revision: {}",
                    document_uuid
                )))
            }
        };

        self.run_enrichment(document_uuid, &hash, 0).await?;

        let mut tx = self.store.begin().await?;
        CatalogStore::enqueue_index_write(&mut tx, document_uuid, "keyword").await?;
        if self.ai.embed_enabled() {
            CatalogStore::enqueue_index_write(&mut tx, document_uuid, "vector").await?;
        }
        tx.commit().await?;
        self.drain_outbox_for(document_uuid).await;

        Ok(EnvelopeResult {
            status: "updated".to_string(),
            document_uuid: Some(document_uuid),
            revision_id: None,
            is_duplicate: false,
            errors: Vec::new(),
        })
    }

    async fn lookup_uuid(
        &self,
        project: &Project,
        doc: &EnvelopeDocument,
    ) -> Result<Option<Uuid>> {
        if let Some(uuid) = doc.uuid {
            return Ok(Some(uuid));
        }
        let mut conn = self.store.pool().acquire().await?;
        CatalogStore::get_binding(
            &mut conn,
            project.project_uuid,
            doc.provider_type,
            &doc.provider_document_id,
        )
        .await
    }

    /// Content hash of the newest live revision.
    async fn current_hash(&self, document_uuid: Uuid) -> Result<Option<String>> {
        let live = self.store.live_revisions(document_uuid).await?;
        Ok(live
            .into_iter()
            .max_by_key(|r| (r.modified_time, r.revision_id))
            .map(|r| r.content_hash))
    }

    // ============ Enrichment (stages 5–6) ============

    async fn store_supplied_enrichment(
        &self,
        document_uuid: Uuid,
        doc: &EnvelopeDocument,
    ) -> Result<()> {
        if let Some(payload) = &doc.summary {
            if payload.content_hash == doc.content_hash {
                let summary = Summary {
                    document_uuid,
                    content_hash: payload.content_hash.clone(),
                    model_id: payload.model.clone(),
                    generated_at: Utc::now().timestamp(),
                    summary: payload.summary.clone(),
                    key_points: payload.key_points.clone(),
                    topics: payload.topics.clone(),
                    tags: payload.tags.clone(),
                    suggested_status: payload.suggested_status.clone(),
                    confidence: payload.confidence,
                    tokens_used: payload.tokens_used,
                };
                self.store.upsert_summary(&summary).await?;
            }
        }
        if let Some(payload) = &doc.embedding {
            if payload.content_hash == doc.content_hash {
                let chunks: Vec<(i64, i64, i64, String, Vec<u8>)> = payload
                    .chunks
                    .iter()
                    .map(|c| {
                        (
                            c.index,
                            c.start_pos,
                            c.end_pos,
                            c.text.clone(),
                            crate::ai::vec_to_blob(&c.vector),
                        )
                    })
                    .collect();
                self.store
                    .upsert_embedding(
                        document_uuid,
                        &payload.content_hash,
                        &payload.model,
                        payload.dimensions,
                        &crate::ai::vec_to_blob(&payload.content_vector),
                        &chunks,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Run stages 5–6 for one document. `attempts` counts prior reconciler
    /// tries and feeds the retry backoff on failure.
    pub async fn run_enrichment(
        &self,
        document_uuid: Uuid,
        content_hash: &str,
        attempts: i64,
    ) -> Result<EnrichmentState> {
        if !self.ai.summarize_enabled() && !self.ai.embed_enabled() {
            return Ok(EnrichmentState::Complete);
        }

        let Some(document) = self.store.get_document(document_uuid).await? else {
            return Ok(EnrichmentState::Failed);
        };

        let deadline = Duration::from_secs(self.config.enrichment_timeout_secs);
        let outcome = tokio::time::timeout(
            deadline,
            self.enrich_inner(&document, content_hash),
        )
        .await;

        let state = match outcome {
            Ok(Ok(())) => EnrichmentState::Complete,
            Ok(Err(AiError::Permanent(message))) => {
                tracing::warn!(document_uuid = %document_uuid, message, "enrichment failed permanently");
                EnrichmentState::Failed
            }
            Ok(Err(AiError::Transient(message))) => {
                tracing::warn!(document_uuid = %document_uuid, message, "enrichment failed, will retry");
                EnrichmentState::Pending
            }
            Err(_) => {
                tracing::warn!(document_uuid = %document_uuid, "enrichment timed out, will retry");
                EnrichmentState::Pending
            }
        };

        let (next_attempts, next_retry) = match state {
            EnrichmentState::Pending => {
                // 1 min doubling to a 1 hour cap.
                let delay = (60i64 << attempts.min(6) as u32).min(3600);
                (attempts + 1, Some(Utc::now().timestamp() + delay))
            }
            _ => (attempts, None),
        };
        self.store
            .set_enrichment_state(document_uuid, state, next_attempts, next_retry)
            .await?;
        Ok(state)
    }

    async fn enrich_inner(
        &self,
        document: &Document,
        content_hash: &str,
    ) -> std::result::Result<(), AiError> {
        let content = document.content.clone().unwrap_or_default();

        // Stage 5: summarize, cache keyed on (uuid, model, hash).
        if self.ai.summarize_enabled() {
            let cached = self
                .store
                .get_summary(document.document_uuid, self.summarizer.model_id(), content_hash)
                .await
                .map_err(|e| AiError::Transient(e.to_string()))?;
            if cached.is_none() {
                let output = self
                    .summarizer
                    .summarize(&document.title, &document.doc_type, &content)
                    .await?;
                let summary = Summary {
                    document_uuid: document.document_uuid,
                    content_hash: content_hash.to_string(),
                    model_id: self.summarizer.model_id().to_string(),
                    generated_at: Utc::now().timestamp(),
                    summary: output.summary,
                    key_points: output.key_points,
                    topics: output.topics,
                    tags: output.tags,
                    suggested_status: output.suggested_status,
                    confidence: output.confidence,
                    tokens_used: output.tokens_used,
                };
                self.store
                    .upsert_summary(&summary)
                    .await
                    .map_err(|e| AiError::Transient(e.to_string()))?;
            }
        }

        // Stage 6: embed, same caching rule.
        if self.ai.embed_enabled() {
            let cached = self
                .store
                .has_embedding(document.document_uuid, self.embedder.model_id(), content_hash)
                .await
                .map_err(|e| AiError::Transient(e.to_string()))?;
            if !cached {
                let output = self
                    .embedder
                    .embed(&content, self.ai.chunk_bytes, self.ai.chunk_overlap_bytes)
                    .await?;
                let chunks: Vec<(i64, i64, i64, String, Vec<u8>)> = output
                    .chunks
                    .iter()
                    .map(|c| {
                        (
                            c.index,
                            c.start_pos,
                            c.end_pos,
                            c.text.clone(),
                            crate::ai::vec_to_blob(&c.vector),
                        )
                    })
                    .collect();
                self.store
                    .upsert_embedding(
                        document.document_uuid,
                        content_hash,
                        &output.model,
                        output.dimensions,
                        &crate::ai::vec_to_blob(&output.content_vector),
                        &chunks,
                    )
                    .await
                    .map_err(|e| AiError::Transient(e.to_string()))?;
            }
        }

        Ok(())
    }

    // ============ Index delivery (stages 7–8) ============

    /// Deliver pending outbox rows for one document with bounded retry.
    /// Failures stay queued for the reconciler; admission still succeeds.
    pub async fn drain_outbox_for(&self, document_uuid: Uuid) {
        let due = match self.store.outbox_due(i64::MAX, 64).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "outbox read failed");
                return;
            }
        };

        for row in due.into_iter().filter(|r| r.document_uuid == document_uuid) {
            let mut delivered = false;
            for attempt in 0..self.config.index_retry_attempts {
                if attempt > 0 {
                    tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
                }
                match self.deliver_index_write(document_uuid, &row.kind).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            document_uuid = %document_uuid,
                            kind = %row.kind,
                            attempt,
                            error = %e,
                            "index write failed"
                        );
                    }
                }
            }
            let result = if delivered {
                self.store.outbox_delete(row.outbox_id).await
            } else {
                self.store
                    .outbox_retry_later(
                        row.outbox_id,
                        "inline delivery exhausted",
                        Utc::now().timestamp() + 60,
                    )
                    .await
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "outbox bookkeeping failed");
            }
        }
    }

    /// Deliver one index write; shared with the reconciler.
    pub async fn deliver_index_write(&self, document_uuid: Uuid, kind: &str) -> Result<()> {
        match kind {
            "delete" => {
                self.search_index.delete(document_uuid).await?;
                self.vector_index.delete(document_uuid).await?;
                Ok(())
            }
            "keyword" => {
                let Some(document) = self.store.get_document(document_uuid).await? else {
                    return Ok(());
                };
                let summary = self.store.latest_summary(document_uuid).await?;
                let body = document.content.clone().unwrap_or_default();
                let body = truncate_on_boundary(&body, self.config.search_copy_bytes.max(1));
                let doc = SearchableDoc {
                    document_uuid,
                    title: document.title.clone(),
                    body: body.to_string(),
                    summary: summary
                        .as_ref()
                        .map(|s| s.summary.clone())
                        .unwrap_or_default(),
                    tags: summary.map(|s| s.tags).unwrap_or_default(),
                    doc_type: document.doc_type.clone(),
                    project_uuid: document.project_uuid,
                    status: document.status.clone(),
                };
                self.search_index.upsert(&doc).await
            }
            "vector" => {
                let Some(document) = self.store.get_document(document_uuid).await? else {
                    return Ok(());
                };
                let Some(hash) = self.current_hash(document_uuid).await? else {
                    return Ok(());
                };
                let model_id = self.embedder.model_id().to_string();
                let stored = match self
                    .store
                    .get_embedding_vector(document_uuid, &model_id, &hash)
                    .await?
                {
                    Some(row) => Some((model_id, row)),
                    // Agent-supplied vectors may carry a different model.
                    None => self
                        .any_embedding_vector(document_uuid, &hash)
                        .await?,
                };
                let Some((model, (_dims, blob))) = stored else {
                    return Ok(());
                };
                let summary = self.store.latest_summary(document_uuid).await?;
                let doc = VectorDoc {
                    document_uuid,
                    model_id: model,
                    vector: crate::ai::blob_to_vec(&blob),
                    title: document.title.clone(),
                    doc_type: document.doc_type.clone(),
                    project_uuid: document.project_uuid,
                    status: document.status.clone(),
                    tags: summary.map(|s| s.tags).unwrap_or_default(),
                };
                self.vector_index.upsert(&doc).await
            }
            other => Err(HermesError::PermanentBackend(format!(
                "unknown outbox kind: {}",
                other
            ))),
        }
    }

    async fn any_embedding_vector(
        &self,
        document_uuid: Uuid,
        content_hash: &str,
    ) -> Result<Option<(String, (usize, Vec<u8>))>> {
        use sqlx::Row;
        let row = sqlx::query(
            "SELECT model_id, dimensions, content_vector FROM embeddings WHERE document_uuid = ? AND content_hash = ? LIMIT 1",
        )
        .bind(document_uuid.to_string())
        .bind(content_hash)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(|r| {
            let model: String = r.get("model_id");
            let dims: i64 = r.get("dimensions");
            let blob: Vec<u8> = r.get("content_vector");
            (model, (dims as usize, blob))
        }))
    }
}

fn rejected(message: String) -> EnvelopeResult {
    EnvelopeResult {
        status: "rejected".to_string(),
        document_uuid: None,
        revision_id: None,
        is_duplicate: false,
        errors: vec![message],
    }
}

/// Rendering artifacts declared in the project's provider config for the
/// submitting provider, so server-side re-hashing matches the agent's.
fn rendering_artifacts(project: &Project, provider_type: ProviderKind) -> Vec<String> {
    let config = if Some(provider_type) == project.target_provider_type {
        project.target_provider_config.as_ref()
    } else {
        Some(&project.provider_config)
    };
    config
        .and_then(|c| c.get("rendering_artifacts"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Apply the retention rule to normalized content.
///
/// The local filesystem provider is also the source of truth, so its full
/// body is retained; other providers keep at most the search copy once the
/// content crosses the retention threshold.
fn retained_content(
    normalized: &str,
    provider_type: ProviderKind,
    retention_bytes: usize,
    search_copy_bytes: usize,
) -> String {
    if provider_type == ProviderKind::Local || normalized.len() <= retention_bytes {
        return normalized.to_string();
    }
    truncate_on_boundary(normalized, search_copy_bytes).to_string()
}

fn truncate_on_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut idx = max_bytes;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    &text[..idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retained_content_local_keeps_full() {
        let body = "x".repeat(100);
        assert_eq!(
            retained_content(&body, ProviderKind::Local, 10, 5),
            body
        );
    }

    #[test]
    fn test_retained_content_boundary() {
        let body = "x".repeat(100);
        // Exactly at the threshold: retained fully.
        assert_eq!(
            retained_content(&body, ProviderKind::HostedDocs, 100, 50).len(),
            100
        );
        // One over: truncated to the search copy.
        let over = "x".repeat(101);
        assert_eq!(
            retained_content(&over, ProviderKind::HostedDocs, 100, 50).len(),
            50
        );
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let text = "ééééé"; // 2 bytes each
        let cut = truncate_on_boundary(text, 5);
        assert_eq!(cut, "éé");
    }

    #[tokio::test]
    async fn test_document_locks_serialize() {
        let locks = DocumentLocks::default();
        let guard = locks.acquire("uuid:a").await;
        // A second acquire on the same key must not resolve while the
        // first guard is held.
        let locks2 = locks.clone();
        let pending = tokio::spawn(async move { locks2.acquire("uuid:a").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        drop(guard);
        let _ = pending.await.unwrap();
    }
}

//! Reconciler tests: enrichment retry after transient failures and
//! outbox-driven index recovery.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hermes::ai::{AiError, DisabledEmbedder, Summarizer, SummaryOutput};
use hermes::config::{AiConfig, PipelineConfig};
use hermes::identity::IdentityEngine;
use hermes::index::{SearchFilters, SearchIndex, SqliteSearchIndex, SqliteVectorIndex};
use hermes::models::{
    DocumentEnvelope, EnrichmentState, EnvelopeAction, EnvelopeDocument, ProviderKind,
};
use hermes::normalize;
use hermes::pipeline::Pipeline;
use hermes::reconciler::Reconciler;
use hermes::store::CatalogStore;
use hermes::{db, migrate};

/// Summarizer that fails transiently a fixed number of times, then
/// succeeds; stands in for an unreachable AI backend that recovers.
struct FlakySummarizer {
    remaining_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakySummarizer {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Summarizer for FlakySummarizer {
    fn model_id(&self) -> &str {
        "m-flaky"
    }

    async fn summarize(
        &self,
        title: &str,
        _doc_type: &str,
        _content: &str,
    ) -> Result<SummaryOutput, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AiError::Transient("backend unreachable".into()));
        }
        Ok(SummaryOutput {
            summary: format!("summary of {}", title),
            key_points: vec!["one point".into()],
            topics: vec!["testing".into()],
            tags: vec!["auto".into()],
            suggested_status: Some("In-Review".into()),
            confidence: 0.8,
            tokens_used: 42,
        })
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    store: CatalogStore,
    pipeline: Arc<Pipeline>,
    reconciler: Reconciler,
    search: SqliteSearchIndex,
    summarizer: Arc<FlakySummarizer>,
}

async fn setup(failures: u32) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let pool = db::connect(&tmp.path().join("catalog.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = CatalogStore::new(pool.clone());
    let identity = IdentityEngine::new(store.clone());
    let search = SqliteSearchIndex::new(pool.clone());
    let summarizer = Arc::new(FlakySummarizer::new(failures));

    let ai = AiConfig {
        summarize_provider: "http".to_string(),
        summarize_model: Some("m-flaky".to_string()),
        ..AiConfig::default()
    };

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        identity.clone(),
        summarizer.clone(),
        Arc::new(DisabledEmbedder),
        Arc::new(search.clone()),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        PipelineConfig::default(),
        ai,
    ));

    let reconciler = Reconciler::new(store.clone(), pipeline.clone(), 60);

    identity
        .register_project(
            "docs-internal",
            None,
            None,
            ProviderKind::Local,
            &serde_json::json!({"root": "./docs"}),
        )
        .await
        .unwrap();

    Harness {
        _tmp: tmp,
        store,
        pipeline,
        reconciler,
        search,
        summarizer,
    }
}

fn envelope(path: &str, body: &str) -> DocumentEnvelope {
    let mtime = Utc::now();
    let (_, content_hash) = normalize::hash_document(body, path, mtime, &[]);
    DocumentEnvelope {
        action: EnvelopeAction::Upsert,
        document: EnvelopeDocument {
            uuid: None,
            project_id: "docs-internal".to_string(),
            provider_type: ProviderKind::Local,
            provider_document_id: path.to_string(),
            title: path.to_string(),
            doc_type: "RFC".to_string(),
            status: "Draft".to_string(),
            content: Some(body.to_string()),
            content_hash,
            revision_reference: None,
            modified_time: mtime,
            metadata: serde_json::json!({}),
            summary: None,
            embedding: None,
        },
    }
}

#[tokio::test]
async fn test_enrichment_pending_then_recovered_by_reconciler() {
    let h = setup(1).await;

    // Admission succeeds even though the summarize backend is down.
    let result = h
        .pipeline
        .admit(&envelope("rfc-100.md", "Backend down today.\n"), None)
        .await
        .unwrap();
    assert_eq!(result.status, "created");
    let document_uuid = result.document_uuid.unwrap();

    let doc = h.store.get_document(document_uuid).await.unwrap().unwrap();
    assert_eq!(doc.enrichment_state, EnrichmentState::Pending);

    // Force the retry due now, then run a reconciler pass.
    h.store
        .set_enrichment_state(
            document_uuid,
            EnrichmentState::Pending,
            1,
            Some(Utc::now().timestamp() - 1),
        )
        .await
        .unwrap();

    let stats = h.reconciler.tick().await.unwrap();
    assert_eq!(stats.enrichment_retried, 1);
    assert_eq!(stats.enrichment_completed, 1);

    let doc = h.store.get_document(document_uuid).await.unwrap().unwrap();
    assert_eq!(doc.enrichment_state, EnrichmentState::Complete);

    let summary = h.store.latest_summary(document_uuid).await.unwrap().unwrap();
    assert!(summary.summary.contains("rfc-100.md"));
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_enrichment_cache_hit_skips_backend() {
    let h = setup(0).await;

    let env = envelope("rfc-101.md", "Cached content.\n");
    h.pipeline.admit(&env, None).await.unwrap();
    let calls_after_first = h.summarizer.calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 1);

    // Identical resubmission: the summary row for this hash already
    // exists, so the backend is not called again.
    h.pipeline.admit(&env, None).await.unwrap();
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_summary_reaches_keyword_index_after_recovery() {
    let h = setup(1).await;

    let result = h
        .pipeline
        .admit(&envelope("rfc-102.md", "Content body here.\n"), None)
        .await
        .unwrap();
    let document_uuid = result.document_uuid.unwrap();

    h.store
        .set_enrichment_state(
            document_uuid,
            EnrichmentState::Pending,
            1,
            Some(Utc::now().timestamp() - 1),
        )
        .await
        .unwrap();
    h.reconciler.tick().await.unwrap();

    // The recovered summary is searchable: the reconciler re-indexed the
    // document with the summary text attached.
    let hits = h
        .search
        .query("summary", &SearchFilters::default(), 10)
        .await
        .unwrap();
    assert!(hits.iter().any(|hit| hit.document_uuid == document_uuid));
}

#[tokio::test]
async fn test_backlog_counters() {
    let h = setup(1).await;

    h.pipeline
        .admit(&envelope("rfc-103.md", "Pending forever.\n"), None)
        .await
        .unwrap();

    let backlog = h.reconciler.backlog().await.unwrap();
    assert_eq!(backlog.enrichment_pending, 1);
    assert_eq!(backlog.conflicts_pending, 0);
}

//! End-to-end admission tests against a real on-disk catalog.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use hermes::ai::{DisabledEmbedder, DisabledSummarizer};
use hermes::config::{AiConfig, MigrationConfig, PipelineConfig};
use hermes::identity::IdentityEngine;
use hermes::index::{SearchFilters, SearchIndex, SqliteSearchIndex, SqliteVectorIndex};
use hermes::migration::MigrationEngine;
use hermes::models::{
    ConflictResolution, DocumentEnvelope, EnvelopeAction, EnvelopeDocument, ProviderKind,
    RevisionStatus, Summary,
};
use hermes::normalize;
use hermes::pipeline::Pipeline;
use hermes::store::CatalogStore;
use hermes::{db, migrate};

struct Harness {
    _tmp: tempfile::TempDir,
    store: CatalogStore,
    identity: IdentityEngine,
    pipeline: Pipeline,
    search: SqliteSearchIndex,
}

async fn setup() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let pool = db::connect(&tmp.path().join("catalog.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = CatalogStore::new(pool.clone());
    let identity = IdentityEngine::new(store.clone());
    let search = SqliteSearchIndex::new(pool.clone());

    let pipeline = Pipeline::new(
        store.clone(),
        identity.clone(),
        Arc::new(DisabledSummarizer),
        Arc::new(DisabledEmbedder),
        Arc::new(search.clone()),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        PipelineConfig::default(),
        AiConfig::default(),
    );

    identity
        .register_project(
            "docs-internal",
            Some("Docs Internal"),
            Some("DOCS"),
            ProviderKind::Local,
            &serde_json::json!({"root": "./docs-internal"}),
        )
        .await
        .unwrap();

    Harness {
        _tmp: tmp,
        store,
        identity,
        pipeline,
        search,
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

fn upsert_envelope(
    path: &str,
    title: &str,
    body: &str,
    mtime: DateTime<Utc>,
    uuid: Option<Uuid>,
) -> DocumentEnvelope {
    let (_, content_hash) = normalize::hash_document(body, title, mtime, &[]);
    DocumentEnvelope {
        action: EnvelopeAction::Upsert,
        document: EnvelopeDocument {
            uuid,
            project_id: "docs-internal".to_string(),
            provider_type: ProviderKind::Local,
            provider_document_id: path.to_string(),
            title: title.to_string(),
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
async fn test_fresh_ingest_then_duplicate() {
    let h = setup().await;

    let envelope = upsert_envelope("RFC-001.md", "RFC-001", "Hello\n", t(0), None);
    let first = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(first.status, "created");
    assert!(!first.is_duplicate);
    let document_uuid = first.document_uuid.unwrap();
    assert!(first.revision_id.is_some());

    // Identical resubmission: one revision row, flagged duplicate.
    let second = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(second.status, "duplicate");
    assert!(second.is_duplicate);
    assert_eq!(second.document_uuid, Some(document_uuid));

    let revisions = h.store.revisions_for_document(document_uuid).await.unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].status, RevisionStatus::Active);
}

#[tokio::test]
async fn test_declared_uuid_wins() {
    let h = setup().await;

    let declared = Uuid::new_v4();
    let envelope = upsert_envelope("RFC-002.md", "RFC-002", "Body\n", t(0), Some(declared));
    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(result.document_uuid, Some(declared));

    // Re-submission without the declared uuid resolves the stored binding.
    let envelope = upsert_envelope("RFC-002.md", "RFC-002", "Body\n", t(0), None);
    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(result.document_uuid, Some(declared));
    assert!(result.is_duplicate);
}

#[tokio::test]
async fn test_hash_mismatch_rejected() {
    let h = setup().await;

    let mut envelope = upsert_envelope("RFC-003.md", "RFC-003", "Hello\n", t(0), None);
    envelope.document.content_hash = format!("sha256:{}", "0".repeat(64));

    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(result.status, "rejected");
    assert!(result.errors[0].contains("hash mismatch"));
    assert_eq!(h.store.document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_hash_rejected() {
    let h = setup().await;

    let mut envelope = upsert_envelope("RFC-004.md", "RFC-004", "Hello\n", t(0), None);
    envelope.document.content_hash = "md5:nope".to_string();

    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(result.status, "rejected");
}

#[tokio::test]
async fn test_edit_creates_second_revision_and_archives_first() {
    let h = setup().await;

    let first = h
        .pipeline
        .admit(
            &upsert_envelope("RFC-005.md", "RFC-005", "Hello\n", t(0), None),
            None,
        )
        .await
        .unwrap();
    let document_uuid = first.document_uuid.unwrap();

    let second = h
        .pipeline
        .admit(
            &upsert_envelope("RFC-005.md", "RFC-005", "Hello, World\n", t(60), None),
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.status, "updated");
    assert!(!second.is_duplicate);
    assert_eq!(second.document_uuid, Some(document_uuid));

    let revisions = h.store.revisions_for_document(document_uuid).await.unwrap();
    assert_eq!(revisions.len(), 2);

    // Steady state: exactly one live revision.
    let live = h.store.live_revisions(document_uuid).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].revision_id, second.revision_id.unwrap());
}

#[tokio::test]
async fn test_unknown_project_rejected() {
    let h = setup().await;

    let mut envelope = upsert_envelope("x.md", "x", "Hello\n", t(0), None);
    envelope.document.project_id = "nope".to_string();
    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_eq!(result.status, "rejected");
    assert!(result.errors[0].contains("unknown project"));
}

#[tokio::test]
async fn test_scope_enforced() {
    let h = setup().await;

    let envelope = upsert_envelope("x.md", "x", "Hello\n", t(0), None);
    let foreign_scope = Uuid::new_v4();
    let result = h.pipeline.admit(&envelope, Some(foreign_scope)).await.unwrap();
    assert_eq!(result.status, "rejected");
}

#[tokio::test]
async fn test_delete_archives_revisions() {
    let h = setup().await;

    let created = h
        .pipeline
        .admit(
            &upsert_envelope("RFC-006.md", "RFC-006", "Hello\n", t(0), None),
            None,
        )
        .await
        .unwrap();
    let document_uuid = created.document_uuid.unwrap();

    let mut delete = upsert_envelope("RFC-006.md", "RFC-006", "Hello\n", t(0), Some(document_uuid));
    delete.action = EnvelopeAction::Delete;
    delete.document.content = None;
    delete.document.content_hash = String::new();

    let result = h.pipeline.admit(&delete, None).await.unwrap();
    assert_eq!(result.status, "updated");

    let live = h.store.live_revisions(document_uuid).await.unwrap();
    assert!(live.is_empty());
    let doc = h.store.get_document(document_uuid).await.unwrap().unwrap();
    assert_eq!(doc.status, "deleted");
}

#[tokio::test]
async fn test_keyword_search_after_admission() {
    let h = setup().await;

    h.pipeline
        .admit(
            &upsert_envelope(
                "RFC-007.md",
                "Deployment Guide",
                "Rolling deployments with canary analysis.\n",
                t(0),
                None,
            ),
            None,
        )
        .await
        .unwrap();

    let hits = h
        .search
        .query("canary", &SearchFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Deployment Guide");
}

#[tokio::test]
async fn test_cross_provider_same_hash_no_conflict() {
    let h = setup().await;

    // The same logical document observed through two providers with the
    // same content hash: two revision rows, no conflict.
    let declared = Uuid::new_v4();
    h.pipeline
        .admit(
            &upsert_envelope("rfc-008.md", "RFC-008", "Same body\n", t(0), Some(declared)),
            None,
        )
        .await
        .unwrap();

    let mut hosted = upsert_envelope("1a2b3c", "RFC-008", "Same body\n", t(0), Some(declared));
    hosted.document.provider_type = ProviderKind::HostedDocs;
    h.pipeline.admit(&hosted, None).await.unwrap();

    let revisions = h.store.revisions_for_document(declared).await.unwrap();
    assert_eq!(revisions.len(), 2);

    let conflict = h.identity.detect_conflicts(declared, 300).await.unwrap();
    assert!(conflict.is_none());
}

#[tokio::test]
async fn test_cross_provider_divergence_detected() {
    let h = setup().await;

    let declared = Uuid::new_v4();
    h.pipeline
        .admit(
            &upsert_envelope("rfc-009.md", "RFC-009", "Version A\n", t(0), Some(declared)),
            None,
        )
        .await
        .unwrap();

    let mut hosted = upsert_envelope("9z8y7x", "RFC-009", "Version B\n", t(7200), Some(declared));
    hosted.document.provider_type = ProviderKind::HostedDocs;
    h.pipeline.admit(&hosted, None).await.unwrap();

    let conflict = h
        .identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .expect("divergence must be detected");
    assert_eq!(
        conflict.conflict_type,
        hermes::models::ConflictType::ContentDivergence
    );
    assert_eq!(conflict.revisions.len(), 2);

    // Re-detection returns the same pending record instead of stacking.
    let again = h
        .identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.conflict_id, conflict.conflict_id);
}

#[tokio::test]
async fn test_divergence_parks_revisions_in_conflict() {
    let h = setup().await;

    let declared = Uuid::new_v4();
    h.pipeline
        .admit(
            &upsert_envelope("rfc-020.md", "RFC-020", "Version A\n", t(0), Some(declared)),
            None,
        )
        .await
        .unwrap();
    let mut hosted = upsert_envelope("h-020", "RFC-020", "Version B\n", t(7200), Some(declared));
    hosted.document.provider_type = ProviderKind::HostedDocs;
    h.pipeline.admit(&hosted, None).await.unwrap();

    h.identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .expect("divergence must be detected");

    // Both diverging revisions land in the terminal conflict state.
    let revisions = h.store.revisions_for_document(declared).await.unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions
        .iter()
        .all(|r| r.status == RevisionStatus::Conflict));
    assert!(h.store.live_revisions(declared).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_divergence_resolution_settles_revisions() {
    let h = setup().await;

    let declared = Uuid::new_v4();
    h.pipeline
        .admit(
            &upsert_envelope("rfc-021.md", "RFC-021", "Version A\n", t(0), Some(declared)),
            None,
        )
        .await
        .unwrap();
    let mut hosted = upsert_envelope("h-021", "RFC-021", "Version B\n", t(7200), Some(declared));
    hosted.document.provider_type = ProviderKind::HostedDocs;
    h.pipeline.admit(&hosted, None).await.unwrap();

    let conflict = h
        .identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .expect("divergence must be detected");
    assert_eq!(
        conflict.conflict_type,
        hermes::models::ConflictType::ContentDivergence
    );

    let engine = MigrationEngine::new(
        h.store.clone(),
        h.identity.clone(),
        MigrationConfig::default(),
        300,
    );
    engine
        .resolve_document(
            "docs-internal",
            declared,
            ConflictResolution::SourceWins,
            Some("keep the local copy"),
        )
        .await
        .unwrap();

    // The record is settled and the revisions converge: the primary
    // provider's revision survives, the other archives.
    assert!(h.store.pending_conflict(declared).await.unwrap().is_none());
    let live = h.store.live_revisions(declared).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].provider_type, ProviderKind::Local);
    let revisions = h.store.revisions_for_document(declared).await.unwrap();
    assert!(revisions
        .iter()
        .all(|r| r.status != RevisionStatus::Conflict));

    // Outside a migration, resolution never feeds the copy queue.
    let project = h
        .store
        .get_project_by_id("docs-internal")
        .await
        .unwrap()
        .unwrap();
    for state in ["pending", "ready", "conflict"] {
        assert!(h
            .store
            .migration_items_in_state(project.project_uuid, state)
            .await
            .unwrap()
            .is_empty());
    }

    // Re-admitting the losing content must not re-flag the conflict.
    let result = h.pipeline.admit(&hosted, None).await.unwrap();
    assert!(result.is_duplicate);
    assert!(h
        .identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .is_none());
    assert!(h.store.pending_conflict(declared).await.unwrap().is_none());
    assert!(h.store.list_conflicts(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_resolution_parks_until_superseded() {
    let h = setup().await;

    let declared = Uuid::new_v4();
    let local = upsert_envelope("rfc-022.md", "RFC-022", "Version A\n", t(0), Some(declared));
    h.pipeline.admit(&local, None).await.unwrap();
    let mut hosted = upsert_envelope("h-022", "RFC-022", "Version B\n", t(7200), Some(declared));
    hosted.document.provider_type = ProviderKind::HostedDocs;
    h.pipeline.admit(&hosted, None).await.unwrap();

    h.identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .expect("divergence must be detected");

    let engine = MigrationEngine::new(
        h.store.clone(),
        h.identity.clone(),
        MigrationConfig::default(),
        300,
    );
    engine
        .resolve_document(
            "docs-internal",
            declared,
            ConflictResolution::Manual,
            Some("fixed upstream"),
        )
        .await
        .unwrap();

    // Manual resolution acknowledges the record but leaves the parked
    // revisions alone.
    assert!(h.store.pending_conflict(declared).await.unwrap().is_none());
    let revisions = h.store.revisions_for_document(declared).await.unwrap();
    assert!(revisions
        .iter()
        .all(|r| r.status == RevisionStatus::Conflict));

    // Duplicate admissions do not re-flag the settled conflict.
    let result = h.pipeline.admit(&local, None).await.unwrap();
    assert!(result.is_duplicate);
    assert!(h
        .identity
        .detect_conflicts(declared, 300)
        .await
        .unwrap()
        .is_none());
    assert!(h.store.list_conflicts(true).await.unwrap().is_empty());

    // A fresh edit supersedes the parked row on its provider; the other
    // provider's row stays parked until its side produces new content.
    h.pipeline
        .admit(
            &upsert_envelope("rfc-022.md", "RFC-022", "Version C\n", t(9000), Some(declared)),
            None,
        )
        .await
        .unwrap();
    let live = h.store.live_revisions(declared).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].provider_type, ProviderKind::Local);
    assert_eq!(live[0].modified_time, t(9000).timestamp());

    let parked: Vec<_> = h
        .store
        .revisions_for_document(declared)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == RevisionStatus::Conflict)
        .collect();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].provider_type, ProviderKind::HostedDocs);
}

#[tokio::test]
async fn test_resolve_without_pending_conflict_is_an_error() {
    let h = setup().await;

    let created = h
        .pipeline
        .admit(
            &upsert_envelope("rfc-023.md", "RFC-023", "Hello\n", t(0), None),
            None,
        )
        .await
        .unwrap();

    let engine = MigrationEngine::new(
        h.store.clone(),
        h.identity.clone(),
        MigrationConfig::default(),
        300,
    );
    let result = engine
        .resolve_document(
            "docs-internal",
            created.document_uuid.unwrap(),
            ConflictResolution::SourceWins,
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(hermes::error::HermesError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_stateless_rescan_creates_no_revisions() {
    let h = setup().await;

    // First agent run: 3 documents.
    let bodies = [("a.md", "Alpha\n"), ("b.md", "Beta\n"), ("c.md", "Gamma\n")];
    for (path, body) in &bodies {
        h.pipeline
            .admit(&upsert_envelope(path, path, body, t(0), None), None)
            .await
            .unwrap();
    }
    assert_eq!(h.store.revision_count().await.unwrap(), 3);

    // Simulated crash and re-scan: everything resubmits, nothing changes.
    for (path, body) in &bodies {
        let result = h
            .pipeline
            .admit(&upsert_envelope(path, path, body, t(0), None), None)
            .await
            .unwrap();
        assert!(result.is_duplicate);
    }
    assert_eq!(h.store.revision_count().await.unwrap(), 3);
    assert_eq!(h.store.document_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_summary_gc_after_hash_moves_on() {
    let h = setup().await;

    let created = h
        .pipeline
        .admit(
            &upsert_envelope("RFC-010.md", "RFC-010", "Hello\n", t(0), None),
            None,
        )
        .await
        .unwrap();
    let document_uuid = created.document_uuid.unwrap();
    let old_hash = {
        let revisions = h.store.revisions_for_document(document_uuid).await.unwrap();
        revisions[0].content_hash.clone()
    };

    h.store
        .upsert_summary(&Summary {
            document_uuid,
            content_hash: old_hash.clone(),
            model_id: "m-test".to_string(),
            generated_at: 0,
            summary: "about hello".to_string(),
            key_points: vec![],
            topics: vec![],
            tags: vec![],
            suggested_status: None,
            confidence: 0.9,
            tokens_used: 10,
        })
        .await
        .unwrap();

    // Still referenced by a live revision: GC keeps it.
    let (gone, _) = h.store.gc_enrichment().await.unwrap();
    assert_eq!(gone, 0);

    // The document moves on; the old revision archives and the summary
    // loses its last live reference.
    h.pipeline
        .admit(
            &upsert_envelope("RFC-010.md", "RFC-010", "Hello, World\n", t(60), None),
            None,
        )
        .await
        .unwrap();
    let (gone, _) = h.store.gc_enrichment().await.unwrap();
    assert_eq!(gone, 1);
    assert!(h
        .store
        .get_summary(document_uuid, "m-test", &old_hash)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_last_writer_wins_is_timestamp_guarded() {
    let h = setup().await;

    let first = h
        .pipeline
        .admit(
            &upsert_envelope("RFC-011.md", "New Title", "New body\n", t(100), None),
            None,
        )
        .await
        .unwrap();
    let document_uuid = first.document_uuid.unwrap();

    // An older submission arrives late; catalog metadata must not move
    // backwards.
    h.pipeline
        .admit(
            &upsert_envelope("RFC-011.md", "Old Title", "Old body\n", t(50), None),
            None,
        )
        .await
        .unwrap();

    let doc = h.store.get_document(document_uuid).await.unwrap().unwrap();
    assert_eq!(doc.title, "New Title");
    assert_eq!(doc.modified_time, t(100).timestamp());

    // The newer revision stays live; the late arrival lands archived.
    let live = h.store.live_revisions(document_uuid).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].modified_time, t(100).timestamp());
}

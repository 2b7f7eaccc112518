//! Migration engine tests: local source to a mock hosted-docs suite.

use axum::extract::{Path, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use hermes::ai::{DisabledEmbedder, DisabledSummarizer};
use hermes::config::{AiConfig, MigrationConfig, PipelineConfig};
use hermes::identity::IdentityEngine;
use hermes::index::{SqliteSearchIndex, SqliteVectorIndex};
use hermes::migration::MigrationEngine;
use hermes::models::{
    DocumentEnvelope, EnvelopeAction, EnvelopeDocument, ProjectStatus, ProviderKind,
    ResolutionPolicy, RevisionStatus,
};
use hermes::normalize;
use hermes::pipeline::Pipeline;
use hermes::store::CatalogStore;
use hermes::{db, migrate};

// ============ Mock hosted-docs suite ============

#[derive(Clone, Default)]
struct HostedState {
    docs: Arc<Mutex<HashMap<String, (String, serde_json::Value)>>>,
    next_id: Arc<AtomicU64>,
}

async fn hosted_list(State(state): State<HostedState>) -> Json<serde_json::Value> {
    let docs = state.docs.lock().await;
    let documents: Vec<serde_json::Value> = docs
        .iter()
        .map(|(id, (_, props))| {
            serde_json::json!({
                "id": id,
                "title": props.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                "modified_time": "2026-01-01T00:00:00Z",
                "properties": props,
            })
        })
        .collect();
    Json(serde_json::json!({ "documents": documents }))
}

async fn hosted_read(
    State(state): State<HostedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    let docs = state.docs.lock().await;
    match docs.get(&id) {
        Some((content, props)) => Ok(Json(serde_json::json!({
            "content": content,
            "properties": props,
        }))),
        None => Err(axum::http::StatusCode::NOT_FOUND),
    }
}

async fn hosted_create(
    State(state): State<HostedState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let id = format!("hd-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    let content = body
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let props = body
        .get("properties")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    state.docs.lock().await.insert(id.clone(), (content, props));
    Json(serde_json::json!({ "id": id }))
}

async fn hosted_update(
    State(state): State<HostedState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> axum::http::StatusCode {
    let content = body
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let props = body
        .get("properties")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    state.docs.lock().await.insert(id, (content, props));
    axum::http::StatusCode::OK
}

async fn hosted_patch_props(
    State(state): State<HostedState>,
    Path(id): Path<String>,
    Json(kv): Json<serde_json::Value>,
) -> axum::http::StatusCode {
    let mut docs = state.docs.lock().await;
    if let Some((_, props)) = docs.get_mut(&id) {
        if let (serde_json::Value::Object(map), serde_json::Value::Object(updates)) = (props, &kv) {
            for (k, v) in updates {
                map.insert(k.clone(), v.clone());
            }
        }
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::NOT_FOUND
    }
}

async fn hosted_delete(
    State(state): State<HostedState>,
    Path(id): Path<String>,
) -> axum::http::StatusCode {
    if state.docs.lock().await.remove(&id).is_some() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::NOT_FOUND
    }
}

/// Spawn the mock suite on an ephemeral port; returns its base URL.
async fn spawn_hosted() -> (String, HostedState) {
    let state = HostedState::default();
    let app = Router::new()
        .route("/api/collections/{c}/documents", get(hosted_list))
        .route("/api/collections/{c}/documents", post(hosted_create))
        .route("/api/documents/{id}", get(hosted_read))
        .route("/api/documents/{id}", put(hosted_update))
        .route("/api/documents/{id}/properties", patch(hosted_patch_props))
        .route("/api/documents/{id}", delete(hosted_delete))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

// ============ Harness ============

struct Harness {
    _tmp: tempfile::TempDir,
    store: CatalogStore,
    pipeline: Pipeline,
    engine: MigrationEngine,
    hosted_url: String,
    hosted: HostedState,
    workspace: std::path::PathBuf,
}

async fn setup() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = tmp.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();

    let pool = db::connect(&tmp.path().join("catalog.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = CatalogStore::new(pool.clone());
    let identity = IdentityEngine::new(store.clone());

    let pipeline = Pipeline::new(
        store.clone(),
        identity.clone(),
        Arc::new(DisabledSummarizer),
        Arc::new(DisabledEmbedder),
        Arc::new(SqliteSearchIndex::new(pool.clone())),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        PipelineConfig::default(),
        AiConfig::default(),
    );

    let engine = MigrationEngine::new(store.clone(), identity.clone(), MigrationConfig::default(), 300);

    let (hosted_url, hosted) = spawn_hosted().await;

    identity
        .register_project(
            "engineering-rfcs",
            Some("Engineering RFCs"),
            Some("ERFC"),
            ProviderKind::Local,
            &serde_json::json!({
                "root": workspace.display().to_string(),
                "include_globs": ["**/*.md"],
            }),
        )
        .await
        .unwrap();

    Harness {
        _tmp: tmp,
        store,
        pipeline,
        engine,
        hosted_url,
        hosted,
        workspace,
    }
}

fn target_config(hosted_url: &str) -> serde_json::Value {
    serde_json::json!({
        "base_url": hosted_url,
        "collection_id": "rfcs",
        "api_token": "test-token",
    })
}

/// Write a workspace file and admit it through the pipeline the way an
/// agent submission would.
async fn ingest(h: &Harness, path: &str, body: &str, mtime_offset: i64) -> Uuid {
    let full = h.workspace.join(path);
    std::fs::write(&full, body).unwrap();

    let mtime = Utc.timestamp_opt(1_760_000_000 + mtime_offset, 0).unwrap();
    let title = path.trim_end_matches(".md").to_string();
    let (_, content_hash) = normalize::hash_document(body, &title, mtime, &[]);

    let envelope = DocumentEnvelope {
        action: EnvelopeAction::Upsert,
        document: EnvelopeDocument {
            uuid: None,
            project_id: "engineering-rfcs".to_string(),
            provider_type: ProviderKind::Local,
            provider_document_id: path.to_string(),
            title,
            doc_type: "RFC".to_string(),
            status: "In-Review".to_string(),
            content: Some(body.to_string()),
            content_hash,
            revision_reference: None,
            modified_time: mtime,
            metadata: serde_json::json!({}),
            summary: None,
            embedding: None,
        },
    };
    let result = h.pipeline.admit(&envelope, None).await.unwrap();
    assert_ne!(result.status, "rejected", "{:?}", result.errors);
    result.document_uuid.unwrap()
}

// ============ Tests ============

#[tokio::test]
async fn test_clean_migration_start_copy_complete() {
    let h = setup().await;

    let u1 = ingest(&h, "rfc-001.md", "# RFC 1\n\nAlpha.\n", 0).await;
    let u2 = ingest(&h, "rfc-002.md", "# RFC 2\n\nBeta.\n", 1).await;

    let status = h
        .engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::SourceWins,
        )
        .await
        .unwrap();
    assert_eq!(status.project_status, "migrating");

    // Prepare marked the existing revisions as source.
    for uuid in [u1, u2] {
        let live = h.store.live_revisions(uuid).await.unwrap();
        assert!(live.iter().any(|r| r.status == RevisionStatus::Source));
    }

    let status = h.engine.run_pending_copies("engineering-rfcs").await.unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(status.ready, 2);
    assert_eq!(status.failed, 0);

    // Each document now carries a target revision whose hash equals the
    // pre-migration source hash.
    for uuid in [u1, u2] {
        let live = h.store.live_revisions(uuid).await.unwrap();
        let source = live.iter().find(|r| r.status == RevisionStatus::Source).unwrap();
        let target = live.iter().find(|r| r.status == RevisionStatus::Target).unwrap();
        assert_eq!(source.content_hash, target.content_hash);
        assert_eq!(target.provider_type, ProviderKind::HostedDocs);
    }

    // The written copies carry the document uuid as a custom property.
    {
        let docs = h.hosted.docs.lock().await;
        assert_eq!(docs.len(), 2);
        let uuids: Vec<String> = docs
            .values()
            .filter_map(|(_, props)| {
                props
                    .get("hermes-uuid")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();
        assert!(uuids.contains(&u1.to_string()));
        assert!(uuids.contains(&u2.to_string()));
    }

    let status = h.engine.complete("engineering-rfcs").await.unwrap();
    assert_eq!(status.project_status, "completed");

    // Cutover: one canonical revision per document on the target, zero
    // live revisions on the source provider.
    for uuid in [u1, u2] {
        let live = h.store.live_revisions(uuid).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].status, RevisionStatus::Canonical);
        assert_eq!(live[0].provider_type, ProviderKind::HostedDocs);
    }

    let project = h
        .store
        .get_project_by_id("engineering-rfcs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(project.provider_type, ProviderKind::HostedDocs);
}

#[tokio::test]
async fn test_source_edit_during_migration_requeues_and_converges() {
    let h = setup().await;

    let u1 = ingest(&h, "rfc-003.md", "# RFC 3\n\nOriginal.\n", 0).await;

    h.engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::SourceWins,
        )
        .await
        .unwrap();
    h.engine.run_pending_copies("engineering-rfcs").await.unwrap();

    // The source keeps accepting edits mid-migration; the new source
    // revision re-queues the document for re-copy.
    ingest(&h, "rfc-003.md", "# RFC 3\n\nEdited after start.\n", 7200).await;

    let status = h.engine.status("engineering-rfcs").await.unwrap();
    assert_eq!(status.pending, 1);

    let status = h.engine.run_pending_copies("engineering-rfcs").await.unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(status.ready, 1);

    let live = h.store.live_revisions(u1).await.unwrap();
    let source = live.iter().find(|r| r.status == RevisionStatus::Source).unwrap();
    let target = live.iter().find(|r| r.status == RevisionStatus::Target).unwrap();
    assert_eq!(source.content_hash, target.content_hash);

    let status = h.engine.complete("engineering-rfcs").await.unwrap();
    assert_eq!(status.project_status, "completed");
    let live = h.store.live_revisions(u1).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, RevisionStatus::Canonical);
}

#[tokio::test]
async fn test_rollback_restores_source() {
    let h = setup().await;

    let u1 = ingest(&h, "rfc-004.md", "# RFC 4\n\nKeep me.\n", 0).await;

    h.engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::HashTieThenManual,
        )
        .await
        .unwrap();
    h.engine.run_pending_copies("engineering-rfcs").await.unwrap();

    let status = h
        .engine
        .rollback("engineering-rfcs", true)
        .await
        .unwrap();
    assert_eq!(status.project_status, "active");

    let live = h.store.live_revisions(u1).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, RevisionStatus::Canonical);
    assert_eq!(live[0].provider_type, ProviderKind::Local);

    // Target content was cleaned up.
    assert!(h.hosted.docs.lock().await.is_empty());

    let project = h
        .store
        .get_project_by_id("engineering-rfcs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    assert!(project.target_provider_type.is_none());
}

#[tokio::test]
async fn test_double_start_rejected() {
    let h = setup().await;
    ingest(&h, "rfc-005.md", "Body.\n", 0).await;

    h.engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::SourceWins,
        )
        .await
        .unwrap();

    let second = h
        .engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::SourceWins,
        )
        .await;
    assert!(second.is_err());
}

#[tokio::test]
async fn test_complete_blocked_while_pending() {
    let h = setup().await;
    ingest(&h, "rfc-006.md", "Body.\n", 0).await;

    h.engine
        .start(
            "engineering-rfcs",
            ProviderKind::HostedDocs,
            &target_config(&h.hosted_url),
            ResolutionPolicy::SourceWins,
        )
        .await
        .unwrap();

    // Copies have not run yet.
    assert!(h.engine.complete("engineering-rfcs").await.is_err());
}

#[tokio::test]
async fn test_migration_to_same_provider_kind_rejected() {
    let h = setup().await;
    ingest(&h, "rfc-007.md", "Body.\n", 0).await;

    let result = h
        .engine
        .start(
            "engineering-rfcs",
            ProviderKind::Local,
            &serde_json::json!({"root": "/elsewhere"}),
            ResolutionPolicy::SourceWins,
        )
        .await;
    assert!(result.is_err());
}

//! Admission and admin HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/indexer/register` | Exchange a bootstrap token for an API token |
//! | `POST` | `/indexer/heartbeat` | Agent liveness and stats |
//! | `POST` | `/indexer/projects` | Verify (or, with admin auth, register) a project |
//! | `POST` | `/indexer/documents` | Batch document submission |
//! | `GET`  | `/indexer/documents/{uuid}` | Read back a document |
//! | `POST` | `/indexer/documents/{uuid}/revisions` | Record an explicit revision |
//! | `PUT`  | `/indexer/documents/{uuid}/summary` | Attach an AI summary |
//! | `PUT`  | `/indexer/documents/{uuid}/embeddings` | Attach vectors |
//! | `POST` | `/api/search` | Keyword, vector, and hybrid search |
//! | `GET`  | `/api/documents/{uuid}` | Public read API (consumed by peers) |
//! | `GET`  | `/api/projects/{project_id}/documents` | Project listing (consumed by peers) |
//! | `GET`  | `/health` | Health check |
//!
//! The `/admin` surface is authenticated separately with the static admin
//! token: indexer listing with staleness, migration lifecycle, conflict
//! resolution, and reconciler backlog.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_request", "message": "..." } }
//! ```

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::ai::Embedder;
use crate::auth::AuthService;
use crate::config::{AiConfig, Config, SearchConfig, ServerConfig};
use crate::error::HermesError;
use crate::identity::{IdentityEngine, ProjectEvent};
use crate::index::{self, SearchFilters, SearchHit, SearchIndex, VectorIndex};
use crate::migration::{MigrationEngine, MigrationStatus};
use crate::models::{
    AgentServerConfig, ConflictRecord, ConflictResolution, DocumentEnvelope, EmbeddingPayload,
    EnvelopeAction, EnvelopeDocument, HeartbeatRequest, ProviderKind, RegisterRequest,
    RegisterResponse, ResolutionPolicy, SubmitRequest, SubmitResponse, SummaryPayload,
};
use crate::pipeline::Pipeline;
use crate::reconciler::Reconciler;
use crate::store::{Backlog, CatalogStore};
use crate::{db, migrate};

/// Shared application state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
    pub auth: AuthService,
    pub identity: IdentityEngine,
    pub pipeline: Arc<Pipeline>,
    pub migration: Arc<MigrationEngine>,
    pub reconciler: Arc<Reconciler>,
    pub embedder: Arc<dyn Embedder>,
    pub search_index: Arc<dyn SearchIndex>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub ai: AiConfig,
}

/// Build the full application state from configuration.
///
/// Verifies the schema version and ensures the instance row before
/// returning; a store migrated by an older `init` refuses to serve.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let server = config
        .server
        .clone()
        .ok_or_else(|| anyhow::anyhow!("[server] section required for hermesd"))?;

    let pool = db::connect(&config.store.path).await?;
    migrate::check_schema_version(&pool).await?;

    let store = CatalogStore::new(pool.clone());
    let identity = IdentityEngine::new(store.clone());
    identity
        .ensure_instance(&server.instance_name, &server.base_url, &server.environment)
        .await?;

    let summarizer: Arc<dyn crate::ai::Summarizer> =
        crate::ai::create_summarizer(&config.ai).map_err(|e| anyhow::anyhow!(e.to_string()))?.into();
    let embedder: Arc<dyn Embedder> =
        crate::ai::create_embedder(&config.ai).map_err(|e| anyhow::anyhow!(e.to_string()))?.into();
    let search_index: Arc<dyn SearchIndex> =
        Arc::new(crate::index::SqliteSearchIndex::new(pool.clone()));
    let vector_index: Arc<dyn VectorIndex> =
        Arc::new(crate::index::SqliteVectorIndex::new(pool.clone()));

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        identity.clone(),
        summarizer,
        embedder.clone(),
        search_index.clone(),
        vector_index.clone(),
        config.pipeline.clone(),
        config.ai.clone(),
    ));

    let migration = Arc::new(MigrationEngine::new(
        store.clone(),
        identity.clone(),
        config.migration.clone(),
        config.pipeline.concurrent_edit_window_secs,
    ));

    let reconciler = Arc::new(Reconciler::new(store.clone(), pipeline.clone(), 60));

    let auth = AuthService::new(
        store.clone(),
        server.bootstrap_token_ttl_secs,
        server.api_token_ttl_secs,
    );

    Ok(AppState {
        store,
        auth,
        identity,
        pipeline,
        migration,
        reconciler,
        embedder,
        search_index,
        vector_index,
        server,
        search: config.search.clone(),
        ai: config.ai.clone(),
    })
}

/// Assemble the router over prepared state.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/indexer/register", post(handle_register))
        .route("/indexer/heartbeat", post(handle_heartbeat))
        .route("/indexer/projects", post(handle_register_project))
        .route("/indexer/documents", post(handle_submit))
        .route("/indexer/documents/{uuid}", get(handle_read_back))
        .route(
            "/indexer/documents/{uuid}/revisions",
            post(handle_explicit_revision),
        )
        .route("/indexer/documents/{uuid}/summary", put(handle_attach_summary))
        .route(
            "/indexer/documents/{uuid}/embeddings",
            put(handle_attach_embeddings),
        )
        .route("/api/search", post(handle_search))
        .route("/api/documents/{uuid}", get(handle_api_document))
        .route(
            "/api/projects/{project_id}/documents",
            get(handle_api_project_documents),
        )
        .route("/admin/indexers", get(handle_admin_indexers))
        .route(
            "/admin/indexers/{uuid}/revoke",
            post(handle_admin_revoke_indexer),
        )
        .route("/admin/projects", post(handle_admin_register_project))
        .route(
            "/admin/projects/{project_id}/bootstrap-token",
            post(handle_admin_bootstrap_token),
        )
        .route("/admin/migrations/{project_id}", get(handle_admin_migration_status))
        .route(
            "/admin/migrations/{project_id}/start",
            post(handle_admin_migration_start),
        )
        .route(
            "/admin/migrations/{project_id}/complete",
            post(handle_admin_migration_complete),
        )
        .route(
            "/admin/migrations/{project_id}/rollback",
            post(handle_admin_migration_rollback),
        )
        .route("/admin/conflicts", get(handle_admin_conflicts))
        .route(
            "/admin/conflicts/{uuid}/resolve",
            post(handle_admin_resolve_conflict),
        )
        .route("/admin/reconciler/backlog", get(handle_admin_backlog))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

/// Start the server: build state, spawn the reconciler, serve forever.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let bind = state.server.bind.clone();

    let reconciler = state.reconciler.clone();
    tokio::spawn(async move { reconciler.run().await });

    let app = build_router(state, config.pipeline.max_body_bytes);

    tracing::info!(bind = %bind, "hermesd listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error contract ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for HermesError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Auth helpers ============

fn bearer_token(headers: &HeaderMap) -> Result<&str, HermesError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HermesError::Unauthorized("missing bearer token".into()))
}

async fn authenticate_indexer(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::models::Indexer, HermesError> {
    state.auth.authenticate_indexer(bearer_token(headers)?).await
}

fn authenticate_admin(state: &AppState, headers: &HeaderMap) -> Result<(), HermesError> {
    state
        .auth
        .verify_admin(bearer_token(headers)?, &state.server.admin_token)
}

/// Accept either a valid indexer token or the admin token.
async fn authenticate_any(state: &AppState, headers: &HeaderMap) -> Result<(), HermesError> {
    if authenticate_admin(state, headers).is_ok() {
        return Ok(());
    }
    authenticate_indexer(state, headers).await.map(|_| ())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /indexer/register ============

async fn handle_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, HermesError> {
    let bootstrap = bearer_token(&headers)?;

    let project = state
        .store
        .get_project_by_id(&request.project_id)
        .await?
        .ok_or_else(|| HermesError::Unauthorized("unknown project".into()))?;

    let (indexer, api_token, expires_at) = state
        .auth
        .register_indexer(bootstrap, &request, project.project_uuid)
        .await?;

    Ok(Json(RegisterResponse {
        indexer_uuid: indexer.indexer_uuid,
        api_token,
        expires_at: Utc
            .timestamp_opt(expires_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
        config: AgentServerConfig {
            heartbeat_interval_secs: state.server.heartbeat_interval_secs,
            batch_size: state.server.batch_size,
        },
    }))
}

// ============ POST /indexer/heartbeat ============

#[derive(Serialize)]
struct HeartbeatResponse {
    acknowledged: bool,
}

async fn handle_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;
    if indexer.indexer_uuid != request.indexer_uuid {
        return Err(HermesError::Unauthorized(
            "heartbeat indexer_uuid does not match token".into(),
        ));
    }

    state
        .store
        .record_heartbeat(
            indexer.indexer_uuid,
            &request.status,
            request.last_scan.map(|t| t.timestamp()),
            request.document_count,
        )
        .await?;

    Ok(Json(HeartbeatResponse { acknowledged: true }))
}

// ============ POST /indexer/projects ============

#[derive(Deserialize)]
struct ProjectRequest {
    project_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    short_tag: Option<String>,
    provider_type: ProviderKind,
    #[serde(default)]
    provider_config: serde_json::Value,
}

#[derive(Serialize)]
struct ProjectResponse {
    project_uuid: Uuid,
    project_id: String,
    status: String,
    outcome: String,
}

async fn handle_register_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProjectRequest>,
) -> Result<Response, HermesError> {
    // With admin auth this endpoint creates or updates; an indexer token
    // can only confirm its own project's configuration.
    if authenticate_admin(&state, &headers).is_ok() {
        return register_project_as_admin(&state, request).await;
    }

    let indexer = authenticate_indexer(&state, &headers).await?;
    let project = state
        .store
        .get_project_by_id(&request.project_id)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("project {}", request.project_id)))?;
    if project.project_uuid != indexer.project_uuid {
        return Err(HermesError::Unauthorized(
            "token is not scoped to this project".into(),
        ));
    }

    let presented_hash = crate::identity::config_hash(&request.provider_config);
    if presented_hash != project.config_hash || request.provider_type != project.provider_type {
        return Err(HermesError::Conflict(
            "provider config conflicts with the registered project".into(),
        ));
    }

    Ok((
        StatusCode::OK,
        Json(ProjectResponse {
            project_uuid: project.project_uuid,
            project_id: project.project_id,
            status: project.status.as_str().to_string(),
            outcome: "unchanged".to_string(),
        }),
    )
        .into_response())
}

async fn register_project_as_admin(
    state: &AppState,
    request: ProjectRequest,
) -> Result<Response, HermesError> {
    let (project, event) = state
        .identity
        .register_project(
            &request.project_id,
            request.title.as_deref(),
            request.short_tag.as_deref(),
            request.provider_type,
            &request.provider_config,
        )
        .await?;
    let (code, outcome) = match event {
        ProjectEvent::Created => (StatusCode::CREATED, "created"),
        ProjectEvent::Unchanged => (StatusCode::OK, "unchanged"),
        ProjectEvent::ConfigChanged => (StatusCode::OK, "config-changed"),
    };
    Ok((
        code,
        Json(ProjectResponse {
            project_uuid: project.project_uuid,
            project_id: project.project_id,
            status: project.status.as_str().to_string(),
            outcome: outcome.to_string(),
        }),
    )
        .into_response())
}

// ============ POST /indexer/documents ============

async fn handle_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;
    if indexer.indexer_uuid != request.indexer_id {
        return Err(HermesError::Unauthorized(
            "submission indexer_id does not match token".into(),
        ));
    }

    let mut results = Vec::with_capacity(request.documents.len());
    for envelope in &request.documents {
        let result = state
            .pipeline
            .admit(envelope, Some(indexer.project_uuid))
            .await?;
        results.push(result);
    }

    Ok(Json(SubmitResponse { results }))
}

// ============ Document read-back ============

#[derive(Serialize)]
pub struct RevisionView {
    pub revision_id: i64,
    pub provider_type: ProviderKind,
    pub provider_document_id: String,
    pub content_hash: String,
    pub modified_time: DateTime<Utc>,
    pub revision_reference: Option<String>,
    pub status: String,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub document_uuid: Uuid,
    pub project_id: String,
    pub title: String,
    pub doc_type: String,
    pub status: String,
    pub content: Option<String>,
    pub metadata: serde_json::Value,
    pub enrichment_state: String,
    pub modified_time: DateTime<Utc>,
    pub revisions: Vec<RevisionView>,
    pub summary: Option<SummaryView>,
}

#[derive(Serialize)]
pub struct SummaryView {
    pub model_id: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub suggested_status: Option<String>,
    pub confidence: f64,
}

async fn document_response(
    state: &AppState,
    document_uuid: Uuid,
) -> Result<DocumentResponse, HermesError> {
    let document = state
        .store
        .get_document(document_uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", document_uuid)))?;
    let project = state
        .store
        .get_project_by_uuid(document.project_uuid)
        .await?
        .ok_or_else(|| HermesError::PermanentBackend("document has no project".into()))?;
    let revisions = state.store.revisions_for_document(document_uuid).await?;
    let summary = state.store.latest_summary(document_uuid).await?;

    Ok(DocumentResponse {
        document_uuid,
        project_id: project.project_id,
        title: document.title,
        doc_type: document.doc_type,
        status: document.status,
        content: document.content,
        metadata: document.metadata,
        enrichment_state: document.enrichment_state.as_str().to_string(),
        modified_time: Utc
            .timestamp_opt(document.modified_time, 0)
            .single()
            .unwrap_or_else(Utc::now),
        revisions: revisions
            .into_iter()
            .map(|r| RevisionView {
                revision_id: r.revision_id,
                provider_type: r.provider_type,
                provider_document_id: r.provider_document_id,
                content_hash: r.content_hash,
                modified_time: Utc
                    .timestamp_opt(r.modified_time, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                revision_reference: r.revision_reference,
                status: r.status.as_str().to_string(),
            })
            .collect(),
        summary: summary.map(|s| SummaryView {
            model_id: s.model_id,
            summary: s.summary,
            key_points: s.key_points,
            topics: s.topics,
            tags: s.tags,
            suggested_status: s.suggested_status,
            confidence: s.confidence,
        }),
    })
}

async fn handle_read_back(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<DocumentResponse>, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;
    let response = document_response(&state, uuid).await?;

    // Scope: an indexer can only read documents of its own project.
    let document = state
        .store
        .get_document(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", uuid)))?;
    if document.project_uuid != indexer.project_uuid {
        return Err(HermesError::NotFound(format!("document {}", uuid)));
    }

    Ok(Json(response))
}

// ============ POST /indexer/documents/{uuid}/revisions ============

#[derive(Deserialize)]
struct ExplicitRevisionRequest {
    provider_type: ProviderKind,
    provider_document_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    content_hash: String,
    modified_time: DateTime<Utc>,
    #[serde(default)]
    revision_reference: Option<String>,
}

#[derive(Serialize)]
struct ExplicitRevisionResponse {
    document_uuid: Uuid,
    revision_id: Option<i64>,
    is_duplicate: bool,
}

async fn handle_explicit_revision(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ExplicitRevisionRequest>,
) -> Result<Response, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;

    let document = state
        .store
        .get_document(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", uuid)))?;
    if document.project_uuid != indexer.project_uuid {
        return Err(HermesError::NotFound(format!("document {}", uuid)));
    }
    let project = state
        .store
        .get_project_by_uuid(document.project_uuid)
        .await?
        .ok_or_else(|| HermesError::PermanentBackend("document has no project".into()))?;

    let envelope = DocumentEnvelope {
        action: EnvelopeAction::Upsert,
        document: EnvelopeDocument {
            uuid: Some(uuid),
            project_id: project.project_id,
            provider_type: request.provider_type,
            provider_document_id: request.provider_document_id,
            title: request.title.unwrap_or(document.title),
            doc_type: document.doc_type,
            status: document.status,
            content: request.content,
            content_hash: request.content_hash,
            revision_reference: request.revision_reference,
            modified_time: request.modified_time,
            metadata: document.metadata,
            summary: None,
            embedding: None,
        },
    };

    let result = state
        .pipeline
        .admit(&envelope, Some(indexer.project_uuid))
        .await?;
    if result.status == "rejected" {
        return Err(HermesError::InvalidRequest(result.errors.join("; ")));
    }

    Ok((
        StatusCode::CREATED,
        Json(ExplicitRevisionResponse {
            document_uuid: uuid,
            revision_id: result.revision_id,
            is_duplicate: result.is_duplicate,
        }),
    )
        .into_response())
}

// ============ PUT /indexer/documents/{uuid}/summary ============

#[derive(Serialize)]
struct AttachResponse {
    document_uuid: Uuid,
    attached: bool,
}

async fn handle_attach_summary(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<SummaryPayload>,
) -> Result<Json<AttachResponse>, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;
    let document = state
        .store
        .get_document(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", uuid)))?;
    if document.project_uuid != indexer.project_uuid {
        return Err(HermesError::NotFound(format!("document {}", uuid)));
    }

    require_live_hash(&state, uuid, &payload.content_hash).await?;

    let summary = crate::models::Summary {
        document_uuid: uuid,
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
    state.store.upsert_summary(&summary).await?;

    let mut tx = state.store.begin().await?;
    CatalogStore::enqueue_index_write(&mut tx, uuid, "keyword").await?;
    tx.commit().await?;
    state.pipeline.drain_outbox_for(uuid).await;

    Ok(Json(AttachResponse {
        document_uuid: uuid,
        attached: true,
    }))
}

// ============ PUT /indexer/documents/{uuid}/embeddings ============

async fn handle_attach_embeddings(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<EmbeddingPayload>,
) -> Result<Json<AttachResponse>, HermesError> {
    let indexer = authenticate_indexer(&state, &headers).await?;
    let document = state
        .store
        .get_document(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", uuid)))?;
    if document.project_uuid != indexer.project_uuid {
        return Err(HermesError::NotFound(format!("document {}", uuid)));
    }

    if payload.content_vector.len() != payload.dimensions {
        return Err(HermesError::Conflict(format!(
            "content_vector has {} dims, payload declares {}",
            payload.content_vector.len(),
            payload.dimensions
        )));
    }
    for chunk in &payload.chunks {
        if chunk.vector.len() != payload.dimensions {
            return Err(HermesError::Conflict(format!(
                "chunk {} has {} dims, payload declares {}",
                chunk.index,
                chunk.vector.len(),
                payload.dimensions
            )));
        }
    }
    if state.ai.embed_enabled() {
        if let Some(expected) = state.ai.embed_dims {
            if payload.dimensions != expected {
                return Err(HermesError::Conflict(format!(
                    "payload dimensions {} do not match configured {}",
                    payload.dimensions, expected
                )));
            }
        }
    }

    require_live_hash(&state, uuid, &payload.content_hash).await?;

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
    state
        .store
        .upsert_embedding(
            uuid,
            &payload.content_hash,
            &payload.model,
            payload.dimensions,
            &crate::ai::vec_to_blob(&payload.content_vector),
            &chunks,
        )
        .await?;

    let mut tx = state.store.begin().await?;
    CatalogStore::enqueue_index_write(&mut tx, uuid, "vector").await?;
    tx.commit().await?;
    state.pipeline.drain_outbox_for(uuid).await;

    Ok(Json(AttachResponse {
        document_uuid: uuid,
        attached: true,
    }))
}

async fn require_live_hash(
    state: &AppState,
    document_uuid: Uuid,
    content_hash: &str,
) -> Result<(), HermesError> {
    let live = state.store.live_revisions(document_uuid).await?;
    if live.iter().any(|r| r.content_hash == content_hash) {
        Ok(())
    } else {
        Err(HermesError::Conflict(format!(
            "content_hash {} does not match any live revision",
            content_hash
        )))
    }
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    limit: Option<i64>,
    /// Vector weight for hybrid mode; defaults to the configured value.
    #[serde(default)]
    vector_weight: Option<f64>,
    #[serde(default)]
    filters: Option<SearchRequestFilters>,
}

#[derive(Deserialize, Default)]
struct SearchRequestFilters {
    project_id: Option<String>,
    doc_type: Option<String>,
    status: Option<String>,
}

fn default_mode() -> String {
    "keyword".to_string()
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HermesError> {
    authenticate_any(&state, &headers).await?;

    if request.query.trim().is_empty() {
        return Err(HermesError::InvalidRequest("query must not be empty".into()));
    }
    match request.mode.as_str() {
        "keyword" | "vector" | "hybrid" => {}
        other => {
            return Err(HermesError::InvalidRequest(format!(
                "unknown search mode: {}. Use keyword, vector, or hybrid.",
                other
            )))
        }
    }

    let filters = request.filters.unwrap_or_default();
    let mut resolved = SearchFilters {
        project_uuid: None,
        doc_type: filters.doc_type,
        status: filters.status,
    };
    if let Some(project_id) = &filters.project_id {
        let project = state
            .store
            .get_project_by_id(project_id)
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("project {}", project_id)))?;
        resolved.project_uuid = Some(project.project_uuid);
    }

    let limit = request.limit.unwrap_or(state.search.final_limit).max(1);

    let results = match request.mode.as_str() {
        "keyword" => {
            let mut hits = state
                .search_index
                .query(&request.query, &resolved, state.search.candidate_k_keyword)
                .await?;
            hits = index::merge_hits(hits, Vec::new(), 0.0, limit);
            hits
        }
        mode => {
            if !state.ai.embed_enabled() {
                return Err(HermesError::InvalidRequest(format!(
                    "mode '{}' requires an embedding provider",
                    mode
                )));
            }
            let embedded = state
                .embedder
                .embed(&request.query, usize::MAX / 2, 0)
                .await
                .map_err(|e| HermesError::TransientBackend(e.to_string()))?;
            let weight = if mode == "vector" {
                1.0
            } else {
                request
                    .vector_weight
                    .unwrap_or(state.search.hybrid_vector_weight)
                    .clamp(0.0, 1.0)
            };
            index::hybrid_search(
                state.search_index.as_ref(),
                state.vector_index.as_ref(),
                &request.query,
                Some(&embedded.content_vector),
                weight,
                &resolved,
                state
                    .search
                    .candidate_k_keyword
                    .max(state.search.candidate_k_vector),
                limit,
            )
            .await?
        }
    };

    Ok(Json(SearchResponse { results }))
}

// ============ Public read API (consumed by peer instances) ============

async fn handle_api_document(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<DocumentResponse>, HermesError> {
    authenticate_any(&state, &headers).await?;
    Ok(Json(document_response(&state, uuid).await?))
}

#[derive(Serialize)]
struct ProjectDocumentsResponse {
    documents: Vec<ProjectDocumentView>,
}

#[derive(Serialize)]
struct ProjectDocumentView {
    document_uuid: Uuid,
    title: String,
    doc_type: String,
    status: String,
    modified_time: DateTime<Utc>,
}

async fn handle_api_project_documents(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProjectDocumentsResponse>, HermesError> {
    authenticate_any(&state, &headers).await?;

    let project = state
        .store
        .get_project_by_id(&project_id)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("project {}", project_id)))?;

    let documents = state
        .store
        .list_documents_by_project(project.project_uuid)
        .await?
        .into_iter()
        .map(|d| ProjectDocumentView {
            document_uuid: d.document_uuid,
            title: d.title,
            doc_type: d.doc_type,
            status: d.status,
            modified_time: Utc
                .timestamp_opt(d.modified_time, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
        .collect();

    Ok(Json(ProjectDocumentsResponse { documents }))
}

// ============ Admin surface ============

#[derive(Serialize)]
struct IndexerView {
    indexer_uuid: Uuid,
    indexer_type: String,
    project_uuid: Uuid,
    workspace_scope: String,
    hostname: Option<String>,
    version: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_scan: Option<DateTime<Utc>>,
    document_count: i64,
    reported_status: String,
    revoked: bool,
    /// No heartbeat within 3 × the interval; reported numbers untrusted.
    stale: bool,
}

#[derive(Serialize)]
struct IndexersResponse {
    indexers: Vec<IndexerView>,
}

async fn handle_admin_indexers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<IndexersResponse>, HermesError> {
    authenticate_admin(&state, &headers)?;

    let stale_after = 3 * state.server.heartbeat_interval_secs as i64;
    let now = Utc::now().timestamp();

    let indexers = state
        .store
        .list_indexers()
        .await?
        .into_iter()
        .map(|i| {
            let stale = match i.last_heartbeat {
                Some(t) => now - t > stale_after,
                None => now - i.created_at > stale_after,
            };
            IndexerView {
                indexer_uuid: i.indexer_uuid,
                indexer_type: i.indexer_type,
                project_uuid: i.project_uuid,
                workspace_scope: i.workspace_scope,
                hostname: i.hostname,
                version: i.version,
                last_heartbeat: i
                    .last_heartbeat
                    .and_then(|t| Utc.timestamp_opt(t, 0).single()),
                last_scan: i.last_scan.and_then(|t| Utc.timestamp_opt(t, 0).single()),
                document_count: i.document_count,
                reported_status: i.reported_status,
                revoked: i.revoked,
                stale,
            }
        })
        .collect();

    Ok(Json(IndexersResponse { indexers }))
}

async fn handle_admin_revoke_indexer(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, HermesError> {
    authenticate_admin(&state, &headers)?;
    state
        .store
        .get_indexer(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("indexer {}", uuid)))?;
    state.store.revoke_indexer(uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_admin_register_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProjectRequest>,
) -> Result<Response, HermesError> {
    authenticate_admin(&state, &headers)?;
    register_project_as_admin(&state, request).await
}

#[derive(Serialize)]
struct BootstrapTokenResponse {
    registration_token: String,
    expires_in_secs: i64,
}

async fn handle_admin_bootstrap_token(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BootstrapTokenResponse>, HermesError> {
    authenticate_admin(&state, &headers)?;
    let project = state
        .store
        .get_project_by_id(&project_id)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("project {}", project_id)))?;
    let token = state.auth.issue_bootstrap_token(project.project_uuid).await?;
    Ok(Json(BootstrapTokenResponse {
        registration_token: token,
        expires_in_secs: state.server.bootstrap_token_ttl_secs,
    }))
}

async fn handle_admin_migration_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MigrationStatus>, HermesError> {
    authenticate_admin(&state, &headers)?;
    Ok(Json(state.migration.status(&project_id).await?))
}

#[derive(Deserialize)]
struct MigrationStartRequest {
    target_provider_type: ProviderKind,
    #[serde(default)]
    target_provider_config: serde_json::Value,
    resolution_policy: ResolutionPolicy,
}

async fn handle_admin_migration_start(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<MigrationStartRequest>,
) -> Result<Json<MigrationStatus>, HermesError> {
    authenticate_admin(&state, &headers)?;
    let status = state
        .migration
        .start(
            &project_id,
            request.target_provider_type,
            &request.target_provider_config,
            request.resolution_policy,
        )
        .await?;
    let project = state
        .store
        .get_project_by_id(&project_id)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("project {}", project_id)))?;
    state.migration.spawn_worker(project.project_uuid);
    Ok(Json(status))
}

async fn handle_admin_migration_complete(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MigrationStatus>, HermesError> {
    authenticate_admin(&state, &headers)?;
    Ok(Json(state.migration.complete(&project_id).await?))
}

#[derive(Deserialize, Default)]
struct RollbackRequest {
    #[serde(default)]
    delete_target_content: bool,
}

async fn handle_admin_migration_rollback(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<MigrationStatus>, HermesError> {
    authenticate_admin(&state, &headers)?;
    Ok(Json(
        state
            .migration
            .rollback(&project_id, request.delete_target_content)
            .await?,
    ))
}

#[derive(Serialize)]
struct ConflictsResponse {
    conflicts: Vec<ConflictRecord>,
}

async fn handle_admin_conflicts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConflictsResponse>, HermesError> {
    authenticate_admin(&state, &headers)?;
    let conflicts = state.store.list_conflicts(false).await?;
    Ok(Json(ConflictsResponse { conflicts }))
}

#[derive(Deserialize)]
struct ResolveConflictRequest {
    /// `source-wins`, `target-wins`, or `manual`.
    strategy: String,
    #[serde(default)]
    note: Option<String>,
}

async fn handle_admin_resolve_conflict(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ResolveConflictRequest>,
) -> Result<StatusCode, HermesError> {
    authenticate_admin(&state, &headers)?;

    let strategy = match request.strategy.as_str() {
        "source-wins" => ConflictResolution::SourceWins,
        "target-wins" => ConflictResolution::TargetWins,
        "manual" => ConflictResolution::Manual,
        other => {
            return Err(HermesError::InvalidRequest(format!(
                "unknown resolution strategy: {}",
                other
            )))
        }
    };

    let document = state
        .store
        .get_document(uuid)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("document {}", uuid)))?;
    let project = state
        .store
        .get_project_by_uuid(document.project_uuid)
        .await?
        .ok_or_else(|| HermesError::PermanentBackend("document has no project".into()))?;

    state
        .migration
        .resolve_document(&project.project_id, uuid, strategy, request.note.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_admin_backlog(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Backlog>, HermesError> {
    authenticate_admin(&state, &headers)?;
    Ok(Json(state.reconciler.backlog().await?))
}

//! Catalog schema migrations.
//!
//! Creates all tables idempotently and pins a schema version in the `meta`
//! key-value area. The server refuses to serve traffic when the stored
//! version is below [`MIN_SCHEMA_VERSION`]; migrations run via `hermesd
//! init`, never implicitly at serve time, so two processes cannot race on
//! DDL.

use sqlx::SqlitePool;

use crate::error::{HermesError, Result};

/// Version written by this build's `init`.
pub const SCHEMA_VERSION: i64 = 1;

/// Oldest schema this build will serve against.
pub const MIN_SCHEMA_VERSION: i64 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instance (
            instance_uuid TEXT PRIMARY KEY,
            instance_name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            environment TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_uuid TEXT PRIMARY KEY,
            project_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            short_tag TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            provider_type TEXT NOT NULL,
            provider_config TEXT NOT NULL DEFAULT '{}',
            config_hash TEXT NOT NULL,
            target_provider_type TEXT,
            target_provider_config TEXT,
            resolution_policy TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_uuid TEXT PRIMARY KEY,
            project_uuid TEXT NOT NULL,
            title TEXT NOT NULL,
            doc_type TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}',
            content TEXT,
            enrichment_state TEXT NOT NULL DEFAULT 'pending',
            enrichment_attempts INTEGER NOT NULL DEFAULT 0,
            enrichment_next_retry INTEGER,
            modified_time INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (project_uuid) REFERENCES projects(project_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Binding of a provider-native id to a document UUID. Consulted by
    // identity resolution before any revision exists.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_bindings (
            project_uuid TEXT NOT NULL,
            provider_type TEXT NOT NULL,
            provider_document_id TEXT NOT NULL,
            document_uuid TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(project_uuid, provider_type, provider_document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            revision_id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_uuid TEXT NOT NULL,
            project_uuid TEXT NOT NULL,
            provider_type TEXT NOT NULL,
            provider_document_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            modified_time INTEGER NOT NULL,
            revision_reference TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_uuid, project_uuid, provider_type, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            document_uuid TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            model_id TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            summary TEXT NOT NULL,
            key_points TEXT NOT NULL DEFAULT '[]',
            topics TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            suggested_status TEXT,
            confidence REAL NOT NULL DEFAULT 0,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            UNIQUE(document_uuid, model_id, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            document_uuid TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            model_id TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            content_vector BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_uuid, model_id, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_chunks (
            document_uuid TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            model_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_pos INTEGER NOT NULL DEFAULT 0,
            end_pos INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL DEFAULT '',
            vector BLOB NOT NULL,
            UNIQUE(document_uuid, model_id, content_hash, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexers (
            indexer_uuid TEXT PRIMARY KEY,
            indexer_type TEXT NOT NULL,
            project_uuid TEXT NOT NULL,
            workspace_scope TEXT NOT NULL,
            token_hash TEXT NOT NULL,
            hostname TEXT,
            version TEXT,
            created_at INTEGER NOT NULL,
            last_heartbeat INTEGER,
            last_scan INTEGER,
            document_count INTEGER NOT NULL DEFAULT 0,
            reported_status TEXT NOT NULL DEFAULT 'healthy',
            revoked INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bootstrap_tokens (
            token_hash TEXT PRIMARY KEY,
            project_uuid TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conflicts (
            conflict_id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_uuid TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            revisions TEXT NOT NULL DEFAULT '[]',
            resolution TEXT NOT NULL DEFAULT 'pending',
            note TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-document migration progress for the active migration of a project.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_items (
            project_uuid TEXT NOT NULL,
            document_uuid TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_uuid, document_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Outbox for index writes: enqueued in the same transaction as the
    // catalog write so a crash between commit and index delivery cannot
    // lose work.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_outbox (
            outbox_id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_uuid TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_attempt INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual tables are not idempotent natively, probe first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='search_index'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE search_index USING fts5(
                document_uuid UNINDEXED,
                title,
                body,
                summary,
                tags,
                doc_type UNINDEXED,
                project_uuid UNINDEXED,
                status UNINDEXED
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_index (
            document_uuid TEXT PRIMARY KEY,
            model_id TEXT NOT NULL,
            vector BLOB NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            doc_type TEXT NOT NULL DEFAULT '',
            project_uuid TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_uuid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_revisions_document ON revisions(document_uuid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_revisions_status ON revisions(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_document ON conflicts(document_uuid, resolution)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_next ON index_outbox(next_attempt)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_enrichment ON documents(enrichment_state, enrichment_next_retry)",
    )
    .execute(pool)
    .await?;

    set_schema_version(pool, SCHEMA_VERSION).await?;

    Ok(())
}

pub async fn schema_version(pool: &SqlitePool) -> Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
        .fetch_optional(pool)
        .await?;
    Ok(value.and_then(|v| v.parse::<i64>().ok()))
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meta (key, value) VALUES ('schema_version', ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(version.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Verify the store was migrated by a compatible `init`.
///
/// Called at server startup; a missing or stale version is a permanent
/// backend error and the server must not accept traffic.
pub async fn check_schema_version(pool: &SqlitePool) -> Result<()> {
    let version = match schema_version(pool).await {
        Ok(v) => v,
        Err(_) => None,
    };
    match version {
        Some(v) if v >= MIN_SCHEMA_VERSION => Ok(()),
        Some(v) => Err(HermesError::PermanentBackend(format!(
            "schema version {} is below the minimum {}; run `hermesd init`",
            v, MIN_SCHEMA_VERSION
        ))),
        None => Err(HermesError::PermanentBackend(
            "store is not initialized; run `hermesd init`".to_string(),
        )),
    }
}

//! Typed access to the catalog store.
//!
//! Every table from the schema has its reader/writer here so the rest of
//! the system never touches SQL. Mutations that must be atomic with other
//! writes take a `&mut SqliteConnection` and run inside a caller-owned
//! transaction; standalone operations take the pool.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::{
    ConflictRecord, ConflictResolution, ConflictRevision, ConflictType, Document, EnrichmentState,
    Indexer, Instance, Project, ProjectStatus, ProviderKind, ResolutionPolicy, Revision,
    RevisionStatus, Summary,
};

/// Handle to the catalog store; cheap to clone.
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| HermesError::PermanentBackend(format!("corrupt uuid in store: {}", e)))
}

fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl CatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ============ Instance ============

    pub async fn get_instance(&self) -> Result<Option<Instance>> {
        let row = sqlx::query("SELECT * FROM instance LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_instance).transpose()
    }

    pub async fn insert_instance(&self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance (instance_uuid, instance_name, base_url, environment, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(instance.instance_uuid.to_string())
        .bind(&instance.instance_name)
        .bind(&instance.base_url)
        .bind(&instance.environment)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Projects ============

    pub async fn get_project_by_id(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_project).transpose()
    }

    pub async fn get_project_by_uuid(&self, project_uuid: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE project_uuid = ?")
            .bind(project_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_project).transpose()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY project_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_project).collect()
    }

    pub async fn insert_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects
                (project_uuid, project_id, title, short_tag, status, provider_type,
                 provider_config, config_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project.project_uuid.to_string())
        .bind(&project.project_id)
        .bind(&project.title)
        .bind(&project.short_tag)
        .bind(project.status.as_str())
        .bind(project.provider_type.as_str())
        .bind(project.provider_config.to_string())
        .bind(&project.config_hash)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_project_config(
        &self,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        provider_config: &serde_json::Value,
        config_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET provider_type = ?, provider_config = ?, config_hash = ?, updated_at = ?
            WHERE project_uuid = ?
            "#,
        )
        .bind(provider_type.as_str())
        .bind(provider_config.to_string())
        .bind(config_hash)
        .bind(now())
        .bind(project_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_project_status(
        &self,
        project_uuid: Uuid,
        status: ProjectStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE project_uuid = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(project_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Attach the migration target provider to a project.
    pub async fn set_project_target(
        &self,
        project_uuid: Uuid,
        target_type: ProviderKind,
        target_config: &serde_json::Value,
        policy: ResolutionPolicy,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET target_provider_type = ?, target_provider_config = ?,
                resolution_policy = ?, updated_at = ?
            WHERE project_uuid = ?
            "#,
        )
        .bind(target_type.as_str())
        .bind(target_config.to_string())
        .bind(policy.as_str())
        .bind(now())
        .bind(project_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_project_target(&self, project_uuid: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET target_provider_type = NULL, target_provider_config = NULL,
                resolution_policy = NULL, updated_at = ?
            WHERE project_uuid = ?
            "#,
        )
        .bind(now())
        .bind(project_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cut a project over to its migration target provider.
    pub async fn switch_project_provider(&self, project_uuid: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET provider_type = target_provider_type,
                provider_config = target_provider_config,
                target_provider_type = NULL,
                target_provider_config = NULL,
                resolution_policy = NULL,
                updated_at = ?
            WHERE project_uuid = ? AND target_provider_type IS NOT NULL
            "#,
        )
        .bind(now())
        .bind(project_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Document bindings ============

    pub async fn get_binding(
        conn: &mut SqliteConnection,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        provider_document_id: &str,
    ) -> Result<Option<Uuid>> {
        let value: Option<String> = sqlx::query_scalar(
            r#"
            SELECT document_uuid FROM document_bindings
            WHERE project_uuid = ? AND provider_type = ? AND provider_document_id = ?
            "#,
        )
        .bind(project_uuid.to_string())
        .bind(provider_type.as_str())
        .bind(provider_document_id)
        .fetch_optional(&mut *conn)
        .await?;
        value.as_deref().map(parse_uuid).transpose()
    }

    pub async fn insert_binding(
        conn: &mut SqliteConnection,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        provider_document_id: &str,
        document_uuid: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_bindings
                (project_uuid, provider_type, provider_document_id, document_uuid, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_uuid, provider_type, provider_document_id) DO NOTHING
            "#,
        )
        .bind(project_uuid.to_string())
        .bind(provider_type.as_str())
        .bind(provider_document_id)
        .bind(document_uuid.to_string())
        .bind(now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Whether a UUID is already bound to a different provider document in
    /// the same (project, provider) scope.
    pub async fn uuid_bound_elsewhere(
        conn: &mut SqliteConnection,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        provider_document_id: &str,
        document_uuid: Uuid,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM document_bindings
            WHERE project_uuid = ? AND provider_type = ?
              AND document_uuid = ? AND provider_document_id != ?
            "#,
        )
        .bind(project_uuid.to_string())
        .bind(provider_type.as_str())
        .bind(document_uuid.to_string())
        .bind(provider_document_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    // ============ Documents ============

    pub async fn get_document(&self, document_uuid: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE document_uuid = ?")
            .bind(document_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    pub async fn list_documents_by_project(&self, project_uuid: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE project_uuid = ? AND status != 'deleted' ORDER BY document_uuid",
        )
        .bind(project_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    /// Timestamp-guarded last-writer-wins upsert of document metadata.
    ///
    /// Identity fields never change; non-identity fields only move forward
    /// when the submission's `modified_time` is not older than the stored
    /// one.
    pub async fn upsert_document(
        conn: &mut SqliteConnection,
        doc: &Document,
    ) -> Result<bool> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT modified_time FROM documents WHERE document_uuid = ?")
                .bind(doc.document_uuid.to_string())
                .fetch_optional(&mut *conn)
                .await?;

        match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents
                        (document_uuid, project_uuid, title, doc_type, status, metadata,
                         content, enrichment_state, modified_time, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(doc.document_uuid.to_string())
                .bind(doc.project_uuid.to_string())
                .bind(&doc.title)
                .bind(&doc.doc_type)
                .bind(&doc.status)
                .bind(doc.metadata.to_string())
                .bind(&doc.content)
                .bind(doc.enrichment_state.as_str())
                .bind(doc.modified_time)
                .bind(doc.created_at)
                .bind(doc.updated_at)
                .execute(&mut *conn)
                .await?;
                Ok(true)
            }
            Some(stored_mtime) if doc.modified_time >= stored_mtime => {
                // Hash-only submissions carry no content; keep what the
                // catalog already retained.
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET title = ?, doc_type = ?, status = ?, metadata = ?,
                        content = COALESCE(?, content),
                        enrichment_state = ?, modified_time = ?, updated_at = ?
                    WHERE document_uuid = ?
                    "#,
                )
                .bind(&doc.title)
                .bind(&doc.doc_type)
                .bind(&doc.status)
                .bind(doc.metadata.to_string())
                .bind(&doc.content)
                .bind(doc.enrichment_state.as_str())
                .bind(doc.modified_time)
                .bind(now())
                .bind(doc.document_uuid.to_string())
                .execute(&mut *conn)
                .await?;
                Ok(false)
            }
            Some(_) => Ok(false),
        }
    }

    pub async fn set_document_status(&self, document_uuid: Uuid, status: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE document_uuid = ?")
            .bind(status)
            .bind(now())
            .bind(document_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_enrichment_state(
        &self,
        document_uuid: Uuid,
        state: EnrichmentState,
        attempts: i64,
        next_retry: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET enrichment_state = ?, enrichment_attempts = ?, enrichment_next_retry = ?,
                updated_at = ?
            WHERE document_uuid = ?
            "#,
        )
        .bind(state.as_str())
        .bind(attempts)
        .bind(next_retry)
        .bind(now())
        .bind(document_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Documents whose enrichment is pending and due for another attempt.
    pub async fn enrichment_due(&self, now_ts: i64, limit: i64) -> Result<Vec<(Document, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE enrichment_state = 'pending'
              AND (enrichment_next_retry IS NULL OR enrichment_next_retry <= ?)
              AND status != 'deleted'
            ORDER BY enrichment_next_retry
            LIMIT ?
            "#,
        )
        .bind(now_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let attempts: i64 = row.get("enrichment_attempts");
                Ok((row_to_document(row)?, attempts))
            })
            .collect()
    }

    // ============ Revisions ============

    pub async fn find_revision(
        conn: &mut SqliteConnection,
        document_uuid: Uuid,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        content_hash: &str,
    ) -> Result<Option<Revision>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM revisions
            WHERE document_uuid = ? AND project_uuid = ? AND provider_type = ? AND content_hash = ?
            "#,
        )
        .bind(document_uuid.to_string())
        .bind(project_uuid.to_string())
        .bind(provider_type.as_str())
        .bind(content_hash)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(row_to_revision).transpose()
    }

    /// Insert a revision row, treating a uniqueness violation as "already
    /// recorded". Returns the row and whether this call created it.
    pub async fn insert_revision(
        conn: &mut SqliteConnection,
        rev: &Revision,
    ) -> Result<(Revision, bool)> {
        let result = sqlx::query(
            r#"
            INSERT INTO revisions
                (document_uuid, project_uuid, provider_type, provider_document_id,
                 content_hash, modified_time, revision_reference, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_uuid, project_uuid, provider_type, content_hash) DO NOTHING
            "#,
        )
        .bind(rev.document_uuid.to_string())
        .bind(rev.project_uuid.to_string())
        .bind(rev.provider_type.as_str())
        .bind(&rev.provider_document_id)
        .bind(&rev.content_hash)
        .bind(rev.modified_time)
        .bind(&rev.revision_reference)
        .bind(rev.status.as_str())
        .bind(rev.created_at)
        .bind(rev.updated_at)
        .execute(&mut *conn)
        .await?;

        let created = result.rows_affected() > 0;
        let stored = Self::find_revision(
            conn,
            rev.document_uuid,
            rev.project_uuid,
            rev.provider_type,
            &rev.content_hash,
        )
        .await?
        .ok_or_else(|| {
            HermesError::PermanentBackend("revision vanished after insert".to_string())
        })?;
        Ok((stored, created))
    }

    pub async fn get_revision(&self, revision_id: i64) -> Result<Option<Revision>> {
        let row = sqlx::query("SELECT * FROM revisions WHERE revision_id = ?")
            .bind(revision_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_revision).transpose()
    }

    pub async fn revisions_for_document(&self, document_uuid: Uuid) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            "SELECT * FROM revisions WHERE document_uuid = ? ORDER BY revision_id",
        )
        .bind(document_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_revision).collect()
    }

    pub async fn live_revisions(&self, document_uuid: Uuid) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM revisions
            WHERE document_uuid = ? AND status IN ('active', 'source', 'target', 'canonical')
            ORDER BY revision_id
            "#,
        )
        .bind(document_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_revision).collect()
    }

    pub async fn set_revision_status(
        &self,
        revision_id: i64,
        status: RevisionStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE revisions SET status = ?, updated_at = ? WHERE revision_id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(revision_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flip every revision of one document from one status to another.
    pub async fn transition_document_revisions(
        &self,
        document_uuid: Uuid,
        from: RevisionStatus,
        to: RevisionStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE revisions SET status = ?, updated_at = ? WHERE document_uuid = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now())
        .bind(document_uuid.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Flip every revision in a project from one status to another.
    pub async fn transition_project_revisions(
        &self,
        project_uuid: Uuid,
        from: RevisionStatus,
        to: RevisionStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE revisions SET status = ?, updated_at = ? WHERE project_uuid = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now())
        .bind(project_uuid.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Archive all live and parked revisions of a document (delete
    /// detection).
    pub async fn archive_document_revisions(&self, document_uuid: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE revisions SET status = 'archived', updated_at = ?
            WHERE document_uuid = ?
              AND status IN ('active', 'source', 'target', 'canonical', 'conflict')
            "#,
        )
        .bind(now())
        .bind(document_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Park revisions in the terminal `conflict` state. Only rows still
    /// live move; superseded participants are left alone.
    pub async fn mark_revisions_conflict(&self, revision_ids: &[i64]) -> Result<u64> {
        let mut affected = 0u64;
        for revision_id in revision_ids {
            let result = sqlx::query(
                r#"
                UPDATE revisions SET status = 'conflict', updated_at = ?
                WHERE revision_id = ? AND status IN ('active', 'source', 'target', 'canonical')
                "#,
            )
            .bind(now())
            .bind(revision_id)
            .execute(&self.pool)
            .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    /// Revisions of a document currently parked in the `conflict` state.
    pub async fn conflict_revisions(&self, document_uuid: Uuid) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            "SELECT * FROM revisions WHERE document_uuid = ? AND status = 'conflict' ORDER BY revision_id",
        )
        .bind(document_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_revision).collect()
    }

    // ============ Summaries ============

    pub async fn get_summary(
        &self,
        document_uuid: Uuid,
        model_id: &str,
        content_hash: &str,
    ) -> Result<Option<Summary>> {
        let row = sqlx::query(
            "SELECT * FROM summaries WHERE document_uuid = ? AND model_id = ? AND content_hash = ?",
        )
        .bind(document_uuid.to_string())
        .bind(model_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_summary).transpose()
    }

    pub async fn latest_summary(&self, document_uuid: Uuid) -> Result<Option<Summary>> {
        let row = sqlx::query(
            "SELECT * FROM summaries WHERE document_uuid = ? ORDER BY generated_at DESC LIMIT 1",
        )
        .bind(document_uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_summary).transpose()
    }

    pub async fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summaries
                (document_uuid, content_hash, model_id, generated_at, summary,
                 key_points, topics, tags, suggested_status, confidence, tokens_used)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_uuid, model_id, content_hash) DO UPDATE SET
                generated_at = excluded.generated_at,
                summary = excluded.summary,
                key_points = excluded.key_points,
                topics = excluded.topics,
                tags = excluded.tags,
                suggested_status = excluded.suggested_status,
                confidence = excluded.confidence,
                tokens_used = excluded.tokens_used
            "#,
        )
        .bind(summary.document_uuid.to_string())
        .bind(&summary.content_hash)
        .bind(&summary.model_id)
        .bind(summary.generated_at)
        .bind(&summary.summary)
        .bind(serde_json::to_string(&summary.key_points).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&summary.topics).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&summary.tags).unwrap_or_else(|_| "[]".into()))
        .bind(&summary.suggested_status)
        .bind(summary.confidence)
        .bind(summary.tokens_used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Embeddings ============

    pub async fn has_embedding(
        &self,
        document_uuid: Uuid,
        model_id: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings WHERE document_uuid = ? AND model_id = ? AND content_hash = ?",
        )
        .bind(document_uuid.to_string())
        .bind(model_id)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn get_embedding_vector(
        &self,
        document_uuid: Uuid,
        model_id: &str,
        content_hash: &str,
    ) -> Result<Option<(usize, Vec<u8>)>> {
        let row = sqlx::query(
            "SELECT dimensions, content_vector FROM embeddings WHERE document_uuid = ? AND model_id = ? AND content_hash = ?",
        )
        .bind(document_uuid.to_string())
        .bind(model_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| {
            let dims: i64 = r.get("dimensions");
            let blob: Vec<u8> = r.get("content_vector");
            (dims as usize, blob)
        }))
    }

    pub async fn upsert_embedding(
        &self,
        document_uuid: Uuid,
        content_hash: &str,
        model_id: &str,
        dimensions: usize,
        content_vector: &[u8],
        chunks: &[(i64, i64, i64, String, Vec<u8>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings
                (document_uuid, content_hash, model_id, dimensions, content_vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_uuid, model_id, content_hash) DO UPDATE SET
                dimensions = excluded.dimensions,
                content_vector = excluded.content_vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(document_uuid.to_string())
        .bind(content_hash)
        .bind(model_id)
        .bind(dimensions as i64)
        .bind(content_vector)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM embedding_chunks WHERE document_uuid = ? AND model_id = ? AND content_hash = ?",
        )
        .bind(document_uuid.to_string())
        .bind(model_id)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        for (chunk_index, start_pos, end_pos, text, vector) in chunks {
            sqlx::query(
                r#"
                INSERT INTO embedding_chunks
                    (document_uuid, content_hash, model_id, chunk_index, start_pos, end_pos, text, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_uuid.to_string())
            .bind(content_hash)
            .bind(model_id)
            .bind(chunk_index)
            .bind(start_pos)
            .bind(end_pos)
            .bind(text)
            .bind(vector.as_slice())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete summary and embedding rows whose hash no longer matches any
    /// live revision. Returns (summaries, embeddings) removed.
    pub async fn gc_enrichment(&self) -> Result<(u64, u64)> {
        let live = r#"
            SELECT 1 FROM revisions r
            WHERE r.document_uuid = t.document_uuid
              AND r.content_hash = t.content_hash
              AND r.status IN ('active', 'source', 'target', 'canonical')
        "#;

        let summaries = sqlx::query(&format!(
            "DELETE FROM summaries AS t WHERE NOT EXISTS ({})",
            live
        ))
        .execute(&self.pool)
        .await?
        .rows_affected();

        let embeddings = sqlx::query(&format!(
            "DELETE FROM embeddings AS t WHERE NOT EXISTS ({})",
            live
        ))
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query(&format!(
            "DELETE FROM embedding_chunks AS t WHERE NOT EXISTS ({})",
            live
        ))
        .execute(&self.pool)
        .await?;

        Ok((summaries, embeddings))
    }

    // ============ Indexers ============

    pub async fn insert_indexer(
        conn: &mut SqliteConnection,
        indexer: &Indexer,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexers
                (indexer_uuid, indexer_type, project_uuid, workspace_scope, token_hash,
                 hostname, version, created_at, last_heartbeat, last_scan,
                 document_count, reported_status, revoked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(indexer.indexer_uuid.to_string())
        .bind(&indexer.indexer_type)
        .bind(indexer.project_uuid.to_string())
        .bind(&indexer.workspace_scope)
        .bind(&indexer.token_hash)
        .bind(&indexer.hostname)
        .bind(&indexer.version)
        .bind(indexer.created_at)
        .bind(indexer.last_heartbeat)
        .bind(indexer.last_scan)
        .bind(indexer.document_count)
        .bind(&indexer.reported_status)
        .bind(indexer.revoked as i64)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_indexer(&self, indexer_uuid: Uuid) -> Result<Option<Indexer>> {
        let row = sqlx::query("SELECT * FROM indexers WHERE indexer_uuid = ?")
            .bind(indexer_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_indexer).transpose()
    }

    pub async fn get_indexer_by_token_hash(&self, token_hash: &str) -> Result<Option<Indexer>> {
        let row = sqlx::query("SELECT * FROM indexers WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_indexer).transpose()
    }

    pub async fn list_indexers(&self) -> Result<Vec<Indexer>> {
        let rows = sqlx::query("SELECT * FROM indexers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_indexer).collect()
    }

    pub async fn record_heartbeat(
        &self,
        indexer_uuid: Uuid,
        reported_status: &str,
        last_scan: Option<i64>,
        document_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE indexers
            SET last_heartbeat = ?, reported_status = ?, last_scan = ?, document_count = ?
            WHERE indexer_uuid = ?
            "#,
        )
        .bind(now())
        .bind(reported_status)
        .bind(last_scan)
        .bind(document_count)
        .bind(indexer_uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke_indexer(&self, indexer_uuid: Uuid) -> Result<()> {
        sqlx::query("UPDATE indexers SET revoked = 1 WHERE indexer_uuid = ?")
            .bind(indexer_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Bootstrap tokens ============

    pub async fn insert_bootstrap_token(
        &self,
        token_hash: &str,
        project_uuid: Uuid,
        expires_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO bootstrap_tokens (token_hash, project_uuid, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(project_uuid.to_string())
        .bind(now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Consume a bootstrap token inside the registration transaction:
    /// the row is deleted in the same tx that creates the indexer, so the
    /// token is single-use even under concurrent registration attempts.
    pub async fn consume_bootstrap_token(
        conn: &mut SqliteConnection,
        token_hash: &str,
    ) -> Result<Option<(Uuid, i64)>> {
        let row = sqlx::query(
            "SELECT project_uuid, expires_at FROM bootstrap_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let project_uuid = parse_uuid(row.get::<String, _>("project_uuid").as_str())?;
        let expires_at: i64 = row.get("expires_at");

        sqlx::query("DELETE FROM bootstrap_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&mut *conn)
            .await?;

        Ok(Some((project_uuid, expires_at)))
    }

    // ============ Conflicts ============

    pub async fn insert_conflict(&self, record: &ConflictRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO conflicts (document_uuid, conflict_type, detected_at, revisions, resolution, note)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.document_uuid.to_string())
        .bind(record.conflict_type.as_str())
        .bind(record.detected_at)
        .bind(serde_json::to_string(&record.revisions).unwrap_or_else(|_| "[]".into()))
        .bind(record.resolution.as_str())
        .bind(&record.note)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn pending_conflict(&self, document_uuid: Uuid) -> Result<Option<ConflictRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM conflicts
            WHERE document_uuid = ? AND resolution = 'pending'
            ORDER BY conflict_id DESC LIMIT 1
            "#,
        )
        .bind(document_uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_conflict).transpose()
    }

    pub async fn list_conflicts(&self, only_pending: bool) -> Result<Vec<ConflictRecord>> {
        let sql = if only_pending {
            "SELECT * FROM conflicts WHERE resolution = 'pending' ORDER BY detected_at DESC"
        } else {
            "SELECT * FROM conflicts ORDER BY (resolution = 'pending') DESC, detected_at DESC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_conflict).collect()
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: ConflictResolution,
        note: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE conflicts SET resolution = ?, note = COALESCE(?, note) WHERE conflict_id = ?")
            .bind(resolution.as_str())
            .bind(note)
            .bind(conflict_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Migration items ============

    pub async fn upsert_migration_item(
        &self,
        project_uuid: Uuid,
        document_uuid: Uuid,
        state: &str,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_items (project_uuid, document_uuid, state, attempts, last_error, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT(project_uuid, document_uuid) DO UPDATE SET
                state = excluded.state,
                attempts = migration_items.attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_uuid.to_string())
        .bind(document_uuid.to_string())
        .bind(state)
        .bind(last_error)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn migration_items_in_state(
        &self,
        project_uuid: Uuid,
        state: &str,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT document_uuid FROM migration_items WHERE project_uuid = ? AND state = ? ORDER BY document_uuid",
        )
        .bind(project_uuid.to_string())
        .bind(state)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|s| parse_uuid(s)).collect()
    }

    pub async fn migration_state_counts(
        &self,
        project_uuid: Uuid,
    ) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS n FROM migration_items WHERE project_uuid = ? GROUP BY state",
        )
        .bind(project_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("state"), r.get::<i64, _>("n")))
            .collect())
    }

    pub async fn clear_migration_items(&self, project_uuid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM migration_items WHERE project_uuid = ?")
            .bind(project_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Index outbox ============

    pub async fn enqueue_index_write(
        conn: &mut SqliteConnection,
        document_uuid: Uuid,
        kind: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO index_outbox (document_uuid, kind, created_at, next_attempt) VALUES (?, ?, ?, 0)",
        )
        .bind(document_uuid.to_string())
        .bind(kind)
        .bind(now())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn outbox_due(&self, now_ts: i64, limit: i64) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query(
            "SELECT * FROM index_outbox WHERE next_attempt <= ? ORDER BY outbox_id LIMIT ?",
        )
        .bind(now_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(OutboxRow {
                    outbox_id: row.get("outbox_id"),
                    document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
                    kind: row.get("kind"),
                    attempts: row.get("attempts"),
                })
            })
            .collect()
    }

    pub async fn outbox_delete(&self, outbox_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM index_outbox WHERE outbox_id = ?")
            .bind(outbox_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn outbox_retry_later(
        &self,
        outbox_id: i64,
        error: &str,
        next_attempt: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE index_outbox SET attempts = attempts + 1, last_error = ?, next_attempt = ? WHERE outbox_id = ?",
        )
        .bind(error)
        .bind(next_attempt)
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Backlog counters ============

    pub async fn backlog(&self) -> Result<Backlog> {
        let enrichment_pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE enrichment_state = 'pending' AND status != 'deleted'",
        )
        .fetch_one(&self.pool)
        .await?;
        let outbox_pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_outbox")
            .fetch_one(&self.pool)
            .await?;
        let conflicts_pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conflicts WHERE resolution = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(Backlog {
            enrichment_pending,
            outbox_pending,
            conflicts_pending,
        })
    }

    pub async fn document_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn revision_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM revisions")
            .fetch_one(&self.pool)
            .await?)
    }
}

/// One pending index write from the outbox.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub outbox_id: i64,
    pub document_uuid: Uuid,
    pub kind: String,
    pub attempts: i64,
}

/// Reconciler backlog counters for the operator surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Backlog {
    pub enrichment_pending: i64,
    pub outbox_pending: i64,
    pub conflicts_pending: i64,
}

// ============ Row mappers ============

fn row_to_instance(row: SqliteRow) -> Result<Instance> {
    Ok(Instance {
        instance_uuid: parse_uuid(row.get::<String, _>("instance_uuid").as_str())?,
        instance_name: row.get("instance_name"),
        base_url: row.get("base_url"),
        environment: row.get("environment"),
        created_at: row.get("created_at"),
    })
}

fn row_to_project(row: SqliteRow) -> Result<Project> {
    let provider_type = ProviderKind::parse(row.get::<String, _>("provider_type").as_str())
        .ok_or_else(|| HermesError::PermanentBackend("corrupt provider_type".into()))?;
    let status = ProjectStatus::parse(row.get::<String, _>("status").as_str())
        .ok_or_else(|| HermesError::PermanentBackend("corrupt project status".into()))?;
    let target_provider_type = row
        .get::<Option<String>, _>("target_provider_type")
        .as_deref()
        .and_then(ProviderKind::parse);
    let resolution_policy = row
        .get::<Option<String>, _>("resolution_policy")
        .as_deref()
        .and_then(ResolutionPolicy::parse);
    Ok(Project {
        project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
        project_id: row.get("project_id"),
        title: row.get("title"),
        short_tag: row.get("short_tag"),
        status,
        provider_type,
        provider_config: parse_json(row.get::<String, _>("provider_config").as_str()),
        config_hash: row.get("config_hash"),
        target_provider_type,
        target_provider_config: row
            .get::<Option<String>, _>("target_provider_config")
            .as_deref()
            .map(parse_json),
        resolution_policy,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_document(row: SqliteRow) -> Result<Document> {
    let enrichment_state =
        EnrichmentState::parse(row.get::<String, _>("enrichment_state").as_str())
            .unwrap_or(EnrichmentState::Pending);
    Ok(Document {
        document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
        project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
        title: row.get("title"),
        doc_type: row.get("doc_type"),
        status: row.get("status"),
        metadata: parse_json(row.get::<String, _>("metadata").as_str()),
        content: row.get("content"),
        enrichment_state,
        modified_time: row.get("modified_time"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_revision(row: SqliteRow) -> Result<Revision> {
    let provider_type = ProviderKind::parse(row.get::<String, _>("provider_type").as_str())
        .ok_or_else(|| HermesError::PermanentBackend("corrupt provider_type".into()))?;
    let status = RevisionStatus::parse(row.get::<String, _>("status").as_str())
        .ok_or_else(|| HermesError::PermanentBackend("corrupt revision status".into()))?;
    Ok(Revision {
        revision_id: row.get("revision_id"),
        document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
        project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
        provider_type,
        provider_document_id: row.get("provider_document_id"),
        content_hash: row.get("content_hash"),
        modified_time: row.get("modified_time"),
        revision_reference: row.get("revision_reference"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_summary(row: SqliteRow) -> Result<Summary> {
    let list = |s: String| -> Vec<String> { serde_json::from_str(&s).unwrap_or_default() };
    Ok(Summary {
        document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
        content_hash: row.get("content_hash"),
        model_id: row.get("model_id"),
        generated_at: row.get("generated_at"),
        summary: row.get("summary"),
        key_points: list(row.get("key_points")),
        topics: list(row.get("topics")),
        tags: list(row.get("tags")),
        suggested_status: row.get("suggested_status"),
        confidence: row.get("confidence"),
        tokens_used: row.get("tokens_used"),
    })
}

fn row_to_indexer(row: SqliteRow) -> Result<Indexer> {
    Ok(Indexer {
        indexer_uuid: parse_uuid(row.get::<String, _>("indexer_uuid").as_str())?,
        indexer_type: row.get("indexer_type"),
        project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
        workspace_scope: row.get("workspace_scope"),
        token_hash: row.get("token_hash"),
        hostname: row.get("hostname"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        last_heartbeat: row.get("last_heartbeat"),
        last_scan: row.get("last_scan"),
        document_count: row.get("document_count"),
        reported_status: row.get("reported_status"),
        revoked: row.get::<i64, _>("revoked") != 0,
    })
}

fn row_to_conflict(row: SqliteRow) -> Result<ConflictRecord> {
    let conflict_type = ConflictType::parse(row.get::<String, _>("conflict_type").as_str())
        .ok_or_else(|| HermesError::PermanentBackend("corrupt conflict_type".into()))?;
    let resolution = ConflictResolution::parse(row.get::<String, _>("resolution").as_str())
        .unwrap_or(ConflictResolution::Pending);
    let revisions: Vec<ConflictRevision> =
        serde_json::from_str(row.get::<String, _>("revisions").as_str()).unwrap_or_default();
    Ok(ConflictRecord {
        conflict_id: row.get("conflict_id"),
        document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
        conflict_type,
        detected_at: row.get("detected_at"),
        revisions,
        resolution,
        note: row.get("note"),
    })
}

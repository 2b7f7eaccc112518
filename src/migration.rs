//! Migration engine: relocate a project's documents between providers
//! while the source stays live.
//!
//! The engine drives prepare → copy → compare → cutover (or rollback).
//! Copies run on a background worker with bounded concurrency and a
//! per-document deadline; the source keeps accepting edits during the
//! copy — each new source revision re-queues its document. Divergence is
//! classified through the identity engine and settled by the operator's
//! resolution policy.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::error::{HermesError, Result};
use crate::identity::IdentityEngine;
use crate::models::{
    ConflictResolution, ConflictType, Project, ProjectStatus, ProviderKind, ResolutionPolicy,
    Revision, RevisionStatus,
};
use crate::provider::{WorkspaceProvider, WorkspaceRouter, UUID_METADATA_KEY};
use crate::store::CatalogStore;

/// Item states tracked per document during a migration.
const STATE_PENDING: &str = "pending";
const STATE_READY: &str = "ready";
const STATE_CONFLICT: &str = "conflict";
const STATE_FAILED: &str = "migration-failed";

/// Operator-facing migration status.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub project_id: String,
    pub project_status: String,
    pub resolution_policy: Option<String>,
    pub pending: i64,
    pub ready: i64,
    pub conflict: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct MigrationEngine {
    store: CatalogStore,
    identity: IdentityEngine,
    config: MigrationConfig,
    conflict_window_secs: i64,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl MigrationEngine {
    pub fn new(
        store: CatalogStore,
        identity: IdentityEngine,
        config: MigrationConfig,
        conflict_window_secs: i64,
    ) -> Self {
        Self {
            store,
            identity,
            config,
            conflict_window_secs,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Prepare a migration and start the background copy worker.
    pub async fn start(
        &self,
        project_id: &str,
        target_type: ProviderKind,
        target_config: &serde_json::Value,
        policy: ResolutionPolicy,
    ) -> Result<MigrationStatus> {
        let project = self.require_project(project_id).await?;

        // Revisions tell source and target apart by provider type, so a
        // migration must change the provider kind.
        if target_type == project.provider_type {
            return Err(HermesError::Conflict(format!(
                "project {} is already on provider {}",
                project_id,
                target_type.as_str()
            )));
        }

        match project.status {
            ProjectStatus::Active | ProjectStatus::Completed => {}
            ProjectStatus::Migrating => {
                return Err(HermesError::Conflict(format!(
                    "project {} already has an active migration",
                    project_id
                )))
            }
            ProjectStatus::Archived => {
                return Err(HermesError::Conflict(format!(
                    "project {} is archived",
                    project_id
                )))
            }
        }

        {
            let mut active = self.active.lock().await;
            if !active.insert(project.project_uuid) {
                return Err(HermesError::Conflict(format!(
                    "project {} already has an active migration",
                    project_id
                )));
            }
        }

        self.store
            .set_project_target(project.project_uuid, target_type, target_config, policy)
            .await?;
        self.store
            .update_project_status(project.project_uuid, ProjectStatus::Migrating)
            .await?;

        // Existing live revisions take the source role.
        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Active,
                RevisionStatus::Source,
            )
            .await?;
        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Canonical,
                RevisionStatus::Source,
            )
            .await?;

        self.store.clear_migration_items(project.project_uuid).await?;
        for document in self
            .store
            .list_documents_by_project(project.project_uuid)
            .await?
        {
            self.store
                .upsert_migration_item(
                    project.project_uuid,
                    document.document_uuid,
                    STATE_PENDING,
                    None,
                )
                .await?;
        }

        tracing::info!(
            project_id,
            target = target_type.as_str(),
            policy = policy.as_str(),
            "migration started"
        );

        self.status(project_id).await
    }

    /// Launch the background copy worker for a prepared migration. The
    /// worker exits when the project leaves the `migrating` state.
    pub fn spawn_worker(&self, project_uuid: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.copy_worker(project_uuid).await;
        });
    }

    /// Operator status view.
    pub async fn status(&self, project_id: &str) -> Result<MigrationStatus> {
        let project = self.require_project(project_id).await?;
        let counts = self
            .store
            .migration_state_counts(project.project_uuid)
            .await?;
        let count = |state: &str| -> i64 {
            counts
                .iter()
                .find(|(s, _)| s == state)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };
        Ok(MigrationStatus {
            project_id: project.project_id.clone(),
            project_status: project.status.as_str().to_string(),
            resolution_policy: project.resolution_policy.map(|p| p.as_str().to_string()),
            pending: count(STATE_PENDING),
            ready: count(STATE_READY),
            conflict: count(STATE_CONFLICT),
            failed: count(STATE_FAILED),
        })
    }

    /// Cut over: targets become canonical, sources archive, the project
    /// switches to the target provider.
    pub async fn complete(&self, project_id: &str) -> Result<MigrationStatus> {
        let project = self.require_project(project_id).await?;
        if project.status != ProjectStatus::Migrating {
            return Err(HermesError::Conflict(format!(
                "project {} has no active migration",
                project_id
            )));
        }

        let counts = self
            .store
            .migration_state_counts(project.project_uuid)
            .await?;
        for (state, n) in &counts {
            if (state == STATE_PENDING || state == STATE_CONFLICT) && *n > 0 {
                return Err(HermesError::Conflict(format!(
                    "{} documents still {} in project {}",
                    n, state, project_id
                )));
            }
        }

        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Target,
                RevisionStatus::Canonical,
            )
            .await?;
        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Source,
                RevisionStatus::Archived,
            )
            .await?;

        self.store.switch_project_provider(project.project_uuid).await?;
        self.store
            .update_project_status(project.project_uuid, ProjectStatus::Completed)
            .await?;
        self.store.clear_migration_items(project.project_uuid).await?;
        self.active.lock().await.remove(&project.project_uuid);

        tracing::info!(project_id, "migration completed");
        self.status(project_id).await
    }

    /// Abort before cutover: targets archive, sources become canonical.
    pub async fn rollback(
        &self,
        project_id: &str,
        delete_target_content: bool,
    ) -> Result<MigrationStatus> {
        let project = self.require_project(project_id).await?;
        if project.status != ProjectStatus::Migrating {
            return Err(HermesError::Conflict(format!(
                "project {} has no active migration",
                project_id
            )));
        }

        if delete_target_content {
            if let Ok(target) = WorkspaceRouter::resolve_target(&project) {
                for document in self
                    .store
                    .list_documents_by_project(project.project_uuid)
                    .await?
                {
                    if let Some(rev) = self
                        .revision_in_status(document.document_uuid, RevisionStatus::Target)
                        .await?
                    {
                        if let Err(e) = target.delete(&rev.provider_document_id).await {
                            tracing::warn!(
                                document_uuid = %document.document_uuid,
                                error = %e,
                                "target cleanup failed"
                            );
                        }
                    }
                }
            }
        }

        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Target,
                RevisionStatus::Archived,
            )
            .await?;
        self.store
            .transition_project_revisions(
                project.project_uuid,
                RevisionStatus::Source,
                RevisionStatus::Canonical,
            )
            .await?;

        self.store.clear_project_target(project.project_uuid).await?;
        self.store
            .update_project_status(project.project_uuid, ProjectStatus::Active)
            .await?;
        self.store.clear_migration_items(project.project_uuid).await?;
        self.active.lock().await.remove(&project.project_uuid);

        tracing::info!(project_id, "migration rolled back");
        self.status(project_id).await
    }

    // ============ Copy worker ============

    /// Poll for pending items until the migration leaves the `migrating`
    /// state. Copies run concurrently up to the configured bound.
    async fn copy_worker(&self, project_uuid: Uuid) {
        let semaphore = Arc::new(Semaphore::new(self.config.copy_concurrency.max(1)));

        loop {
            let project = match self.store.get_project_by_uuid(project_uuid).await {
                Ok(Some(project)) => project,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "migration worker store error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            if project.status != ProjectStatus::Migrating {
                return;
            }

            let pending = match self
                .store
                .migration_items_in_state(project_uuid, STATE_PENDING)
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = %e, "migration worker store error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if pending.is_empty() {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            let mut handles = Vec::with_capacity(pending.len());
            for document_uuid in pending {
                let engine = self.clone();
                let project = project.clone();
                let semaphore = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    engine.copy_one(&project, document_uuid).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Copy one document to the target under the per-document deadline,
    /// then compare hashes and apply the resolution policy.
    pub async fn copy_one(&self, project: &Project, document_uuid: Uuid) {
        let deadline = Duration::from_secs(self.config.copy_timeout_secs);
        let result = tokio::time::timeout(deadline, self.copy_inner(project, document_uuid)).await;

        let outcome = match result {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::warn!(document_uuid = %document_uuid, error = %e, "migration copy failed");
                (STATE_FAILED.to_string(), Some(e.to_string()))
            }
            Err(_) => (
                STATE_FAILED.to_string(),
                Some("copy deadline exceeded".to_string()),
            ),
        };

        if let Err(e) = self
            .store
            .upsert_migration_item(
                project.project_uuid,
                document_uuid,
                &outcome.0,
                outcome.1.as_deref(),
            )
            .await
        {
            tracing::warn!(error = %e, "migration item update failed");
        }
    }

    async fn copy_inner(
        &self,
        project: &Project,
        document_uuid: Uuid,
    ) -> Result<(String, Option<String>)> {
        let source = WorkspaceRouter::resolve_source(project)?;
        let target = WorkspaceRouter::resolve_target(project)?;

        let Some(source_rev) = self
            .revision_in_status(document_uuid, RevisionStatus::Source)
            .await?
        else {
            return Ok((
                STATE_FAILED.to_string(),
                Some("no live source revision".to_string()),
            ));
        };

        let document = self
            .store
            .get_document(document_uuid)
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("document {}", document_uuid)))?;

        let source_doc = source.read(&source_rev.provider_document_id).await?;

        // Preserve the identity in the target's native metadata.
        let mut metadata = match source_doc.metadata.clone() {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };
        if let serde_json::Value::Object(ref mut map) = metadata {
            map.insert(
                UUID_METADATA_KEY.to_string(),
                serde_json::Value::String(document_uuid.to_string()),
            );
            map.insert(
                "title".to_string(),
                serde_json::Value::String(document.title.clone()),
            );
        }

        // Re-copies overwrite the previously written target document.
        let existing_target_id = self
            .revision_in_status(document_uuid, RevisionStatus::Target)
            .await?
            .map(|r| r.provider_document_id);

        let target_id = self
            .write_with_retry(
                target.as_ref(),
                existing_target_id.as_deref(),
                &source_doc.content,
                &metadata,
            )
            .await?;

        // Hash what was written, keyed to the source's title and modified
        // time so an unchanged copy hashes identically to its source.
        let modified_time = Utc
            .timestamp_opt(source_rev.modified_time, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let (_, target_hash) = crate::normalize::hash_document(
            &source_doc.content,
            &document.title,
            modified_time,
            target.rendering_artifacts(),
        );

        let mut tx = self.store.begin().await?;
        IdentityEngine::record_revision(
            &mut tx,
            project,
            document_uuid,
            target.kind(),
            &target_id,
            &target_hash,
            source_rev.modified_time,
            source_rev.revision_reference.as_deref(),
        )
        .await?;
        tx.commit().await?;

        // Compare against the *current* source revision: the source may
        // have advanced while the copy ran.
        let current_source = self
            .revision_in_status(document_uuid, RevisionStatus::Source)
            .await?;
        let source_hash = current_source
            .as_ref()
            .map(|r| r.content_hash.clone())
            .unwrap_or_else(|| source_rev.content_hash.clone());

        // Classification also closes a stale pending record once the
        // hashes converge again.
        self.identity
            .detect_conflicts(document_uuid, self.conflict_window_secs)
            .await?;

        if source_hash == target_hash {
            return Ok((STATE_READY.to_string(), None));
        }

        let policy = project
            .resolution_policy
            .unwrap_or(ResolutionPolicy::HashTieThenManual);
        match policy {
            ResolutionPolicy::SourceWins => {
                self.identity
                    .resolve_conflict(document_uuid, ConflictResolution::SourceWins, None)
                    .await?;
                // Re-copy from the advanced source.
                Ok((STATE_PENDING.to_string(), Some("source advanced, re-copying".into())))
            }
            ResolutionPolicy::TargetWins => {
                self.identity
                    .resolve_conflict(document_uuid, ConflictResolution::TargetWins, None)
                    .await?;
                Ok((STATE_READY.to_string(), None))
            }
            ResolutionPolicy::HashTieThenManual => Ok((
                STATE_CONFLICT.to_string(),
                Some("hashes diverge, awaiting operator resolution".into()),
            )),
        }
    }

    async fn write_with_retry(
        &self,
        target: &dyn WorkspaceProvider,
        provider_document_id: Option<&str>,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..self.config.write_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }
            match target.write(provider_document_id, content, metadata).await {
                Ok(id) => return Ok(id),
                Err(e @ HermesError::TransientBackend(_)) => last_err = Some(e),
                Err(other) => return Err(other),
            }
        }
        Err(last_err
            .unwrap_or_else(|| HermesError::TransientBackend("target write failed".into())))
    }

    /// Resolve a document's pending conflict by operator action.
    ///
    /// Revision settlement dispatches on the conflict type inside the
    /// identity engine; only migration divergence additionally adjusts
    /// the per-document copy state, and only while a migration is
    /// actually in flight — concurrent-edit and content-divergence
    /// conflicts have no copy worker to feed.
    pub async fn resolve_document(
        &self,
        project_id: &str,
        document_uuid: Uuid,
        strategy: ConflictResolution,
        note: Option<&str>,
    ) -> Result<()> {
        let project = self.require_project(project_id).await?;

        let resolved = self
            .identity
            .resolve_conflict(document_uuid, strategy, note)
            .await?
            .ok_or_else(|| {
                HermesError::Conflict(format!(
                    "document {} has no pending conflict",
                    document_uuid
                ))
            })?;

        if resolved.conflict_type == ConflictType::MigrationDivergence
            && project.status == ProjectStatus::Migrating
        {
            let state = match strategy {
                ConflictResolution::SourceWins => STATE_PENDING,
                _ => STATE_READY,
            };
            self.store
                .upsert_migration_item(project.project_uuid, document_uuid, state, note)
                .await?;
        }
        Ok(())
    }

    async fn revision_in_status(
        &self,
        document_uuid: Uuid,
        status: RevisionStatus,
    ) -> Result<Option<Revision>> {
        let live = self.store.live_revisions(document_uuid).await?;
        Ok(live
            .into_iter()
            .filter(|r| r.status == status)
            .max_by_key(|r| (r.modified_time, r.revision_id)))
    }

    async fn require_project(&self, project_id: &str) -> Result<Project> {
        self.store
            .get_project_by_id(project_id)
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("project {}", project_id)))
    }

    /// Drain every pending copy synchronously; used by operators running a
    /// one-shot migration and by tests that need determinism.
    pub async fn run_pending_copies(&self, project_id: &str) -> Result<MigrationStatus> {
        let project = self.require_project(project_id).await?;
        loop {
            let pending = self
                .store
                .migration_items_in_state(project.project_uuid, STATE_PENDING)
                .await?;
            if pending.is_empty() {
                break;
            }
            let project = self.require_project(project_id).await?;
            if project.status != ProjectStatus::Migrating {
                break;
            }
            for document_uuid in pending {
                self.copy_one(&project, document_uuid).await;
            }
        }
        self.status(project_id).await
    }
}

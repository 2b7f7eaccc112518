//! Identity and revision engine.
//!
//! Assigns and reconciles the globally stable identifiers for instances,
//! projects, and documents, and maintains the revision graph that answers
//! "what versions of this document exist, where, and do they agree?".
//!
//! All identity mutations that must be atomic with a revision write run on
//! the caller's transaction connection; uniqueness violations on the
//! revision key are treated as "already recorded", never as an error.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::{
    ConflictRecord, ConflictResolution, ConflictRevision, ConflictType, Instance, Project,
    ProjectStatus, ProviderKind, Revision, RevisionStatus,
};
use crate::store::CatalogStore;

/// Outcome of [`IdentityEngine::register_project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectEvent {
    Created,
    Unchanged,
    ConfigChanged,
}

#[derive(Clone)]
pub struct IdentityEngine {
    store: CatalogStore,
}

impl IdentityEngine {
    pub fn new(store: CatalogStore) -> Self {
        Self { store }
    }

    /// Read the singleton instance row, creating it on first boot.
    pub async fn ensure_instance(
        &self,
        instance_name: &str,
        base_url: &str,
        environment: &str,
    ) -> Result<Instance> {
        if let Some(existing) = self.store.get_instance().await? {
            return Ok(existing);
        }

        let instance = Instance {
            instance_uuid: Uuid::new_v4(),
            instance_name: instance_name.to_string(),
            base_url: base_url.to_string(),
            environment: environment.to_string(),
            created_at: Utc::now().timestamp(),
        };
        self.store.insert_instance(&instance).await?;
        tracing::info!(
            instance_uuid = %instance.instance_uuid,
            instance_name,
            "instance created"
        );
        Ok(instance)
    }

    /// Create a project if `local_id` is new, else return the existing one.
    ///
    /// When the canonicalized config hash differs from the stored one, the
    /// config is updated in place and a `project.config_changed` event is
    /// emitted.
    pub async fn register_project(
        &self,
        local_id: &str,
        title: Option<&str>,
        short_tag: Option<&str>,
        provider_type: ProviderKind,
        provider_config: &serde_json::Value,
    ) -> Result<(Project, ProjectEvent)> {
        validate_project_id(local_id)?;
        let config_hash = config_hash(provider_config);

        if let Some(existing) = self.store.get_project_by_id(local_id).await? {
            if existing.config_hash == config_hash && existing.provider_type == provider_type {
                return Ok((existing, ProjectEvent::Unchanged));
            }
            self.store
                .update_project_config(
                    existing.project_uuid,
                    provider_type,
                    provider_config,
                    &config_hash,
                )
                .await?;
            tracing::info!(
                event = "project.config_changed",
                project_id = local_id,
                project_uuid = %existing.project_uuid,
                "project provider config updated"
            );
            let updated = self
                .store
                .get_project_by_id(local_id)
                .await?
                .ok_or_else(|| HermesError::PermanentBackend("project vanished".into()))?;
            return Ok((updated, ProjectEvent::ConfigChanged));
        }

        let now = Utc::now().timestamp();
        let project = Project {
            project_uuid: Uuid::new_v4(),
            project_id: local_id.to_string(),
            title: title.map(str::to_string).unwrap_or_else(|| derive_title(local_id)),
            short_tag: short_tag
                .map(str::to_string)
                .unwrap_or_else(|| derive_short_tag(local_id)),
            status: ProjectStatus::Active,
            provider_type,
            provider_config: provider_config.clone(),
            config_hash,
            target_provider_type: None,
            target_provider_config: None,
            resolution_policy: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_project(&project).await?;
        tracing::info!(
            project_id = local_id,
            project_uuid = %project.project_uuid,
            provider = provider_type.as_str(),
            "project registered"
        );
        Ok((project, ProjectEvent::Created))
    }

    /// Resolve the document UUID for a provider-native document.
    ///
    /// Precedence: a syntactically valid declared UUID wins unless it is
    /// already bound to a different provider document in the same scope;
    /// otherwise the stored binding is returned; otherwise a fresh UUIDv4
    /// is minted. Returns the UUID and whether a write-back to the source
    /// is needed (the binding did not come from the source itself).
    pub async fn resolve_document_uuid(
        conn: &mut SqliteConnection,
        project_uuid: Uuid,
        provider_type: ProviderKind,
        provider_document_id: &str,
        declared: Option<Uuid>,
    ) -> Result<(Uuid, bool)> {
        let stored =
            CatalogStore::get_binding(conn, project_uuid, provider_type, provider_document_id)
                .await?;

        if let Some(declared_uuid) = declared {
            let bound_elsewhere = CatalogStore::uuid_bound_elsewhere(
                conn,
                project_uuid,
                provider_type,
                provider_document_id,
                declared_uuid,
            )
            .await?;
            if !bound_elsewhere {
                if stored.is_none() {
                    CatalogStore::insert_binding(
                        conn,
                        project_uuid,
                        provider_type,
                        provider_document_id,
                        declared_uuid,
                    )
                    .await?;
                    // Re-read: a concurrent resolver may have won the
                    // insert with a different uuid.
                    let authoritative = CatalogStore::get_binding(
                        conn,
                        project_uuid,
                        provider_type,
                        provider_document_id,
                    )
                    .await?
                    .unwrap_or(declared_uuid);
                    return Ok((authoritative, authoritative != declared_uuid));
                }
                return Ok((declared_uuid, false));
            }
            tracing::warn!(
                declared = %declared_uuid,
                provider_document_id,
                "declared uuid already bound to another document, ignoring"
            );
        }

        if let Some(existing) = stored {
            return Ok((existing, true));
        }

        let minted = Uuid::new_v4();
        CatalogStore::insert_binding(
            conn,
            project_uuid,
            provider_type,
            provider_document_id,
            minted,
        )
        .await?;
        let authoritative =
            CatalogStore::get_binding(conn, project_uuid, provider_type, provider_document_id)
                .await?
                .unwrap_or(minted);
        Ok((authoritative, true))
    }

    /// Record one observed revision, idempotently.
    ///
    /// An identical (document, project, provider, hash) tuple returns the
    /// existing row with `created = false`. A genuinely new revision
    /// supersedes prior live revisions of the same (document, project,
    /// provider): in steady state they are archived; in a migrating
    /// project the new row takes the `source` or `target` role instead of
    /// `active`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_revision(
        conn: &mut SqliteConnection,
        project: &Project,
        document_uuid: Uuid,
        provider_type: ProviderKind,
        provider_document_id: &str,
        content_hash: &str,
        modified_time: i64,
        revision_reference: Option<&str>,
    ) -> Result<(Revision, bool)> {
        let status = initial_status(project, provider_type);
        let now = Utc::now().timestamp();

        let candidate = Revision {
            revision_id: 0,
            document_uuid,
            project_uuid: project.project_uuid,
            provider_type,
            provider_document_id: provider_document_id.to_string(),
            content_hash: content_hash.to_string(),
            modified_time,
            revision_reference: revision_reference.map(str::to_string),
            status,
            created_at: now,
            updated_at: now,
        };

        let (mut stored, created) = CatalogStore::insert_revision(conn, &candidate).await?;

        if created {
            // A newer live revision on the same provider outranks a
            // late-arriving older one; otherwise the new row supersedes.
            let newer_live: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM revisions
                WHERE document_uuid = ? AND project_uuid = ? AND provider_type = ?
                  AND revision_id != ?
                  AND status IN ('active', 'canonical', ?)
                  AND modified_time > ?
                "#,
            )
            .bind(document_uuid.to_string())
            .bind(project.project_uuid.to_string())
            .bind(provider_type.as_str())
            .bind(stored.revision_id)
            .bind(status.as_str())
            .bind(modified_time)
            .fetch_one(&mut *conn)
            .await?;

            if newer_live > 0 {
                sqlx::query(
                    "UPDATE revisions SET status = 'archived', updated_at = ? WHERE revision_id = ?",
                )
                .bind(now)
                .bind(stored.revision_id)
                .execute(&mut *conn)
                .await?;
                stored.status = RevisionStatus::Archived;
            } else {
                sqlx::query(
                    r#"
                    UPDATE revisions SET status = 'archived', updated_at = ?
                    WHERE document_uuid = ? AND project_uuid = ? AND provider_type = ?
                      AND revision_id != ?
                      AND status IN ('active', 'canonical', ?)
                    "#,
                )
                .bind(now)
                .bind(document_uuid.to_string())
                .bind(project.project_uuid.to_string())
                .bind(provider_type.as_str())
                .bind(stored.revision_id)
                .bind(status.as_str())
                .execute(&mut *conn)
                .await?;

                // Fresh content on this provider also supersedes rows
                // parked in conflict; the dispute is moot for them.
                sqlx::query(
                    r#"
                    UPDATE revisions SET status = 'archived', updated_at = ?
                    WHERE document_uuid = ? AND project_uuid = ? AND provider_type = ?
                      AND revision_id != ? AND status = 'conflict'
                      AND modified_time <= ?
                    "#,
                )
                .bind(now)
                .bind(document_uuid.to_string())
                .bind(project.project_uuid.to_string())
                .bind(provider_type.as_str())
                .bind(stored.revision_id)
                .bind(modified_time)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok((stored, created))
    }

    /// Scan the live revisions of a document and classify divergence.
    ///
    /// Returns the conflict record when one was detected (new or already
    /// pending). A new record outside migration parks its participating
    /// revisions in the `conflict` state, terminal until an operator
    /// resolves; migration divergence keeps the source/target roles so
    /// the copy machinery can keep acting on them. When the hashes have
    /// converged and nothing is parked, any pending conflict is closed as
    /// `resolved-identical`.
    pub async fn detect_conflicts(
        &self,
        document_uuid: Uuid,
        window_secs: i64,
    ) -> Result<Option<ConflictRecord>> {
        let all = self.store.revisions_for_document(document_uuid).await?;
        let live: Vec<Revision> = all
            .iter()
            .filter(|r| r.status.is_live())
            .cloned()
            .collect();
        let has_parked = all.iter().any(|r| r.status == RevisionStatus::Conflict);

        let mut hashes: Vec<&str> = live.iter().map(|r| r.content_hash.as_str()).collect();
        hashes.sort_unstable();
        hashes.dedup();

        if hashes.len() <= 1 {
            let pending = self.store.pending_conflict(document_uuid).await?;
            if has_parked {
                // The divergence sits in parked rows; nothing converged
                // and nothing new to flag until an operator acts.
                return Ok(pending);
            }
            if let Some(pending) = pending {
                self.store
                    .resolve_conflict(
                        pending.conflict_id,
                        ConflictResolution::ResolvedIdentical,
                        None,
                    )
                    .await?;
            }
            return Ok(None);
        }

        let conflict_type = classify(&live, window_secs);
        let participants: Vec<ConflictRevision> = live
            .iter()
            .map(|r| ConflictRevision {
                revision_id: r.revision_id,
                provider_type: r.provider_type,
                content_hash: r.content_hash.clone(),
                modified_time: r.modified_time,
                status: r.status,
            })
            .collect();

        // One pending record per document; re-detection refreshes nothing.
        if let Some(pending) = self.store.pending_conflict(document_uuid).await? {
            if pending.conflict_type == conflict_type {
                return Ok(Some(pending));
            }
        }

        let record = ConflictRecord {
            conflict_id: 0,
            document_uuid,
            conflict_type,
            detected_at: Utc::now().timestamp(),
            revisions: participants,
            resolution: ConflictResolution::Pending,
            note: None,
        };
        let conflict_id = self.store.insert_conflict(&record).await?;

        if conflict_type != ConflictType::MigrationDivergence {
            let ids: Vec<i64> = record.revisions.iter().map(|r| r.revision_id).collect();
            self.store.mark_revisions_conflict(&ids).await?;
        }

        tracing::warn!(
            document_uuid = %document_uuid,
            conflict_type = conflict_type.as_str(),
            "conflict detected"
        );
        Ok(Some(ConflictRecord {
            conflict_id,
            ..record
        }))
    }

    /// Settle the pending conflict of a document.
    ///
    /// Returns the resolved record, or `None` when nothing is pending.
    /// Migration divergence only flips the record; its revisions keep
    /// their source/target roles and the migration engine re-drives the
    /// copy. For concurrent-edit and content-divergence the strategy
    /// picks a winning revision to restore while the losers archive;
    /// `manual` leaves the parked rows for a later supersede.
    pub async fn resolve_conflict(
        &self,
        document_uuid: Uuid,
        strategy: ConflictResolution,
        note: Option<&str>,
    ) -> Result<Option<ConflictRecord>> {
        let Some(pending) = self.store.pending_conflict(document_uuid).await? else {
            return Ok(None);
        };

        if pending.conflict_type != ConflictType::MigrationDivergence
            && matches!(
                strategy,
                ConflictResolution::SourceWins | ConflictResolution::TargetWins
            )
        {
            let parked_ids: Vec<i64> = self
                .store
                .conflict_revisions(document_uuid)
                .await?
                .iter()
                .map(|r| r.revision_id)
                .collect();

            let primary = match self.store.get_document(document_uuid).await? {
                Some(doc) => self
                    .store
                    .get_project_by_uuid(doc.project_uuid)
                    .await?
                    .map(|p| p.provider_type),
                None => None,
            };
            let winner = select_winner(&pending.revisions, primary, strategy);

            for participant in &pending.revisions {
                // Participants superseded since detection are no longer
                // parked and stay where the revision graph put them.
                if !parked_ids.contains(&participant.revision_id) {
                    continue;
                }
                if Some(participant.revision_id) == winner {
                    self.store
                        .set_revision_status(participant.revision_id, participant.status)
                        .await?;
                } else {
                    self.store
                        .set_revision_status(participant.revision_id, RevisionStatus::Archived)
                        .await?;
                }
            }
        }

        self.store
            .resolve_conflict(pending.conflict_id, strategy, note)
            .await?;
        tracing::info!(
            document_uuid = %document_uuid,
            strategy = strategy.as_str(),
            "conflict resolved"
        );

        let note = note.map(str::to_string).or_else(|| pending.note.clone());
        Ok(Some(ConflictRecord {
            resolution: strategy,
            note,
            ..pending
        }))
    }
}

/// Choose the surviving revision for a non-migration conflict.
///
/// Across providers, `source` means the project's primary provider and
/// `target` any other; within one provider the earlier edit counts as the
/// source and the later as the target.
fn select_winner(
    participants: &[ConflictRevision],
    primary: Option<ProviderKind>,
    strategy: ConflictResolution,
) -> Option<i64> {
    if participants.is_empty() {
        return None;
    }

    let mut providers: Vec<ProviderKind> =
        participants.iter().map(|r| r.provider_type).collect();
    providers.sort_by_key(|p| p.as_str());
    providers.dedup();

    if providers.len() > 1 {
        if let Some(primary) = primary {
            let candidate = match strategy {
                ConflictResolution::SourceWins => participants
                    .iter()
                    .filter(|r| r.provider_type == primary)
                    .max_by_key(|r| (r.modified_time, r.revision_id)),
                ConflictResolution::TargetWins => participants
                    .iter()
                    .filter(|r| r.provider_type != primary)
                    .max_by_key(|r| (r.modified_time, r.revision_id)),
                _ => None,
            };
            if let Some(winner) = candidate {
                return Some(winner.revision_id);
            }
        }
    }

    match strategy {
        ConflictResolution::SourceWins => participants
            .iter()
            .min_by_key(|r| (r.modified_time, r.revision_id))
            .map(|r| r.revision_id),
        ConflictResolution::TargetWins => participants
            .iter()
            .max_by_key(|r| (r.modified_time, r.revision_id))
            .map(|r| r.revision_id),
        _ => None,
    }
}

/// Initial state for a freshly observed revision.
fn initial_status(project: &Project, provider_type: ProviderKind) -> RevisionStatus {
    if project.status == ProjectStatus::Migrating {
        if Some(provider_type) == project.target_provider_type {
            return RevisionStatus::Target;
        }
        if provider_type == project.provider_type {
            return RevisionStatus::Source;
        }
    }
    RevisionStatus::Active
}

/// Classify divergence between live revisions with more than one hash.
fn classify(live: &[Revision], window_secs: i64) -> ConflictType {
    let sources: Vec<&Revision> = live
        .iter()
        .filter(|r| r.status == RevisionStatus::Source)
        .collect();
    let targets: Vec<&Revision> = live
        .iter()
        .filter(|r| r.status == RevisionStatus::Target)
        .collect();

    if sources.len() == 1
        && targets.len() == 1
        && sources[0].content_hash != targets[0].content_hash
    {
        return ConflictType::MigrationDivergence;
    }

    for (i, a) in live.iter().enumerate() {
        for b in live.iter().skip(i + 1) {
            if a.provider_type == b.provider_type
                && a.project_uuid == b.project_uuid
                && a.content_hash != b.content_hash
                && (a.modified_time - b.modified_time).abs() <= window_secs
            {
                return ConflictType::ConcurrentEdit;
            }
        }
    }

    ConflictType::ContentDivergence
}

/// Hash of a canonicalized (recursively key-sorted) JSON value.
pub fn config_hash(config: &serde_json::Value) -> String {
    let canonical = canonical_json(config);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn validate_project_id(local_id: &str) -> Result<()> {
    let ok = !local_id.is_empty()
        && local_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !local_id.starts_with('-')
        && !local_id.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(HermesError::InvalidRequest(format!(
            "project id '{}' must be kebab-case",
            local_id
        )))
    }
}

fn derive_title(local_id: &str) -> String {
    local_id
        .split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn derive_short_tag(local_id: &str) -> String {
    local_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(
        id: i64,
        provider: ProviderKind,
        hash: &str,
        mtime: i64,
        status: RevisionStatus,
    ) -> Revision {
        Revision {
            revision_id: id,
            document_uuid: Uuid::nil(),
            project_uuid: Uuid::nil(),
            provider_type: provider,
            provider_document_id: format!("doc-{}", id),
            content_hash: hash.to_string(),
            modified_time: mtime,
            revision_reference: None,
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_classify_migration_divergence() {
        let live = vec![
            rev(1, ProviderKind::HostedDocs, "sha256:aa", 100, RevisionStatus::Source),
            rev(2, ProviderKind::Local, "sha256:bb", 100, RevisionStatus::Target),
        ];
        assert_eq!(classify(&live, 300), ConflictType::MigrationDivergence);
    }

    #[test]
    fn test_classify_concurrent_edit_within_window() {
        let live = vec![
            rev(1, ProviderKind::Local, "sha256:aa", 1000, RevisionStatus::Active),
            rev(2, ProviderKind::Local, "sha256:bb", 1100, RevisionStatus::Active),
        ];
        assert_eq!(classify(&live, 300), ConflictType::ConcurrentEdit);
    }

    #[test]
    fn test_classify_content_divergence_outside_window() {
        let live = vec![
            rev(1, ProviderKind::Local, "sha256:aa", 1000, RevisionStatus::Active),
            rev(2, ProviderKind::Local, "sha256:bb", 10_000, RevisionStatus::Active),
        ];
        assert_eq!(classify(&live, 300), ConflictType::ContentDivergence);
    }

    #[test]
    fn test_classify_cross_provider_divergence() {
        let live = vec![
            rev(1, ProviderKind::HostedDocs, "sha256:aa", 1000, RevisionStatus::Active),
            rev(2, ProviderKind::Local, "sha256:bb", 1001, RevisionStatus::Active),
        ];
        assert_eq!(classify(&live, 300), ConflictType::ContentDivergence);
    }

    #[test]
    fn test_config_hash_key_order_independent() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"root": "./docs", "globs": ["**/*.md"]}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"globs": ["**/*.md"], "root": "./docs"}"#).unwrap();
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_config_hash_value_sensitive() {
        let a: serde_json::Value = serde_json::from_str(r#"{"root": "./docs"}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"root": "./other"}"#).unwrap();
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_validate_project_id() {
        assert!(validate_project_id("docs-internal").is_ok());
        assert!(validate_project_id("a1-b2").is_ok());
        assert!(validate_project_id("Docs").is_err());
        assert!(validate_project_id("-docs").is_err());
        assert!(validate_project_id("docs-").is_err());
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("docs_internal").is_err());
    }

    #[test]
    fn test_derive_title_and_tag() {
        assert_eq!(derive_title("docs-internal"), "Docs Internal");
        assert_eq!(derive_short_tag("docs-internal"), "DOCS");
        assert_eq!(derive_short_tag("x"), "X");
    }

    fn participant(
        id: i64,
        provider: ProviderKind,
        mtime: i64,
        status: RevisionStatus,
    ) -> ConflictRevision {
        ConflictRevision {
            revision_id: id,
            provider_type: provider,
            content_hash: format!("sha256:{:064}", id),
            modified_time: mtime,
            status,
        }
    }

    #[test]
    fn test_select_winner_cross_provider_source_is_primary() {
        let participants = vec![
            participant(1, ProviderKind::Local, 100, RevisionStatus::Active),
            participant(2, ProviderKind::HostedDocs, 200, RevisionStatus::Active),
        ];
        assert_eq!(
            select_winner(
                &participants,
                Some(ProviderKind::Local),
                ConflictResolution::SourceWins
            ),
            Some(1)
        );
        assert_eq!(
            select_winner(
                &participants,
                Some(ProviderKind::Local),
                ConflictResolution::TargetWins
            ),
            Some(2)
        );
    }

    #[test]
    fn test_select_winner_same_provider_orders_by_time() {
        let participants = vec![
            participant(1, ProviderKind::Local, 100, RevisionStatus::Active),
            participant(2, ProviderKind::Local, 200, RevisionStatus::Active),
        ];
        assert_eq!(
            select_winner(&participants, Some(ProviderKind::Local), ConflictResolution::SourceWins),
            Some(1)
        );
        assert_eq!(
            select_winner(&participants, Some(ProviderKind::Local), ConflictResolution::TargetWins),
            Some(2)
        );
    }

    #[test]
    fn test_select_winner_manual_picks_nothing() {
        let participants = vec![
            participant(1, ProviderKind::Local, 100, RevisionStatus::Active),
            participant(2, ProviderKind::HostedDocs, 200, RevisionStatus::Active),
        ];
        assert_eq!(
            select_winner(&participants, Some(ProviderKind::Local), ConflictResolution::Manual),
            None
        );
        assert_eq!(select_winner(&[], None, ConflictResolution::SourceWins), None);
    }

    #[test]
    fn test_initial_status_steady_state() {
        let mut project = test_project();
        assert_eq!(
            initial_status(&project, ProviderKind::Local),
            RevisionStatus::Active
        );

        project.status = ProjectStatus::Migrating;
        project.target_provider_type = Some(ProviderKind::HostedDocs);
        assert_eq!(
            initial_status(&project, ProviderKind::Local),
            RevisionStatus::Source
        );
        assert_eq!(
            initial_status(&project, ProviderKind::HostedDocs),
            RevisionStatus::Target
        );
    }

    fn test_project() -> Project {
        Project {
            project_uuid: Uuid::nil(),
            project_id: "docs-internal".into(),
            title: "Docs Internal".into(),
            short_tag: "DOCS".into(),
            status: ProjectStatus::Active,
            provider_type: ProviderKind::Local,
            provider_config: serde_json::json!({}),
            config_hash: String::new(),
            target_provider_type: None,
            target_provider_config: None,
            resolution_policy: None,
            created_at: 0,
            updated_at: 0,
        }
    }
}

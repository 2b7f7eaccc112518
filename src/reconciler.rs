//! Background reconciler.
//!
//! Re-drives the work the admission path intentionally lets slip:
//! pending AI enrichment (stages 5–6 failures and timeouts), undelivered
//! index writes from the outbox (stages 7–8), and garbage collection of
//! summary/embedding rows that no live revision references anymore.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::store::{Backlog, CatalogStore};

/// What one reconciler pass accomplished.
#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub enrichment_retried: u64,
    pub enrichment_completed: u64,
    pub outbox_delivered: u64,
    pub outbox_requeued: u64,
    pub gc_summaries: u64,
    pub gc_embeddings: u64,
}

pub struct Reconciler {
    store: CatalogStore,
    pipeline: Arc<Pipeline>,
    interval_secs: u64,
}

impl Reconciler {
    pub fn new(store: CatalogStore, pipeline: Arc<Pipeline>, interval_secs: u64) -> Self {
        Self {
            store,
            pipeline,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Run forever; each pass is independent and failures only log.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.tick().await {
                Ok(stats) => {
                    if stats.enrichment_retried > 0
                        || stats.outbox_delivered > 0
                        || stats.outbox_requeued > 0
                    {
                        tracing::info!(
                            enrichment_retried = stats.enrichment_retried,
                            enrichment_completed = stats.enrichment_completed,
                            outbox_delivered = stats.outbox_delivered,
                            outbox_requeued = stats.outbox_requeued,
                            "reconciler pass"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "reconciler pass failed"),
            }
            tokio::time::sleep(Duration::from_secs(self.interval_secs)).await;
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&self) -> Result<TickStats> {
        let mut stats = TickStats::default();
        let now = Utc::now().timestamp();

        // Enrichment retries, oldest due first.
        for (document, attempts) in self.store.enrichment_due(now, 50).await? {
            let live = self.store.live_revisions(document.document_uuid).await?;
            let Some(hash) = live
                .into_iter()
                .max_by_key(|r| (r.modified_time, r.revision_id))
                .map(|r| r.content_hash)
            else {
                continue;
            };
            stats.enrichment_retried += 1;
            let state = self
                .pipeline
                .run_enrichment(document.document_uuid, &hash, attempts)
                .await?;
            if state == crate::models::EnrichmentState::Complete {
                stats.enrichment_completed += 1;
                // Freshly attached summaries should reach the keyword index.
                let mut tx = self.store.begin().await?;
                CatalogStore::enqueue_index_write(&mut tx, document.document_uuid, "keyword")
                    .await?;
                tx.commit().await?;
            }
        }

        // Outbox re-drives with exponential spacing per row.
        for row in self.store.outbox_due(now, 100).await? {
            match self
                .pipeline
                .deliver_index_write(row.document_uuid, &row.kind)
                .await
            {
                Ok(()) => {
                    self.store.outbox_delete(row.outbox_id).await?;
                    stats.outbox_delivered += 1;
                }
                Err(e) => {
                    let delay = (60i64 << (row.attempts.min(6) as u32)).min(3600);
                    self.store
                        .outbox_retry_later(row.outbox_id, &e.to_string(), now + delay)
                        .await?;
                    stats.outbox_requeued += 1;
                }
            }
        }

        // Invariant sweep: enrichment rows must reference a live hash.
        let (gc_summaries, gc_embeddings) = self.store.gc_enrichment().await?;
        stats.gc_summaries = gc_summaries;
        stats.gc_embeddings = gc_embeddings;

        Ok(stats)
    }

    /// Backlog counters for `GET /admin/reconciler/backlog`.
    pub async fn backlog(&self) -> Result<Backlog> {
        self.store.backlog().await
    }
}

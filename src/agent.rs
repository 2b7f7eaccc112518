//! Stateless indexer agent.
//!
//! Continuously reflects one source workspace into the central catalog.
//! The agent holds no durable state beyond its API token: on restart it
//! re-scans from scratch and the server's idempotent upsert turns
//! unchanged documents into cache hits.
//!
//! Two long-lived loops run concurrently: the heartbeat loop reports
//! liveness and stats every interval, and the scan loop enumerates the
//! workspace, hashes candidates locally, and submits batches. Retries use
//! exponential backoff with jitter; envelopes the server rejects with 4xx
//! land in a per-agent dead-letter file so one bad document never blocks
//! the scan.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::config::{AgentConfig, Config};
use crate::models::{
    DocumentEnvelope, EnvelopeAction, EnvelopeDocument, HeartbeatRequest, ProviderKind,
    RegisterRequest, RegisterResponse, SubmitRequest, SubmitResponse,
};
use crate::normalize;
use crate::provider::{WorkspaceProvider, UUID_METADATA_KEY};
use crate::provider_fs::{parse_frontmatter, LocalProvider, LocalProviderConfig};

/// Backoff schedule for submissions: base 1s, factor 2, jitter ±20%,
/// cap 5 minutes.
const BACKOFF_BASE_SECS: f64 = 1.0;
const BACKOFF_CAP_SECS: f64 = 300.0;
const MAX_SUBMIT_ATTEMPTS: u32 = 10;

/// Stats shared between the scan loop and the heartbeat loop.
#[derive(Debug, Default, Clone)]
struct AgentStats {
    status: String,
    last_scan: Option<DateTime<Utc>>,
    document_count: i64,
}

pub struct Agent {
    http: reqwest::Client,
    server_url: String,
    api_token: String,
    indexer_uuid: Uuid,
    config: AgentConfig,
    provider: Arc<LocalProvider>,
    batch_size: usize,
    heartbeat_interval: Duration,
    stats: Arc<Mutex<AgentStats>>,
    /// Documents seen by this process, for delete detection. In-memory
    /// only: statelessness across restarts is deliberate.
    seen: HashMap<String, Uuid>,
    /// Latest acknowledged modified_time; advances only on 2xx.
    watermark: i64,
}

/// Register against the central server and print the issued credentials.
pub async fn run_register(config: &Config) -> anyhow::Result<()> {
    let agent_config = require_agent(config)?;
    let response = register(agent_config).await?;
    println!("indexer_uuid: {}", response.indexer_uuid);
    println!("api_token: {}", response.api_token);
    println!("expires_at: {}", response.expires_at.to_rfc3339());
    println!(
        "heartbeat_interval_secs: {}",
        response.config.heartbeat_interval_secs
    );
    println!("batch_size: {}", response.config.batch_size);
    Ok(())
}

/// Enumerate and hash the workspace without submitting anything.
pub async fn run_dry_scan(config: &Config) -> anyhow::Result<()> {
    let agent_config = require_agent(config)?;
    let provider = build_provider(agent_config)?;
    let listings = provider.list().await?;

    println!("scan {} (dry-run)", agent_config.project_id);
    println!("  candidates found: {}", listings.len());
    let mut with_uuid = 0usize;
    for listing in &listings {
        if listing.declared_uuid.is_some() {
            with_uuid += 1;
        }
    }
    println!("  with declared uuid: {}", with_uuid);
    println!("  without declared uuid: {}", listings.len() - with_uuid);
    println!("ok");
    Ok(())
}

/// Run the agent until the process is terminated.
pub async fn run_agent(config: &Config) -> anyhow::Result<()> {
    let agent_config = require_agent(config)?.clone();

    let (indexer_uuid, api_token, heartbeat_secs, batch_size) = match (
        &agent_config.api_token,
        agent_config.indexer_uuid,
    ) {
        (Some(token), Some(uuid)) => (uuid, token.clone(), 300u64, 50usize),
        _ => {
            let response = register(&agent_config).await?;
            (
                response.indexer_uuid,
                response.api_token,
                response.config.heartbeat_interval_secs,
                response.config.batch_size,
            )
        }
    };

    let provider = Arc::new(build_provider(&agent_config)?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    let stats = Arc::new(Mutex::new(AgentStats {
        status: "healthy".to_string(),
        ..AgentStats::default()
    }));

    let mut agent = Agent {
        http: http.clone(),
        server_url: agent_config.server_url.trim_end_matches('/').to_string(),
        api_token: api_token.clone(),
        indexer_uuid,
        config: agent_config.clone(),
        provider,
        batch_size: batch_size.max(1),
        heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
        stats: stats.clone(),
        seen: HashMap::new(),
        watermark: 0,
    };

    // Heartbeat loop, independent of the scan timer.
    let heartbeat = {
        let http = http.clone();
        let server_url = agent.server_url.clone();
        let api_token = api_token.clone();
        let stats = stats.clone();
        let interval = agent.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                let snapshot = stats.lock().await.clone();
                let request = HeartbeatRequest {
                    indexer_uuid,
                    status: snapshot.status,
                    last_scan: snapshot.last_scan,
                    document_count: snapshot.document_count,
                };
                let result = http
                    .post(format!("{}/indexer/heartbeat", server_url))
                    .bearer_auth(&api_token)
                    .json(&request)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().as_u16() == 410 => {
                        tracing::error!("API token revoked; re-registration required");
                        return;
                    }
                    Ok(response) if !response.status().is_success() => {
                        tracing::warn!(status = %response.status(), "heartbeat rejected");
                    }
                    Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    _ => {}
                }
                tokio::time::sleep(interval).await;
            }
        })
    };

    tracing::info!(
        indexer_uuid = %indexer_uuid,
        project_id = %agent.config.project_id,
        "agent running"
    );

    let scan_interval = Duration::from_secs(agent.config.scan_interval_secs.max(1));
    loop {
        match agent.scan_and_submit().await {
            Ok(submitted) => {
                let mut s = stats.lock().await;
                s.status = "healthy".to_string();
                s.last_scan = Some(Utc::now());
                s.document_count = submitted as i64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "scan failed");
                stats.lock().await.status = "degraded".to_string();
            }
        }
        if heartbeat.is_finished() {
            anyhow::bail!("heartbeat loop terminated; token revoked");
        }
        tokio::time::sleep(scan_interval).await;
    }
}

fn require_agent(config: &Config) -> anyhow::Result<&AgentConfig> {
    config
        .agent
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[agent] section required for hermes-agent"))
}

fn build_provider(config: &AgentConfig) -> anyhow::Result<LocalProvider> {
    Ok(LocalProvider::new(LocalProviderConfig {
        root: config.root.clone(),
        include_globs: config.include_globs.clone(),
        exclude_globs: config.exclude_globs.clone(),
        path_prefix: config.path_prefix.clone(),
        allowed_extensions: config.allowed_extensions.clone(),
        follow_symlinks: false,
    })?)
}

async fn register(config: &AgentConfig) -> anyhow::Result<RegisterResponse> {
    let token = config
        .registration_token
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("agent.registration_token required to register"))?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    // Probe the server before spending the one-shot token.
    let health = http
        .get(format!(
            "{}/health",
            config.server_url.trim_end_matches('/')
        ))
        .send()
        .await?;
    if !health.status().is_success() {
        anyhow::bail!("server health check failed: {}", health.status());
    }

    let request = RegisterRequest {
        indexer_type: config.indexer_type.clone(),
        project_id: config.project_id.clone(),
        workspace_scope: config.root.display().to_string(),
        hostname: hostname(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    let response = http
        .post(format!(
            "{}/indexer/register",
            config.server_url.trim_end_matches('/')
        ))
        .bearer_auth(token)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("registration failed ({}): {}", status, body);
    }

    Ok(response.json().await?)
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
}

impl Agent {
    /// One full scan: enumerate, hash, batch, submit, detect deletes.
    /// Returns the number of candidates submitted successfully.
    async fn scan_and_submit(&mut self) -> anyhow::Result<usize> {
        let listings = self.provider.list().await?;

        // Parallel content reads with a small pool.
        let semaphore = Arc::new(Semaphore::new(self.config.read_concurrency.max(1)));
        let mut handles = Vec::with_capacity(listings.len());
        for listing in listings {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let provider_config = self.config.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                build_envelope(&provider_config, provider, listing).await
            }));
        }

        let mut envelopes = Vec::new();
        for handle in handles {
            if let Ok(Some(envelope)) = handle.await {
                envelopes.push(envelope);
            }
        }

        // Delete detection: previously seen candidates that vanished.
        let current: HashMap<String, Uuid> = envelopes
            .iter()
            .filter_map(|e| {
                e.document
                    .uuid
                    .map(|u| (e.document.provider_document_id.clone(), u))
            })
            .collect();
        let mut deletes = Vec::new();
        for (provider_document_id, uuid) in &self.seen {
            if !current.contains_key(provider_document_id) {
                deletes.push(delete_envelope(
                    &self.config.project_id,
                    provider_document_id,
                    *uuid,
                ));
            }
        }
        envelopes.extend(deletes);

        let mut submitted = 0usize;
        for batch in envelopes.chunks(self.batch_size) {
            if self.submit_batch(batch).await? {
                submitted += batch
                    .iter()
                    .filter(|e| e.action == EnvelopeAction::Upsert)
                    .count();
                for envelope in batch {
                    let ts = envelope.document.modified_time.timestamp();
                    if ts > self.watermark {
                        self.watermark = ts;
                    }
                }
            }
        }

        self.seen = current;
        tracing::info!(
            submitted,
            watermark = self.watermark,
            "scan complete"
        );
        Ok(submitted)
    }

    /// Submit one batch. Returns `true` when acknowledged; `false` when
    /// the batch was dead-lettered. Transient failures retry here with
    /// backoff and eventually propagate as errors.
    async fn submit_batch(&self, batch: &[DocumentEnvelope]) -> anyhow::Result<bool> {
        let request = SubmitRequest {
            indexer_id: self.indexer_uuid,
            documents: batch.to_vec(),
        };

        for attempt in 0..MAX_SUBMIT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let response = self
                .http
                .post(format!("{}/indexer/documents", self.server_url))
                .bearer_auth(&self.api_token)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: SubmitResponse = response.json().await?;
                        for result in &parsed.results {
                            if result.status == "rejected" {
                                tracing::warn!(
                                    errors = ?result.errors,
                                    "envelope rejected by server"
                                );
                            }
                        }
                        return Ok(true);
                    }
                    if status.is_server_error() {
                        tracing::warn!(status = %status, attempt, "submit failed, backing off");
                        continue;
                    }
                    // 4xx: dead-letter the batch and move on.
                    let body = response.text().await.unwrap_or_default();
                    self.dead_letter(batch, status.as_u16(), &body)?;
                    return Ok(false);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "submit failed, backing off");
                    continue;
                }
            }
        }

        anyhow::bail!("batch submission exhausted retries")
    }

    /// Append rejected envelopes to the dead-letter log, one JSON line
    /// per envelope, and keep scanning.
    fn dead_letter(&self, batch: &[DocumentEnvelope], status: u16, body: &str) -> anyhow::Result<()> {
        tracing::warn!(status, "dead-lettering batch of {}", batch.len());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.dead_letter_path)?;
        for envelope in batch {
            let line = serde_json::json!({
                "rejected_at": Utc::now().to_rfc3339(),
                "http_status": status,
                "server_detail": body,
                "envelope": envelope,
            });
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

/// Read, identify, hash, and wrap one candidate.
///
/// Minting writes the fresh UUID back into the file's frontmatter before
/// hashing, so the submitted hash matches what the next scan will see.
async fn build_envelope(
    config: &AgentConfig,
    provider: Arc<LocalProvider>,
    listing: crate::provider::ProviderListing,
) -> Option<DocumentEnvelope> {
    let mut declared = listing.declared_uuid;
    let mut modified_time = listing.modified_time;
    if declared.is_none() {
        let minted = Uuid::new_v4();
        let kv = serde_json::json!({ UUID_METADATA_KEY: minted.to_string() });
        match provider
            .update_metadata(&listing.provider_document_id, &kv)
            .await
        {
            Ok(()) => {
                declared = Some(minted);
                // The write-back touched the file; pick up the new mtime
                // now so the next scan hashes identically.
                if let Some(fresh) = file_mtime(config, &listing.provider_document_id) {
                    modified_time = fresh;
                }
            }
            Err(e) => {
                tracing::warn!(
                    provider_document_id = %listing.provider_document_id,
                    error = %e,
                    "uuid write-back failed, submitting without declared uuid"
                );
            }
        }
    }

    let document = match provider.read(&listing.provider_document_id).await {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(
                provider_document_id = %listing.provider_document_id,
                error = %e,
                "read failed, skipping candidate"
            );
            return None;
        }
    };

    let frontmatter = parse_frontmatter(&document.content);
    let title = frontmatter
        .get("title")
        .cloned()
        .unwrap_or_else(|| listing.title.clone());
    let doc_type = frontmatter.get("doc-type").cloned().unwrap_or_default();
    let status = frontmatter.get("status").cloned().unwrap_or_default();
    let revision_reference = frontmatter.get("revision").cloned();

    let (_, content_hash) = normalize::hash_document(
        &document.content,
        &title,
        modified_time,
        provider.rendering_artifacts(),
    );

    Some(DocumentEnvelope {
        action: EnvelopeAction::Upsert,
        document: EnvelopeDocument {
            uuid: declared,
            project_id: config.project_id.clone(),
            provider_type: ProviderKind::Local,
            provider_document_id: listing.provider_document_id,
            title,
            doc_type,
            status,
            content: Some(document.content),
            content_hash,
            revision_reference,
            modified_time,
            metadata: document.metadata,
            summary: None,
            embedding: None,
        },
    })
}

fn file_mtime(config: &AgentConfig, provider_document_id: &str) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(config.root.join(provider_document_id)).ok()?;
    let secs = meta
        .modified()
        .ok()?
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    chrono::TimeZone::timestamp_opt(&Utc, secs, 0).single()
}

fn delete_envelope(
    project_id: &str,
    provider_document_id: &str,
    uuid: Uuid,
) -> DocumentEnvelope {
    DocumentEnvelope {
        action: EnvelopeAction::Delete,
        document: EnvelopeDocument {
            uuid: Some(uuid),
            project_id: project_id.to_string(),
            provider_type: ProviderKind::Local,
            provider_document_id: provider_document_id.to_string(),
            title: String::new(),
            doc_type: String::new(),
            status: String::new(),
            content: None,
            content_hash: String::new(),
            revision_reference: None,
            modified_time: Utc::now(),
            metadata: serde_json::json!({}),
            summary: None,
            embedding: None,
        },
    }
}

/// Exponential backoff with ±20% jitter, capped at 5 minutes.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_SECS * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(BACKOFF_CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64(capped * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let d1 = backoff_delay(1);
        assert!(d1 >= Duration::from_secs_f64(0.8) && d1 <= Duration::from_secs_f64(1.2));

        let d4 = backoff_delay(4);
        assert!(d4 >= Duration::from_secs_f64(8.0 * 0.8));
        assert!(d4 <= Duration::from_secs_f64(8.0 * 1.2));

        let d20 = backoff_delay(20);
        assert!(d20 <= Duration::from_secs_f64(BACKOFF_CAP_SECS * 1.2));
    }

    #[test]
    fn test_delete_envelope_shape() {
        let uuid = Uuid::new_v4();
        let envelope = delete_envelope("docs-internal", "gone.md", uuid);
        assert_eq!(envelope.action, EnvelopeAction::Delete);
        assert_eq!(envelope.document.uuid, Some(uuid));
        assert_eq!(envelope.document.provider_document_id, "gone.md");
    }
}

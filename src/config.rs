//! Configuration parsing and validation.
//!
//! Both binaries read a TOML file (default: `config/hermes.toml`). The
//! `[store]`, `[pipeline]`, `[ai]`, `[search]`, and `[migration]` sections
//! drive the server; `[server]` is required by `hermesd` and `[agent]` by
//! `hermes-agent`. Unused sections are ignored so one file can configure a
//! whole deployment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Externally reachable base URL, recorded in the instance row.
    pub base_url: String,
    /// Human-chosen name recorded at first boot.
    pub instance_name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Static bearer token for the `/admin` surface.
    pub admin_token: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_bootstrap_ttl")]
    pub bootstrap_token_ttl_secs: i64,
    #[serde(default = "default_api_token_ttl")]
    pub api_token_ttl_secs: i64,
}

fn default_environment() -> String {
    "production".to_string()
}
fn default_heartbeat_interval() -> u64 {
    300
}
fn default_batch_size() -> usize {
    50
}
fn default_bootstrap_ttl() -> i64 {
    3600
}
fn default_api_token_ttl() -> i64 {
    90 * 24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Admission body cap in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Normalized content above this size is truncated for search.
    #[serde(default = "default_retention_bytes")]
    pub retention_bytes: usize,
    /// Bytes retained in the search copy when truncating.
    #[serde(default = "default_search_copy_bytes")]
    pub search_copy_bytes: usize,
    /// Window W for concurrent-edit classification.
    #[serde(default = "default_concurrent_edit_window")]
    pub concurrent_edit_window_secs: i64,
    /// Deadline for the summarize and embed stages.
    #[serde(default = "default_enrichment_timeout")]
    pub enrichment_timeout_secs: u64,
    /// Inline delivery attempts for index writes before the outbox
    /// hands the row to the reconciler.
    #[serde(default = "default_index_attempts")]
    pub index_retry_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            retention_bytes: default_retention_bytes(),
            search_copy_bytes: default_search_copy_bytes(),
            concurrent_edit_window_secs: default_concurrent_edit_window(),
            enrichment_timeout_secs: default_enrichment_timeout(),
            index_retry_attempts: default_index_attempts(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_retention_bytes() -> usize {
    1024 * 1024
}
fn default_search_copy_bytes() -> usize {
    85_000
}
fn default_concurrent_edit_window() -> i64 {
    300
}
fn default_enrichment_timeout() -> u64 {
    30
}
fn default_index_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// `disabled` or `http`.
    #[serde(default = "default_ai_provider")]
    pub summarize_provider: String,
    #[serde(default = "default_ai_provider")]
    pub embed_provider: String,
    #[serde(default)]
    pub summarize_endpoint: Option<String>,
    #[serde(default)]
    pub embed_endpoint: Option<String>,
    #[serde(default)]
    pub summarize_model: Option<String>,
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub embed_dims: Option<usize>,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_bytes: usize,
    #[serde(default = "default_ai_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            summarize_provider: default_ai_provider(),
            embed_provider: default_ai_provider(),
            summarize_endpoint: None,
            embed_endpoint: None,
            summarize_model: None,
            embed_model: None,
            embed_dims: None,
            chunk_bytes: default_chunk_bytes(),
            chunk_overlap_bytes: default_chunk_overlap(),
            max_retries: default_ai_retries(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl AiConfig {
    pub fn summarize_enabled(&self) -> bool {
        self.summarize_provider != "disabled"
    }

    pub fn embed_enabled(&self) -> bool {
        self.embed_provider != "disabled"
    }
}

fn default_ai_provider() -> String {
    "disabled".to_string()
}
fn default_chunk_bytes() -> usize {
    2800
}
fn default_chunk_overlap() -> usize {
    320
}
fn default_ai_retries() -> u32 {
    5
}
fn default_ai_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Weight of the vector score in hybrid queries; keyword gets the rest.
    #[serde(default = "default_vector_weight")]
    pub hybrid_vector_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_vector_weight: default_vector_weight(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_vector_weight() -> f64 {
    0.5
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct MigrationConfig {
    #[serde(default = "default_copy_concurrency")]
    pub copy_concurrency: usize,
    #[serde(default = "default_copy_timeout")]
    pub copy_timeout_secs: u64,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            copy_concurrency: default_copy_concurrency(),
            copy_timeout_secs: default_copy_timeout(),
            write_retries: default_write_retries(),
        }
    }
}

fn default_copy_concurrency() -> usize {
    5
}
fn default_copy_timeout() -> u64 {
    300
}
fn default_write_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Central server base URL (e.g. `https://hermes.internal:8844`).
    pub server_url: String,
    /// One-shot bootstrap token; consumed on first registration.
    #[serde(default)]
    pub registration_token: Option<String>,
    /// Previously issued API token, for processes restarted with one.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Indexer identity that `api_token` belongs to.
    #[serde(default)]
    pub indexer_uuid: Option<uuid::Uuid>,
    pub project_id: String,
    #[serde(default = "default_indexer_type")]
    pub indexer_type: String,
    /// Root of the workspace to scan.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    /// Where envelopes rejected with 4xx are appended.
    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: PathBuf,
}

fn default_indexer_type() -> String {
    "filesystem".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_scan_interval() -> u64 {
    600
}
fn default_read_concurrency() -> usize {
    4
}
fn default_dead_letter_path() -> PathBuf {
    PathBuf::from("hermes-agent.deadletter.jsonl")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.search_copy_bytes > config.pipeline.retention_bytes {
        anyhow::bail!("pipeline.search_copy_bytes must not exceed pipeline.retention_bytes");
    }

    if !(0.0..=1.0).contains(&config.search.hybrid_vector_weight) {
        anyhow::bail!("search.hybrid_vector_weight must be in [0.0, 1.0]");
    }

    if config.search.final_limit < 1 {
        anyhow::bail!("search.final_limit must be >= 1");
    }

    match config.ai.summarize_provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!(
            "Unknown summarize provider: '{}'. Must be disabled or http.",
            other
        ),
    }
    match config.ai.embed_provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!(
            "Unknown embed provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    if config.ai.embed_enabled() {
        if config.ai.embed_dims.is_none() || config.ai.embed_dims == Some(0) {
            anyhow::bail!(
                "ai.embed_dims must be > 0 when embed_provider is '{}'",
                config.ai.embed_provider
            );
        }
        if config.ai.embed_model.is_none() {
            anyhow::bail!(
                "ai.embed_model must be specified when embed_provider is '{}'",
                config.ai.embed_provider
            );
        }
    }
    if config.ai.summarize_enabled() && config.ai.summarize_model.is_none() {
        anyhow::bail!(
            "ai.summarize_model must be specified when summarize_provider is '{}'",
            config.ai.summarize_provider
        );
    }

    if let Some(ref server) = config.server {
        if server.admin_token.trim().is_empty() {
            anyhow::bail!("server.admin_token must not be empty");
        }
        if server.batch_size == 0 {
            anyhow::bail!("server.batch_size must be > 0");
        }
    }

    if let Some(ref agent) = config.agent {
        if agent.registration_token.is_none() && agent.api_token.is_none() {
            anyhow::bail!("agent requires registration_token or api_token");
        }
        if agent.api_token.is_some() && agent.indexer_uuid.is_none() {
            anyhow::bail!("agent.api_token requires agent.indexer_uuid");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_parses() {
        let f = write_config(
            r#"
[store]
path = "data/hermes.sqlite"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.pipeline.max_body_bytes, 8 * 1024 * 1024);
        assert_eq!(cfg.pipeline.search_copy_bytes, 85_000);
        assert_eq!(cfg.search.hybrid_vector_weight, 0.5);
        assert!(!cfg.ai.embed_enabled());
    }

    #[test]
    fn test_bad_hybrid_weight_rejected() {
        let f = write_config(
            r#"
[store]
path = "data/hermes.sqlite"

[search]
hybrid_vector_weight = 1.5
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_embed_provider_requires_dims_and_model() {
        let f = write_config(
            r#"
[store]
path = "data/hermes.sqlite"

[ai]
embed_provider = "http"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_agent_requires_some_token() {
        let f = write_config(
            r#"
[store]
path = "data/hermes.sqlite"

[agent]
server_url = "http://127.0.0.1:8844"
project_id = "docs-internal"
root = "./docs-internal"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}

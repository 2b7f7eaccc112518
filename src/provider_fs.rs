//! Local filesystem workspace adapter.
//!
//! Walks a root directory with glob include/exclude patterns and treats
//! relative paths as provider document ids. The document UUID round-trips
//! through a `hermes-uuid` frontmatter key so repeated scans are
//! deterministic.
//!
//! # Default Excludes
//!
//! `**/.git/**`, `**/target/**`, and `**/node_modules/**` are always
//! excluded regardless of configuration.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{HermesError, Result};
use crate::models::ProviderKind;
use crate::provider::{
    ProviderDocument, ProviderListing, WorkspaceProvider, UUID_METADATA_KEY,
};

#[derive(Debug, Deserialize, Clone)]
pub struct LocalProviderConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Extensions with the leading dot, e.g. `[".md", ".txt"]`; empty
    /// means the globs alone decide.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub struct LocalProvider {
    config: LocalProviderConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl LocalProvider {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: LocalProviderConfig = serde_json::from_value(config.clone()).map_err(|e| {
            HermesError::PermanentBackend(format!("bad local provider config: {}", e))
        })?;
        Self::new(config)
    }

    pub fn new(config: LocalProviderConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    fn resolve_path(&self, provider_document_id: &str) -> Result<PathBuf> {
        if provider_document_id.contains("..") || Path::new(provider_document_id).is_absolute() {
            return Err(HermesError::InvalidRequest(format!(
                "bad provider document id: {}",
                provider_document_id
            )));
        }
        Ok(self.config.root.join(provider_document_id))
    }

    fn matches(&self, rel: &str) -> bool {
        if self.exclude.is_match(rel) || !self.include.is_match(rel) {
            return false;
        }
        if let Some(prefix) = &self.config.path_prefix {
            if !rel.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.config.allowed_extensions.is_empty() {
            let ext = Path::new(rel)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            if !self.config.allowed_extensions.iter().any(|a| a == &ext) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl WorkspaceProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn list(&self) -> Result<Vec<ProviderListing>> {
        let root = &self.config.root;
        if !root.exists() {
            return Err(HermesError::PermanentBackend(format!(
                "workspace root does not exist: {}",
                root.display()
            )));
        }

        let mut items = Vec::new();
        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = entry.map_err(|e| {
                HermesError::TransientBackend(format!("walk failed under {}: {}", root.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if !self.matches(&rel_str) {
                continue;
            }

            // Unreadable or non-UTF-8 files are skipped, not fatal.
            let Ok(content) = std::fs::read_to_string(path) else {
                tracing::debug!(path = %path.display(), "skipping unreadable file");
                continue;
            };

            let declared_uuid = parse_frontmatter(&content)
                .get(UUID_METADATA_KEY)
                .and_then(|v| Uuid::parse_str(v).ok());

            items.push(ProviderListing {
                provider_document_id: rel_str,
                title: file_title(path),
                modified_time: file_mtime(path),
                declared_uuid,
            });
        }

        items.sort_by(|a, b| a.provider_document_id.cmp(&b.provider_document_id));
        Ok(items)
    }

    async fn read(&self, provider_document_id: &str) -> Result<ProviderDocument> {
        let path = self.resolve_path(provider_document_id)?;
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HermesError::NotFound(format!("no such document: {}", provider_document_id))
            }
            _ => HermesError::TransientBackend(format!("read {}: {}", path.display(), e)),
        })?;

        let fm = parse_frontmatter(&content);
        let metadata = serde_json::Value::Object(
            fm.into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        );

        Ok(ProviderDocument { content, metadata })
    }

    async fn write(
        &self,
        provider_document_id: Option<&str>,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let id = match provider_document_id {
            Some(id) => id.to_string(),
            None => {
                let title = metadata
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("untitled");
                format!("{}.md", slugify(title))
            }
        };
        let path = self.resolve_path(&id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HermesError::TransientBackend(format!("mkdir {}: {}", parent.display(), e))
            })?;
        }

        let body = merge_frontmatter(content, metadata);
        std::fs::write(&path, body).map_err(|e| {
            HermesError::TransientBackend(format!("write {}: {}", path.display(), e))
        })?;
        Ok(id)
    }

    async fn update_metadata(
        &self,
        provider_document_id: &str,
        kv: &serde_json::Value,
    ) -> Result<()> {
        let path = self.resolve_path(provider_document_id)?;
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HermesError::NotFound(format!("no such document: {}", provider_document_id))
            }
            _ => HermesError::TransientBackend(format!("read {}: {}", path.display(), e)),
        })?;

        let updated = merge_frontmatter(&content, kv);
        std::fs::write(&path, updated).map_err(|e| {
            HermesError::TransientBackend(format!("write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn delete(&self, provider_document_id: &str) -> Result<()> {
        let path = self.resolve_path(provider_document_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HermesError::NotFound(
                format!("no such document: {}", provider_document_id),
            )),
            Err(e) => Err(HermesError::TransientBackend(format!(
                "delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| {
            HermesError::PermanentBackend(format!("bad glob '{}': {}", pattern, e))
        })?);
    }
    builder
        .build()
        .map_err(|e| HermesError::PermanentBackend(format!("bad glob set: {}", e)))
}

fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    let secs = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

// ============ Frontmatter ============

/// Parse a leading `---` frontmatter block into key/value pairs.
///
/// Only flat `key: value` lines are recognized; anything else is kept
/// verbatim on rewrite but not exposed as metadata.
pub fn parse_frontmatter(content: &str) -> std::collections::BTreeMap<String, String> {
    let mut map = std::collections::BTreeMap::new();
    let Some(block) = frontmatter_block(content) else {
        return map;
    };
    for line in block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if !key.is_empty() && !value.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// The text between the opening and closing `---` markers, if present.
fn frontmatter_block(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

/// Body text with any frontmatter block removed.
pub fn strip_frontmatter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---\n") else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => content,
    }
}

/// Merge key/value pairs into the content's frontmatter, creating the
/// block when absent and preserving unknown keys.
pub fn merge_frontmatter(content: &str, kv: &serde_json::Value) -> String {
    let mut map = parse_frontmatter(content);
    if let serde_json::Value::Object(obj) = kv {
        for (k, v) in obj {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            map.insert(k.clone(), value);
        }
    }

    if map.is_empty() {
        return content.to_string();
    }

    let body = strip_frontmatter(content);
    let mut out = String::from("---\n");
    for (k, v) in &map {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frontmatter() {
        let content = "---\ntitle: RFC-001\nhermes-uuid: 4a1e2f90-0000-4000-8000-000000000001\n---\nHello\n";
        let fm = parse_frontmatter(content);
        assert_eq!(fm.get("title").map(String::as_str), Some("RFC-001"));
        assert_eq!(
            fm.get("hermes-uuid").map(String::as_str),
            Some("4a1e2f90-0000-4000-8000-000000000001")
        );
    }

    #[test]
    fn test_parse_without_frontmatter() {
        assert!(parse_frontmatter("Hello\n").is_empty());
    }

    #[test]
    fn test_strip_frontmatter() {
        let content = "---\ntitle: x\n---\nHello\n";
        assert_eq!(strip_frontmatter(content), "Hello\n");
        assert_eq!(strip_frontmatter("Hello\n"), "Hello\n");
    }

    #[test]
    fn test_merge_frontmatter_creates_block() {
        let merged = merge_frontmatter("Hello\n", &serde_json::json!({"hermes-uuid": "u1"}));
        assert!(merged.starts_with("---\nhermes-uuid: u1\n---\n"));
        assert!(merged.ends_with("Hello\n"));
    }

    #[test]
    fn test_merge_frontmatter_preserves_existing_keys() {
        let content = "---\ntitle: RFC-001\n---\nBody\n";
        let merged = merge_frontmatter(content, &serde_json::json!({"hermes-uuid": "u1"}));
        let fm = parse_frontmatter(&merged);
        assert_eq!(fm.get("title").map(String::as_str), Some("RFC-001"));
        assert_eq!(fm.get("hermes-uuid").map(String::as_str), Some("u1"));
        assert!(merged.ends_with("Body\n"));
    }

    #[test]
    fn test_merge_frontmatter_roundtrip_idempotent() {
        let kv = serde_json::json!({"hermes-uuid": "u1"});
        let once = merge_frontmatter("Body\n", &kv);
        let twice = merge_frontmatter(&once, &kv);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  "), "untitled");
        assert_eq!(slugify("RFC 001: Intro"), "rfc-001-intro");
    }

    #[tokio::test]
    async fn test_list_read_write_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("a.md"),
            "---\nhermes-uuid: 6b55a3e4-98a1-4a41-9e0b-6c1a56e80a01\n---\nAlpha\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("b.md"), "Beta\n").unwrap();
        std::fs::write(tmp.path().join("skip.bin"), "x").unwrap();

        let provider = LocalProvider::new(LocalProviderConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec![],
            path_prefix: None,
            allowed_extensions: vec![],
            follow_symlinks: false,
        })
        .unwrap();

        let listings = provider.list().await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].provider_document_id, "a.md");
        assert!(listings[0].declared_uuid.is_some());
        assert!(listings[1].declared_uuid.is_none());

        let doc = provider.read("a.md").await.unwrap();
        assert!(doc.content.contains("Alpha"));

        provider
            .update_metadata("b.md", &serde_json::json!({"hermes-uuid": "u-b"}))
            .await
            .unwrap();
        let doc_b = provider.read("b.md").await.unwrap();
        assert!(doc_b.content.starts_with("---\nhermes-uuid: u-b\n---\n"));

        let id = provider
            .write(None, "Gamma\n", &serde_json::json!({"title": "Gamma Doc"}))
            .await
            .unwrap();
        assert_eq!(id, "gamma-doc.md");
        assert!(tmp.path().join("gamma-doc.md").exists());

        provider.delete("b.md").await.unwrap();
        assert!(!tmp.path().join("b.md").exists());
        assert!(matches!(
            provider.read("b.md").await,
            Err(HermesError::NotFound(_))
        ));
    }
}

//! Content normalization and the interoperable content hash.
//!
//! Agents hash locally and the server re-hashes on admission; the two must
//! agree byte-for-byte or caches stop interoperating, so every step here is
//! deterministic:
//!
//! 1. CRLF and lone CR become LF.
//! 2. HTML comments are stripped.
//! 3. Provider-declared rendering artifacts are stripped.
//! 4. Trailing whitespace is trimmed from each line.
//! 5. Trailing newlines collapse to a single LF.
//!
//! The hash covers the normalized content, the title, and the RFC 3339
//! modified time, joined by 0x1F unit separators, and serializes as
//! `sha256:<lowercase hex>`.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Normalize raw document content for hashing and retention.
///
/// `artifacts` are provider-declared substrings (rendering leftovers such as
/// a hosted suite's cursor markers) removed verbatim before line processing.
pub fn normalize_content(raw: &str, artifacts: &[String]) -> String {
    let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");

    text = strip_html_comments(&text);

    for artifact in artifacts {
        if !artifact.is_empty() {
            text = text.replace(artifact.as_str(), "");
        }
    }

    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }

    // Collapse final trailing newlines to a single LF.
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');

    out
}

/// Remove `<!-- ... -->` spans, including unterminated trailing ones.
fn strip_html_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Compute the normative content hash: `sha256:<lowercase hex>` over
/// `normalized || 0x1F || title || 0x1F || modified_time_RFC3339`.
pub fn content_hash(normalized: &str, title: &str, modified_time: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0x1F]);
    hasher.update(title.as_bytes());
    hasher.update([0x1F]);
    hasher.update(
        modified_time
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .as_bytes(),
    );
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Normalize and hash in one step.
pub fn hash_document(
    raw_content: &str,
    title: &str,
    modified_time: DateTime<Utc>,
    artifacts: &[String],
) -> (String, String) {
    let normalized = normalize_content(raw_content, artifacts);
    let hash = content_hash(&normalized, title, modified_time);
    (normalized, hash)
}

/// Whether a string looks like a serialized content hash.
pub fn is_valid_hash(s: &str) -> bool {
    match s.strip_prefix("sha256:") {
        Some(hex_part) => {
            hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_crlf_becomes_lf() {
        let n = normalize_content("a\r\nb\rc\n", &[]);
        assert_eq!(n, "a\nb\nc\n");
    }

    #[test]
    fn test_html_comments_stripped() {
        let n = normalize_content("before <!-- hidden --> after\n", &[]);
        assert_eq!(n, "before  after\n");
    }

    #[test]
    fn test_multiline_html_comment_stripped() {
        let n = normalize_content("a\n<!-- one\ntwo\nthree -->\nb\n", &[]);
        assert_eq!(n, "a\n\nb\n");
    }

    #[test]
    fn test_unterminated_comment_stripped_to_end() {
        let n = normalize_content("keep <!-- never closed", &[]);
        assert_eq!(n, "keep\n");
    }

    #[test]
    fn test_trailing_whitespace_trimmed_per_line() {
        let n = normalize_content("a   \nb\t\nc\n", &[]);
        assert_eq!(n, "a\nb\nc\n");
    }

    #[test]
    fn test_trailing_newlines_collapse() {
        let n = normalize_content("body\n\n\n\n", &[]);
        assert_eq!(n, "body\n");
    }

    #[test]
    fn test_no_trailing_newline_gains_one() {
        let n = normalize_content("body", &[]);
        assert_eq!(n, "body\n");
    }

    #[test]
    fn test_artifacts_removed() {
        let artifacts = vec!["\u{200b}".to_string()];
        let n = normalize_content("he\u{200b}llo\n", &artifacts);
        assert_eq!(n, "hello\n");
    }

    #[test]
    fn test_hash_shape() {
        let h = content_hash("x\n", "title", t0());
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), "sha256:".len() + 64);
        assert!(is_valid_hash(&h));
    }

    #[test]
    fn test_hash_deterministic() {
        let a = content_hash("Hello\n", "RFC-001", t0());
        let b = content_hash("Hello\n", "RFC-001", t0());
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_sensitive_to_all_inputs() {
        let base = content_hash("Hello\n", "RFC-001", t0());
        assert_ne!(base, content_hash("Hello!\n", "RFC-001", t0()));
        assert_ne!(base, content_hash("Hello\n", "RFC-002", t0()));
        assert_ne!(
            base,
            content_hash(
                "Hello\n",
                "RFC-001",
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap()
            )
        );
    }

    #[test]
    fn test_equivalent_line_endings_hash_identically() {
        let (_, a) = hash_document("Hello\r\nWorld\r\n", "t", t0(), &[]);
        let (_, b) = hash_document("Hello\nWorld\n", "t", t0(), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_valid_hash_rejects_bad_forms() {
        assert!(!is_valid_hash("md5:abcd"));
        assert!(!is_valid_hash("sha256:xyz"));
        assert!(!is_valid_hash("sha256:ABCDEF"));
        assert!(!is_valid_hash(&format!("sha256:{}", "a".repeat(63))));
        assert!(is_valid_hash(&format!("sha256:{}", "a".repeat(64))));
    }
}

//! Token issuance and verification for indexer agents.
//!
//! Bootstrap tokens are single-use with a short TTL and a single-project
//! scope; consuming one deletes it in the same transaction that creates the
//! indexer row. API tokens carry 32 bytes of entropy, are stored only as
//! SHA-256 hashes, and verify with a constant-time compare.

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{HermesError, Result};
use crate::models::{Indexer, RegisterRequest};
use crate::store::CatalogStore;

/// Generate a fresh token: 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of a token, hex-encoded, as stored at rest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time byte comparison; the XOR accumulator touches every byte
/// regardless of where the first difference sits.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone)]
pub struct AuthService {
    store: CatalogStore,
    bootstrap_ttl_secs: i64,
    api_token_ttl_secs: i64,
}

impl AuthService {
    pub fn new(store: CatalogStore, bootstrap_ttl_secs: i64, api_token_ttl_secs: i64) -> Self {
        Self {
            store,
            bootstrap_ttl_secs,
            api_token_ttl_secs,
        }
    }

    /// Mint a one-shot registration token scoped to one project. The clear
    /// token is returned exactly once; only its hash is stored.
    pub async fn issue_bootstrap_token(&self, project_uuid: Uuid) -> Result<String> {
        let token = generate_token();
        let expires_at = Utc::now().timestamp() + self.bootstrap_ttl_secs;
        self.store
            .insert_bootstrap_token(&hash_token(&token), project_uuid, expires_at)
            .await?;
        Ok(token)
    }

    /// Exchange a bootstrap token for an indexer registration and a
    /// long-lived API token.
    ///
    /// Token consumption and indexer creation share one transaction, so a
    /// bootstrap token can never register two agents.
    pub async fn register_indexer(
        &self,
        bootstrap_token: &str,
        request: &RegisterRequest,
        project_uuid: Uuid,
    ) -> Result<(Indexer, String, i64)> {
        let mut tx = self.store.begin().await?;

        let consumed =
            CatalogStore::consume_bootstrap_token(&mut tx, &hash_token(bootstrap_token)).await?;
        let (scoped_project, expires_at) = consumed
            .ok_or_else(|| HermesError::Unauthorized("unknown registration token".into()))?;

        let now = Utc::now().timestamp();
        if expires_at < now {
            // The row is already deleted by the consume; commit so an
            // expired token cannot be probed repeatedly.
            tx.commit().await?;
            return Err(HermesError::Unauthorized("registration token expired".into()));
        }
        if scoped_project != project_uuid {
            tx.commit().await?;
            return Err(HermesError::Unauthorized(
                "registration token is scoped to a different project".into(),
            ));
        }

        let api_token = generate_token();
        let indexer = Indexer {
            indexer_uuid: Uuid::new_v4(),
            indexer_type: request.indexer_type.clone(),
            project_uuid,
            workspace_scope: request.workspace_scope.clone(),
            token_hash: hash_token(&api_token),
            hostname: request.hostname.clone(),
            version: request.version.clone(),
            created_at: now,
            last_heartbeat: None,
            last_scan: None,
            document_count: 0,
            reported_status: "healthy".to_string(),
            revoked: false,
        };
        CatalogStore::insert_indexer(&mut tx, &indexer).await?;
        tx.commit().await?;

        let token_expires = now + self.api_token_ttl_secs;
        tracing::info!(
            indexer_uuid = %indexer.indexer_uuid,
            indexer_type = %indexer.indexer_type,
            project_uuid = %project_uuid,
            "indexer registered"
        );
        Ok((indexer, api_token, token_expires))
    }

    /// Verify a bearer API token and return the indexer it belongs to.
    pub async fn authenticate_indexer(&self, bearer: &str) -> Result<Indexer> {
        let presented_hash = hash_token(bearer);
        let indexer = self
            .store
            .get_indexer_by_token_hash(&presented_hash)
            .await?
            .ok_or_else(|| HermesError::Unauthorized("unknown API token".into()))?;

        // The lookup already matched on the hash; re-compare in constant
        // time so the verification path never short-circuits.
        if !constant_time_eq(indexer.token_hash.as_bytes(), presented_hash.as_bytes()) {
            return Err(HermesError::Unauthorized("unknown API token".into()));
        }
        if indexer.revoked {
            return Err(HermesError::TokenRevoked);
        }
        Ok(indexer)
    }

    /// Verify the static admin token.
    pub fn verify_admin(&self, bearer: &str, admin_token: &str) -> Result<()> {
        if constant_time_eq(
            hash_token(bearer).as_bytes(),
            hash_token(admin_token).as_bytes(),
        ) {
            Ok(())
        } else {
            Err(HermesError::Unauthorized("bad admin token".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        let t = generate_token();
        assert_eq!(t.len(), 64);
        assert!(t.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(t, generate_token());
    }

    #[test]
    fn test_hash_token_stable() {
        let t = "deadbeef";
        assert_eq!(hash_token(t), hash_token(t));
        assert_ne!(hash_token(t), hash_token("deadbeee"));
        assert_eq!(hash_token(t).len(), 64);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}

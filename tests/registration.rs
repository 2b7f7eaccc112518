//! Bootstrap and API token lifecycle tests.

use hermes::auth::AuthService;
use hermes::error::HermesError;
use hermes::identity::IdentityEngine;
use hermes::models::{ProviderKind, RegisterRequest};
use hermes::store::CatalogStore;
use hermes::{db, migrate};
use uuid::Uuid;

async fn setup() -> (tempfile::TempDir, CatalogStore, Uuid) {
    let tmp = tempfile::tempdir().unwrap();
    let pool = db::connect(&tmp.path().join("catalog.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = CatalogStore::new(pool);

    let identity = IdentityEngine::new(store.clone());
    let (project, _) = identity
        .register_project(
            "docs-internal",
            None,
            None,
            ProviderKind::Local,
            &serde_json::json!({"root": "./docs"}),
        )
        .await
        .unwrap();

    (tmp, store, project.project_uuid)
}

fn request() -> RegisterRequest {
    RegisterRequest {
        indexer_type: "filesystem".to_string(),
        project_id: "docs-internal".to_string(),
        workspace_scope: "./docs".to_string(),
        hostname: Some("agent-host".to_string()),
        version: Some("0.1.0".to_string()),
    }
}

#[tokio::test]
async fn test_register_and_authenticate() {
    let (_tmp, store, project_uuid) = setup().await;
    let auth = AuthService::new(store.clone(), 3600, 90 * 24 * 3600);

    let bootstrap = auth.issue_bootstrap_token(project_uuid).await.unwrap();
    let (indexer, api_token, expires_at) = auth
        .register_indexer(&bootstrap, &request(), project_uuid)
        .await
        .unwrap();

    assert_eq!(indexer.project_uuid, project_uuid);
    assert_eq!(api_token.len(), 64);
    assert!(expires_at > chrono::Utc::now().timestamp());

    // The clear token is never stored.
    let stored = store.get_indexer(indexer.indexer_uuid).await.unwrap().unwrap();
    assert_ne!(stored.token_hash, api_token);
    assert_eq!(stored.token_hash, hermes::auth::hash_token(&api_token));

    let authenticated = auth.authenticate_indexer(&api_token).await.unwrap();
    assert_eq!(authenticated.indexer_uuid, indexer.indexer_uuid);
}

#[tokio::test]
async fn test_bootstrap_token_is_single_use() {
    let (_tmp, store, project_uuid) = setup().await;
    let auth = AuthService::new(store, 3600, 3600);

    let bootstrap = auth.issue_bootstrap_token(project_uuid).await.unwrap();
    auth.register_indexer(&bootstrap, &request(), project_uuid)
        .await
        .unwrap();

    let second = auth.register_indexer(&bootstrap, &request(), project_uuid).await;
    assert!(matches!(second, Err(HermesError::Unauthorized(_))));
}

#[tokio::test]
async fn test_expired_bootstrap_token_rejected() {
    let (_tmp, store, project_uuid) = setup().await;
    // TTL in the past: every issued token is already expired.
    let auth = AuthService::new(store, -10, 3600);

    let bootstrap = auth.issue_bootstrap_token(project_uuid).await.unwrap();
    let result = auth.register_indexer(&bootstrap, &request(), project_uuid).await;
    assert!(matches!(result, Err(HermesError::Unauthorized(_))));
}

#[tokio::test]
async fn test_bootstrap_token_scope_enforced() {
    let (_tmp, store, project_uuid) = setup().await;
    let auth = AuthService::new(store, 3600, 3600);

    let bootstrap = auth.issue_bootstrap_token(project_uuid).await.unwrap();
    let other_project = Uuid::new_v4();
    let result = auth
        .register_indexer(&bootstrap, &request(), other_project)
        .await;
    assert!(matches!(result, Err(HermesError::Unauthorized(_))));
}

#[tokio::test]
async fn test_revoked_token_returns_token_revoked() {
    let (_tmp, store, project_uuid) = setup().await;
    let auth = AuthService::new(store.clone(), 3600, 3600);

    let bootstrap = auth.issue_bootstrap_token(project_uuid).await.unwrap();
    let (indexer, api_token, _) = auth
        .register_indexer(&bootstrap, &request(), project_uuid)
        .await
        .unwrap();

    store.revoke_indexer(indexer.indexer_uuid).await.unwrap();

    let result = auth.authenticate_indexer(&api_token).await;
    assert!(matches!(result, Err(HermesError::TokenRevoked)));
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let (_tmp, store, _) = setup().await;
    let auth = AuthService::new(store, 3600, 3600);

    let result = auth.authenticate_indexer("not-a-real-token").await;
    assert!(matches!(result, Err(HermesError::Unauthorized(_))));
}

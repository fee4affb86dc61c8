//! Integration tests using mock HTTP server
//!
//! Tests the full end-to-end flow: config → credential file → resilient
//! client → mock portal API

use portal_client::auth::{
    AuthCoordinator, Credential, CredentialStore, FileCredentialStore, InvalidationReason,
    StoredToken,
};
use portal_client::config::PortalConfig;
use portal_client::http::HttpClient;
use portal_client::retry::{retry_on_rate_limit, RetryConfig};
use portal_client::Error;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Portal wired the way the CLI wires it, against a mock server
struct Portal {
    client: HttpClient,
    store: Arc<FileCredentialStore>,
    invalidations: Arc<AtomicU32>,
    _dir: TempDir,
}

async fn portal(server: &MockServer, credential: Option<Credential>) -> Portal {
    let dir = tempfile::tempdir().unwrap();
    let config = PortalConfig::from_yaml(&format!(
        r"
base_url: {}/api
retry:
  max_retries: 4
credentials:
  path: {}
  secure: false
",
        server.uri(),
        dir.path().join("credentials.json").display()
    ))
    .unwrap();
    config.validate().unwrap();

    let store = Arc::new(FileCredentialStore::new(&config.credentials.path));
    if let Some(credential) = credential {
        store.set(&credential).await.unwrap();
    }

    let invalidations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invalidations);
    let auth = AuthCoordinator::new(config.auth_endpoints(), store.clone())
        .with_refresh_ttl(config.refresh_ttl())
        .with_listener(Arc::new(move |_: InvalidationReason| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let client = HttpClient::with_auth(config.http_config(), Arc::new(auth)).unwrap();
    Portal {
        client,
        store,
        invalidations,
        _dir: dir,
    }
}

fn logged_in(refresh: Option<&str>) -> Credential {
    Credential {
        access_token: Some(StoredToken::new("access-1", None)),
        refresh_token: refresh.map(|v| StoredToken::new(v, None)),
    }
}

fn stored_access(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let credential: Credential = serde_json::from_str(&contents).ok()?;
    credential.access_token.map(|t| t.value)
}

// ============================================================================
// Rate-limit retries
// ============================================================================

#[tokio::test]
async fn test_retry_until_success() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result = retry_on_rate_limit(RetryConfig::default(), move || async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < 3 {
            Err(Error::RateLimited {
                retry_after: Some(Duration::ZERO),
                body: String::new(),
            })
        } else {
            Ok("products")
        }
    })
    .await;

    assert_eq!(result.unwrap(), "products");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_client_recovers_from_429_burst() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": []})))
        .expect(1)
        .mount(&server)
        .await;

    let portal = portal(&server, Some(logged_in(Some("refresh-1")))).await;

    let body: serde_json::Value = portal.client.get_json("/orders").await.unwrap();
    assert_eq!(body, json!({"orders": []}));
}

// ============================================================================
// Token renewal
// ============================================================================

#[tokio::test]
async fn test_simultaneous_401s_share_one_renewal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": ["lamp"]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/customers"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": ["ada"]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "status": true,
                    "message": "Token refreshed",
                    "data": { "token": "access-2", "refresh_token": "refresh-2" }
                }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let portal = portal(&server, Some(logged_in(Some("refresh-1")))).await;

    let (products, customers) = tokio::join!(
        portal.client.get_json::<serde_json::Value>("/products"),
        portal.client.get_json::<serde_json::Value>("/customers"),
    );

    assert_eq!(products.unwrap(), json!({"products": ["lamp"]}));
    assert_eq!(customers.unwrap(), json!({"customers": ["ada"]}));
    assert_eq!(portal.invalidations.load(Ordering::SeqCst), 0);

    let stored = portal.store.get().await.unwrap();
    assert_eq!(stored.refresh_token.unwrap().value, "refresh-2");
    assert_eq!(
        stored_access(portal.store.path()).as_deref(),
        Some("access-2")
    );
}

#[tokio::test]
async fn test_many_401s_share_one_renewal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(8)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": true, "data": { "token": "access-2" } }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let portal = portal(&server, Some(logged_in(Some("refresh-1")))).await;

    let paths: Vec<String> = (0..8).map(|i| format!("/items/{i}")).collect();
    let results =
        futures::future::join_all(paths.iter().map(|p| portal.client.get(p.as_str()))).await;

    for result in results {
        assert_eq!(result.unwrap().status(), 200);
    }
}

#[tokio::test]
async fn test_missing_refresh_token_ends_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let portal = portal(&server, Some(logged_in(None))).await;

    let err = portal.client.get("/products").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(portal.invalidations.load(Ordering::SeqCst), 1);
    assert!(!portal.store.path().exists());
}

#[tokio::test]
async fn test_login_then_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Login successful",
            "data": { "token": "access-9", "refresh_token": "refresh-9" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer access-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "admin@example.com"})))
        .expect(1)
        .mount(&server)
        .await;

    let portal = portal(&server, None).await;
    let auth = portal.client.auth().unwrap();

    let status = auth.login("admin@example.com", "hunter2").await.unwrap();
    assert!(status.authenticated);
    assert!(status.can_refresh);

    let me: serde_json::Value = portal.client.get_json("/me").await.unwrap();
    assert_eq!(me["email"], "admin@example.com");
    assert_eq!(stored_access(portal.store.path()).as_deref(), Some("access-9"));

    auth.logout().await.unwrap();
    assert!(!portal.store.path().exists());
    assert_eq!(portal.invalidations.load(Ordering::SeqCst), 0);
}

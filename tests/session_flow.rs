//! End-to-end session flows against an in-process backend: login, expiry
//! detected by the API client, and rehydration from disk.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use koerebog::config::ClientConfig;
use koerebog::net::api::{ApiClient, ApiError};
use koerebog::net::events::AuthEvents;
use koerebog::net::types::Credentials;
use koerebog::router::{DenyReason, RouteTable};
use koerebog::state::session::{Rehydration, SessionError, SessionStore};
use koerebog::storage::{FileStorage, PersistedSession, SessionStorage};

// =============================================================================
// Backend
// =============================================================================

async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match (body["username"].as_str(), body["password"].as_str()) {
        (Some("alice"), Some("secret")) => {
            (StatusCode::OK, Json(json!({ "access_token": "tok-alice", "username": "alice", "is_admin": false })))
        }
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "bad credentials" }))),
    }
}

/// Only `tok-fresh` is still valid; everything else has expired.
async fn trips(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer tok-fresh") => (StatusCode::OK, Json(json!([]))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" }))),
    }
}

async fn spawn_backend() -> String {
    let app = Router::new().route("/api/login", post(login)).route("/api/trips", get(trips));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

struct Harness {
    api: ApiClient,
    store: SessionStore,
    storage: Arc<FileStorage>,
    events: AuthEvents,
    _dir: tempfile::TempDir,
}

fn harness(base: &str, dir: tempfile::TempDir) -> Harness {
    let mut config = ClientConfig::new(base).unwrap();
    config.session_file = dir.path().join("session.json");
    let storage = Arc::new(FileStorage::new(&config.session_file));
    let events = AuthEvents::new();
    let api = ApiClient::new(&config, storage.clone(), events.clone()).unwrap();
    let store = SessionStore::new(storage.clone(), Arc::new(api.clone()));
    Harness { api, store, storage, events, _dir: dir }
}

fn seed(storage: &dyn SessionStorage, token: &str) {
    PersistedSession { token: token.to_owned(), username: "alice".to_owned(), is_admin: false }.save(storage).unwrap();
}

// =============================================================================
// Flows
// =============================================================================

#[tokio::test]
async fn rejected_login_leaves_session_anonymous() {
    let base = spawn_backend().await;
    let h = harness(&base, tempfile::tempdir().unwrap());
    let mut rx = h.events.subscribe();

    let err = h.store.login(Credentials::new("alice", "wrong")).await.unwrap_err();
    assert!(matches!(err, SessionError::Api(ApiError::Unauthorized { .. })));
    assert!(!h.store.is_authenticated());
    assert_eq!(h.store.last_error().as_deref(), Some("bad credentials"));
    assert_eq!(PersistedSession::load(h.storage.as_ref()).unwrap(), None);
    // A failed login is not a session expiry.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn expired_token_clears_session_and_guard_sends_to_login() {
    let base = spawn_backend().await;
    let h = harness(&base, tempfile::tempdir().unwrap());
    seed(h.storage.as_ref(), "tok-stale");
    assert_eq!(h.store.initialize().unwrap(), Rehydration::Restored);

    let routes = RouteTable::default_table();
    assert!(!routes.navigate("/trips", &h.store.snapshot()).unwrap().was_redirected());

    let listener = h.store.listen(h.events.subscribe());
    let mut probe = h.events.subscribe();

    let err = h.api.list_trips().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(probe.try_recv().is_ok());
    assert!(probe.try_recv().is_err(), "exactly one event per 401");

    // The store owns a client, and so a publisher, so the listener never sees
    // the channel close. Poll for the clear instead.
    for _ in 0..100 {
        if !h.store.is_authenticated() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    listener.abort();

    assert!(!h.store.is_authenticated());
    assert_eq!(PersistedSession::load(h.storage.as_ref()).unwrap(), None);
    let nav = routes.navigate("/trips", &h.store.snapshot()).unwrap();
    assert_eq!(nav.path, "/login");
    assert_eq!(nav.denied, Some(DenyReason::Unauthenticated));
}

#[tokio::test]
async fn session_survives_restart_through_file_storage() {
    let base = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let first = harness(&base, dir);
    first.store.login(Credentials::new("alice", "secret")).await.unwrap();
    assert!(path.exists());
    let Harness { _dir: dir, .. } = first;

    let second = harness(&base, dir);
    assert_eq!(second.store.initialize().unwrap(), Rehydration::Restored);
    assert_eq!(second.store.username().as_deref(), Some("alice"));
    assert!(!second.store.is_admin());

    second.store.logout().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn valid_token_is_sent_as_bearer() {
    let base = spawn_backend().await;
    let h = harness(&base, tempfile::tempdir().unwrap());
    seed(h.storage.as_ref(), "tok-fresh");
    h.store.initialize().unwrap();

    assert!(h.api.list_trips().await.unwrap().is_empty());
    assert!(h.store.is_authenticated());
}

//! In-process mock of the køerebog backend for client tests.
//!
//! Accounts: `alice`/`secret` (regular, token `tok-alice`) and
//! `admin`/`secret` (admin, token `tok-admin`). Any other token on an
//! authenticated route gets 401 `{"message":"token expired"}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};

use super::api::ApiClient;
use super::events::AuthEvents;
use crate::config::ClientConfig;
use crate::storage::{MemoryStorage, PersistedSession, SessionStorage};

type Reply = (StatusCode, Json<Value>);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

fn expired() -> Reply {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" })))
}

fn require_user(headers: &HeaderMap) -> Result<&str, Reply> {
    match bearer(headers) {
        Some(token @ ("tok-alice" | "tok-admin")) => Ok(token),
        _ => Err(expired()),
    }
}

async fn login(Json(body): Json<Value>) -> Reply {
    let username = body.get("username").and_then(Value::as_str).unwrap_or_default();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();
    match (username, password) {
        ("alice", "secret") => {
            (StatusCode::OK, Json(json!({ "access_token": "tok-alice", "username": "alice", "is_admin": false })))
        }
        ("admin", "secret") => {
            (StatusCode::OK, Json(json!({ "access_token": "tok-admin", "username": "admin", "is_admin": true })))
        }
        ("tokenless", _) => (StatusCode::OK, Json(json!({ "username": "tokenless" }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "bad credentials" }))),
    }
}

async fn list_trips(headers: HeaderMap) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    (StatusCode::OK, Json(json!([{ "id": 1, "date": "2024-05-01", "distance_km": 12.5, "purpose": "client visit" }])))
}

async fn create_trip(headers: HeaderMap, Json(mut body): Json<Value>) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    body["id"] = json!(7);
    (StatusCode::CREATED, Json(body))
}

async fn list_locations(headers: HeaderMap) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    (StatusCode::OK, Json(json!([{ "id": 1, "name": "Kontor", "address": "Vestergade 1" }])))
}

async fn create_location(headers: HeaderMap, Json(mut body): Json<Value>) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    body["id"] = json!(2);
    (StatusCode::CREATED, Json(body))
}

async fn update_location(headers: HeaderMap, Path(id): Path<i64>, Json(mut body): Json<Value>) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    body["id"] = json!(id);
    if body.get("name").is_none() {
        body["name"] = json!("Kontor");
    }
    (StatusCode::OK, Json(body))
}

async fn delete_location(headers: HeaderMap, Path(id): Path<i64>) -> Reply {
    if let Err(reply) = require_user(&headers) {
        return reply;
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "location not found" })));
    }
    (StatusCode::OK, Json(json!({ "message": "deleted" })))
}

async fn lookup_address(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Reply {
    if headers.contains_key("authorization") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "message": "lookup is public" })));
    }
    let address = params.get("address").cloned().unwrap_or_default();
    (StatusCode::OK, Json(json!({ "address": address, "latitude": 55.68, "longitude": 12.57 })))
}

async fn list_users(headers: HeaderMap) -> Reply {
    match require_user(&headers) {
        Ok("tok-admin") => (
            StatusCode::OK,
            Json(json!([
                { "id": 1, "username": "admin", "is_admin": true },
                { "id": 2, "username": "alice", "is_admin": false }
            ])),
        ),
        Ok(_) => (StatusCode::FORBIDDEN, Json(json!({ "message": "admin only" }))),
        Err(reply) => reply,
    }
}

async fn create_user(headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    match require_user(&headers) {
        Ok("tok-admin") => (
            StatusCode::CREATED,
            Json(json!({ "id": 3, "username": body["username"], "is_admin": body["is_admin"] })),
        ),
        Ok(_) => (StatusCode::FORBIDDEN, Json(json!({ "message": "admin only" }))),
        Err(reply) => reply,
    }
}

async fn update_user(headers: HeaderMap, Path(id): Path<i64>, Json(body): Json<Value>) -> Reply {
    match require_user(&headers) {
        Ok("tok-admin") => {
            let is_admin = body.get("is_admin").and_then(Value::as_bool).unwrap_or(false);
            let username = body.get("username").and_then(Value::as_str).unwrap_or("alice");
            (StatusCode::OK, Json(json!({ "id": id, "username": username, "is_admin": is_admin })))
        }
        Ok(_) => (StatusCode::FORBIDDEN, Json(json!({ "message": "admin only" }))),
        Err(reply) => reply,
    }
}

async fn delete_user(headers: HeaderMap) -> Result<StatusCode, Reply> {
    match require_user(&headers)? {
        "tok-admin" => Ok(StatusCode::NO_CONTENT),
        _ => Err((StatusCode::FORBIDDEN, Json(json!({ "message": "admin only" })))),
    }
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

/// Mock backend routes, mounted under `/api` like the real service.
pub fn backend_router() -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/trips", get(list_trips).post(create_trip))
        .route("/api/locations", get(list_locations).post(create_location))
        .route("/api/locations/{id}", put(update_location).delete(delete_location))
        .route("/api/lookup-address", get(lookup_address))
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/{id}", put(update_user).delete(delete_user))
        .route("/api/broken", get(broken))
}

/// Serve [`backend_router`] on an ephemeral port and return its API base URL.
pub async fn spawn_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, backend_router()).await.unwrap();
    });
    format!("http://{addr}/api")
}

/// A client for `base_url` over fresh memory storage.
pub fn test_client(base_url: &str) -> (ApiClient, Arc<MemoryStorage>, AuthEvents) {
    let storage = Arc::new(MemoryStorage::new());
    let events = AuthEvents::new();
    let config = ClientConfig::new(base_url).unwrap();
    let client = ApiClient::new(&config, storage.clone() as Arc<dyn SessionStorage>, events.clone()).unwrap();
    (client, storage, events)
}

/// Persist a session for `token` directly into storage.
pub fn seed_session(storage: &dyn SessionStorage, token: &str, username: &str, is_admin: bool) {
    PersistedSession { token: token.to_owned(), username: username.to_owned(), is_admin }.save(storage).unwrap();
}

//! HTTP routes and router assembly.
//!
//! Handlers never receive the caller's identity as a parameter; they read it
//! from the ambient context that [`SnapshotLayer`] attached.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use syscontext_core::{
    current_snapshot, current_user, has_roles, lookup_extra, spawn_with_context,
    verify_has_any_role,
};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::middleware::{build_http_layers, RequireRolesLayer, SnapshotLayer};

/// Shared application state passed to handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Assembles the router with all routes and middleware.
///
/// 401 responses carry a `WWW-Authenticate` challenge for `config.realm`.
///
/// Routes:
/// - `GET /health` -- liveness JSON, no authentication
/// - `GET /whoami` -- current user or `authenticated: false`
/// - `GET /roles?check=A,B` -- membership of each listed role
/// - `GET /extras/{key}` -- string extra from the snapshot, 404 when absent
/// - `GET /admin` -- gated on all of `admin_roles`
/// - `GET /reports` -- verifies any of `report_roles` inside the handler
pub fn build_router(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Router {
    let layers = build_http_layers(&config);
    let admin_gate = RequireRolesLayer::all(config.admin_roles.iter().cloned());
    let snapshots = SnapshotLayer::new(authenticator).with_realm(&config.realm);
    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/whoami", get(whoami_handler))
        .route("/roles", get(roles_handler))
        .route("/extras/{key}", get(extra_handler))
        .route("/admin", get(admin_handler).route_layer(admin_gate))
        .route("/reports", get(reports_handler))
        .layer(snapshots)
        .layer(layers)
        .with_state(state)
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Never fails, anonymous callers get `authenticated: false`.
pub async fn whoami_handler() -> Json<Value> {
    match current_snapshot() {
        Some(snapshot) => Json(json!({
            "authenticated": true,
            "user": snapshot.user(),
            "roles": snapshot.roles(),
            "extras": snapshot.extras().keys(),
        })),
        None => Json(json!({ "authenticated": false })),
    }
}

#[derive(Debug, Deserialize)]
pub struct RolesQuery {
    /// Comma-separated role names.
    #[serde(default)]
    pub check: String,
}

pub async fn roles_handler(Query(query): Query<RolesQuery>) -> Json<BTreeMap<String, bool>> {
    let roles = query
        .check
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty());
    Json(has_roles(roles))
}

pub async fn extra_handler(Path(key): Path<String>) -> Result<Json<Value>, ApiError> {
    match lookup_extra::<String>(&key) {
        Some(value) => Ok(Json(json!({ "key": key, "value": value }))),
        None => Err(ApiError::NotFound(key)),
    }
}

/// Reached only through the `admin_roles` gate.
pub async fn admin_handler() -> Json<Value> {
    Json(json!({ "admin": current_user() }))
}

/// Gates inside the handler, then hands work to a spawned task that still
/// sees the caller.
pub async fn reports_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    verify_has_any_role(&state.config.report_roles)?;

    let owner = spawn_with_context(async { current_user().map(|user| user.account) })
        .await
        .map_err(anyhow::Error::from)?;

    Ok(Json(json!({ "report": "daily", "owner": owner })))
}

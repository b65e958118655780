//! Routes for the signed-in user and their connections.
//!
//! Sign-in itself has no route: the gateway middleware answers requests to
//! `{processing_url}/{provider_id}` before routing happens.

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{CurrentSession, OptionalAuth, RequireAuth};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use serde_json::{Value, json};
use social_gate_connect::{Connection, ConnectionKey, ProviderId};
use social_gate_core::UserId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Describes the current principal and their connections, if signed in.
pub async fn home(
    State(state): State<Arc<AppState>>,
    OptionalAuth(authentication): OptionalAuth,
) -> Result<Json<Value>, ApiError> {
    let Some(authentication) = authentication else {
        return Ok(Json(json!({ "authenticated": false })));
    };
    let principal = authentication.principal();
    let connections: Vec<String> = load_connections(&state, principal.user_id())
        .await?
        .iter()
        .map(|connection| connection.key().to_string())
        .collect();

    Ok(Json(json!({
        "authenticated": true,
        "user_id": principal.user_id().to_string(),
        "username": principal.username(),
        "authorities": principal.authorities(),
        "provider_id": authentication.provider_id().as_str(),
        "authenticated_at": authentication.authenticated_at(),
        "connections": connections,
    })))
}

async fn load_connections(state: &AppState, user_id: UserId) -> Result<Vec<Connection>, ApiError> {
    state
        .users_connection_repository
        .connection_repository(user_id)
        .find_all_connections()
        .await
        .map_err(|report| ApiError::Storage {
            details: report.to_string(),
        })
}

/// Lists the providers a user can sign in with.
pub async fn signin(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let processing_url = state.gateway.config().processing_url();
    let providers: Vec<Value> = state
        .gateway
        .registry()
        .iter()
        .map(|adapter| {
            json!({
                "id": adapter.provider_id().as_str(),
                "mode": adapter.mode().to_string(),
                "url": format!("{processing_url}/{}", adapter.provider_id()),
            })
        })
        .collect();

    Json(json!({
        "error": params.contains_key("error"),
        "providers": providers,
    }))
}

/// Ends the session.
pub async fn signout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<CurrentSession>,
) -> impl IntoResponse {
    if let Err(report) = state.sessions.delete(&session.id).await {
        warn!(error = %report, "failed to delete session on sign-out");
    }
    if let Some(authentication) = session.context.authentication() {
        info!(user_id = %authentication.principal().user_id(), "signed out");
    }
    Redirect::to("/")
}

fn connection_json(connection: &Connection) -> Value {
    let data = connection.data();
    json!({
        "provider_user_id": data.provider_user_id(),
        "display_name": data.display_name(),
        "profile_url": data.profile_url(),
        "image_url": data.image_url(),
        "rank": connection.rank(),
        "expired": connection.has_expired(),
    })
}

/// Lists the signed-in user's connections, grouped by provider.
///
/// Every registered provider appears, with an empty list when unconnected.
/// An `error` query parameter (set after a refused link) is echoed back.
pub async fn connections(
    State(state): State<Arc<AppState>>,
    RequireAuth(authentication): RequireAuth,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let user_id = authentication.principal().user_id();
    let stored = load_connections(&state, user_id).await?;

    let mut grouped: BTreeMap<String, Vec<Value>> = state
        .gateway
        .registry()
        .ids()
        .into_iter()
        .map(|id| (id.to_string(), Vec::new()))
        .collect();
    for connection in &stored {
        grouped
            .entry(connection.provider_id().to_string())
            .or_default()
            .push(connection_json(connection));
    }

    Ok(Json(json!({
        "user_id": user_id.to_string(),
        "error": params.get("error"),
        "connections": grouped,
    })))
}

/// Removes one of the signed-in user's connections.
pub async fn remove_connection(
    State(state): State<Arc<AppState>>,
    RequireAuth(authentication): RequireAuth,
    Path((provider_id, provider_user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let user_id = authentication.principal().user_id();
    let key = ConnectionKey::new(ProviderId::new(provider_id), provider_user_id);
    let removed = state
        .users_connection_repository
        .connection_repository(user_id)
        .remove_connection(&key)
        .await
        .map_err(|report| ApiError::Storage {
            details: report.to_string(),
        })?;

    if !removed {
        return Err(ApiError::NotFound {
            what: format!("connection {key}"),
        });
    }
    info!(%user_id, connection = %key, "connection removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound {
        what: "page".to_string(),
    }
}

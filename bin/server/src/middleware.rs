//! Gateway middleware and authentication extractors for Axum.
//!
//! `social_auth` runs the gateway on every request. It loads the session's
//! security context, lets the gateway decide, persists the result and either
//! redirects or passes the request on with a `CurrentSession` extension.

use crate::app::AppState;
use crate::error::ApiError;
use crate::session::{SESSION_COOKIE, generate_session_id};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use social_gate_auth::{
    AuthRequest, Authentication, GatewayOutcome, HandlerResponse, SecurityContext,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::{debug, warn};

/// The session of the current request, as left by the gateway.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub context: SecurityContext,
}

fn session_cookie(state: &AppState, session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(state.session_config.duration_minutes))
        .build()
}

/// Converts the HTTP request into the gateway's view of it.
fn auth_request(request: &Request, session_id: &str) -> AuthRequest {
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    let remote_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    AuthRequest::new(request.uri().path())
        .with_query(query)
        .with_remote_address(remote_address)
        .with_session_id(Some(session_id.to_string()))
}

async fn load_context(state: &AppState, session_id: &str) -> SecurityContext {
    match state.sessions.load(session_id).await {
        Ok(context) => context.unwrap_or_default(),
        Err(report) => {
            warn!(error = %report, "failed to load session, continuing anonymously");
            SecurityContext::new()
        }
    }
}

/// Runs the social authentication gateway in front of every route.
pub async fn social_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let mut session_id = existing.clone().unwrap_or_else(generate_session_id);
    let mut context = match &existing {
        Some(id) => load_context(&state, id).await,
        None => SecurityContext::new(),
    };
    let before = context.clone();

    let outcome = state
        .gateway
        .handle(&auth_request(&request, &session_id), &mut context)
        .await;

    // A new principal never reuses the session id it signed in with.
    if matches!(outcome, GatewayOutcome::Authenticated { .. }) {
        if let Some(old) = &existing {
            if let Err(report) = state.sessions.delete(old).await {
                warn!(error = %report, "failed to delete pre-authentication session");
            }
        }
        session_id = generate_session_id();
    }

    if context.is_authenticated() || context != before {
        let expires_at = Utc::now() + chrono::Duration::minutes(state.session_config.duration_minutes);
        if let Err(report) = state.sessions.save(&session_id, &context, expires_at).await {
            warn!(error = %report, "failed to save session");
        }
    }
    let jar = jar.add(session_cookie(&state, session_id.clone()));

    let redirect = match outcome {
        GatewayOutcome::Continue
        | GatewayOutcome::Authenticated {
            response: HandlerResponse::Continue,
            ..
        }
        | GatewayOutcome::Failed {
            response: HandlerResponse::Continue,
            ..
        } => None,
        GatewayOutcome::Authenticated {
            response: HandlerResponse::Redirect(url),
            ..
        }
        | GatewayOutcome::Failed {
            response: HandlerResponse::Redirect(url),
            ..
        }
        | GatewayOutcome::Redirect(url)
        | GatewayOutcome::LinkRefused {
            redirect_url: url, ..
        }
        | GatewayOutcome::LinkFailed {
            redirect_url: url, ..
        } => Some(url),
    };

    if let Some(url) = redirect {
        debug!(%url, "gateway redirect");
        return (jar, Redirect::to(&url)).into_response();
    }

    request.extensions_mut().insert(CurrentSession {
        id: session_id,
        context,
    });
    (jar, next.run(request).await).into_response()
}

/// Extractor for requiring a signed-in user.
pub struct RequireAuth(pub Authentication);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .and_then(|session| session.context.authentication())
            .cloned()
            .map(RequireAuth)
            .ok_or(ApiError::NotAuthenticated)
    }
}

/// Extractor for optionally getting the signed-in user.
pub struct OptionalAuth(pub Option<Authentication>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequireAuth::from_request_parts(parts, state).await {
            Ok(RequireAuth(authentication)) => Ok(OptionalAuth(Some(authentication))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

//! HTTP route handlers, one submodule per resource.
//!
//! Every route except `/health` and `/api/auth/login` requires a bearer
//! session token, resolved into a [`CurrentUser`] by the extractor below.
//! Handlers run storage work through [`DbHandle::call`] and broadcast
//! change events to WebSocket subscribers after a successful write.

mod auth;
mod dashboard;
mod extract;
mod finance;
mod jobs;
mod notifications;
mod sync;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use super::auth::parse_bearer;
use super::db::DbHandle;
use super::models::{Job, Notification, User, UserRole};
use super::ws::WsMessage;
use crate::errors::DispatchError;

pub use extract::{ApiJson, ApiPath, ApiQuery};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<WsMessage>,
    /// Lifetime of sessions issued by `POST /api/auth/login`.
    pub session_ttl_hours: u32,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, session_ttl_hours: u32) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self {
            db,
            ws_tx,
            session_ttl_hours,
        }
    }

    /// Publish a change event; having no subscribers is not an error.
    pub fn broadcast(&self, msg: WsMessage) {
        let _ = self.ws_tx.send(msg);
    }

    pub fn broadcast_notifications(&self, notifications: &[Notification]) {
        for n in notifications {
            self.broadcast(WsMessage::NotificationCreated {
                user_id: n.user_id,
                notification_id: n.id,
            });
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<&DispatchError> for ApiError {
    fn from(err: &DispatchError) -> Self {
        let msg = err.to_string();
        match err {
            e if e.is_not_found() => ApiError::NotFound(msg),
            DispatchError::InvalidTransition { .. } | DispatchError::Conflict(_) => {
                ApiError::Conflict(msg)
            }
            DispatchError::NotAWorker { .. } | DispatchError::Validation(_) => {
                ApiError::BadRequest(msg)
            }
            DispatchError::Forbidden { .. } => ApiError::Forbidden(msg),
            DispatchError::InvalidCredentials | DispatchError::Unauthorized => {
                ApiError::Unauthorized(msg)
            }
            _ => {
                tracing::error!(error = %err, "request failed");
                ApiError::Internal("internal server error".to_string())
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::from(&err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match DispatchError::find(&err) {
            Some(e) => ApiError::from(e),
            None => {
                tracing::error!(error = ?err, "request failed");
                ApiError::Internal("internal server error".to_string())
            }
        }
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// The user behind the request's bearer token.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?
            .to_string();
        let user = resolve_token(state, token.clone()).await?;
        Ok(CurrentUser { user, token })
    }
}

/// Resolve a session token to its user, rejecting unknown or expired ones.
pub async fn resolve_token(state: &SharedState, token: String) -> Result<User, ApiError> {
    state
        .db
        .call(move |db| db.resolve_session(&token))
        .await?
        .ok_or_else(|| ApiError::from(DispatchError::Unauthorized))
}

pub(crate) fn require_admin(user: &User, action: &str) -> Result<(), ApiError> {
    if user.role == UserRole::Admin {
        Ok(())
    } else {
        Err(DispatchError::forbidden(user.role, action).into())
    }
}

/// Whether `user` may see `job`: admins see everything, workers their
/// assigned jobs, clients the jobs they own.
pub(crate) fn can_view(user: &User, job: &Job) -> bool {
    in_scope(user, job.worker_id, job.client_id)
}

/// [`can_view`] for a job known only by its worker and client ids.
pub(crate) fn in_scope(user: &User, worker_id: Option<i64>, client_id: Option<i64>) -> bool {
    match user.role {
        UserRole::Admin => true,
        UserRole::Worker => worker_id == Some(user.id),
        UserRole::Client => client_id == Some(user.id),
    }
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn optional_json<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::deactivate_user),
        )
        .route("/api/workers", get(users::list_workers))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/api/jobs/{id}",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/api/jobs/{id}/assign", post(jobs::assign_job))
        .route("/api/jobs/{id}/accept", post(jobs::accept_job))
        .route("/api/jobs/{id}/reject", post(jobs::reject_job))
        .route("/api/jobs/{id}/start", post(jobs::start_job))
        .route("/api/jobs/{id}/complete", post(jobs::complete_job))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route(
            "/api/jobs/{id}/updates",
            get(jobs::list_updates).post(jobs::add_note),
        )
        .route("/api/notifications", get(notifications::list_notifications))
        .route(
            "/api/notifications/{id}/read",
            patch(notifications::mark_read),
        )
        .route(
            "/api/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route("/api/financial/weekly", get(finance::weekly_stats))
        .route(
            "/api/financial/weekly/recompute",
            post(finance::recompute_weekly),
        )
        .route("/api/financial/history", get(finance::stats_history))
        .route(
            "/api/partner-costs",
            get(finance::list_partner_costs).post(finance::upsert_partner_cost),
        )
        .route(
            "/api/partner-costs/{id}",
            axum::routing::delete(finance::delete_partner_cost),
        )
        .route("/api/dashboard", get(dashboard::dashboard))
        .route("/api/sync/status", get(sync::sync_status))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

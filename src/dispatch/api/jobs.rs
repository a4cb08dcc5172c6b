use std::str::FromStr;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{
    ApiError, ApiJson, ApiPath, ApiQuery, CurrentUser, SharedState, can_view, optional_json,
    require_admin,
};
use crate::dispatch::db::{JobFilter, JobPatch, NewJob};
use crate::dispatch::lifecycle::{Actor, CompletionPayload, JobAction};
use crate::dispatch::models::{Job, JobList, JobStatus, User, UserRole};
use crate::dispatch::ws::WsMessage;
use crate::errors::DispatchError;

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub worker_id: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub worker_id: i64,
}

#[derive(Deserialize, Default)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

/// Load a job the caller is allowed to see. Jobs outside the caller's
/// scope are reported as missing.
async fn visible_job(state: &SharedState, user: &User, id: i64) -> Result<Job, ApiError> {
    let job = state.db.call(move |db| db.get_job(id)).await?;
    match job {
        Some(job) if can_view(user, &job) => Ok(job),
        _ => Err(DispatchError::JobNotFound { id }.into()),
    }
}

pub async fn list_jobs(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let user = &current.user;
    let filter = JobFilter {
        status,
        worker_id: match user.role {
            UserRole::Worker => Some(user.id),
            _ => query.worker_id,
        },
        client_id: (user.role == UserRole::Client).then_some(user.id),
        limit: query.limit,
        ..JobFilter::default()
    };
    let list = state
        .db
        .call(move |db| {
            let version = db.current_version()?;
            let jobs = db.list_jobs(&filter)?;
            Ok(JobList { jobs, version })
        })
        .await?;
    Ok(Json(list))
}

pub async fn create_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiJson(req): ApiJson<NewJob>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = Actor::from(&current.user);
    let (job, notifications) = state.db.call(move |db| db.create_job(&req, actor)).await?;
    tracing::info!(job_id = job.id, created_by = actor.user_id, "job created");
    state.broadcast(WsMessage::JobCreated { job: job.clone() });
    state.broadcast_notifications(&notifications);
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    visible_job(&state, &current.user, id).await?;
    let detail = state.db.call(move |db| db.get_job_detail(id)).await?;
    Ok(Json(detail))
}

pub async fn update_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<JobPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "edit jobs")?;
    let changed = !patch.is_empty();
    let job = state.db.call(move |db| db.update_job(id, &patch)).await?;
    if changed {
        state.broadcast(WsMessage::JobUpdated { job: job.clone() });
    }
    Ok(Json(job))
}

pub async fn delete_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "delete jobs")?;
    let deleted = state
        .db
        .call(move |db| {
            let job = db.get_job(id)?;
            let deleted = db.delete_job(id)?;
            Ok(job.filter(|_| deleted))
        })
        .await?
        .ok_or(DispatchError::JobNotFound { id })?;
    tracing::info!(job_id = id, "job deleted");
    state.broadcast(WsMessage::JobDeleted {
        job_id: id,
        worker_id: deleted.worker_id,
        client_id: deleted.client_id,
    });
    Ok(StatusCode::NO_CONTENT)
}

/// Apply a lifecycle action and broadcast the resulting change.
async fn run_transition(
    state: &SharedState,
    user: &User,
    id: i64,
    action: JobAction,
) -> Result<Json<Job>, ApiError> {
    let actor = Actor::from(user);
    let name = action.name();
    let outcome = state
        .db
        .call(move |db| db.apply_transition(id, &action, actor))
        .await?;
    if outcome.changed {
        tracing::info!(
            job_id = id,
            action = name,
            from = %outcome.from,
            to = %outcome.to,
            user_id = actor.user_id,
            "job transitioned"
        );
        state.broadcast(WsMessage::JobStatusChanged {
            job_id: id,
            from: outcome.from,
            to: outcome.to,
            worker_id: outcome.job.worker_id,
            client_id: outcome.job.client_id,
        });
        state.broadcast_notifications(&outcome.notifications);
    } else {
        tracing::debug!(job_id = id, action = name, "transition was a no-op");
    }
    Ok(Json(outcome.job))
}

pub async fn assign_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action = JobAction::Assign {
        worker_id: req.worker_id,
    };
    run_transition(&state, &current.user, id, action).await
}

pub async fn accept_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    run_transition(&state, &current.user, id, JobAction::Accept).await
}

pub async fn reject_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: ReasonRequest = optional_json(&body)?;
    let action = JobAction::Reject { reason: req.reason };
    run_transition(&state, &current.user, id, action).await
}

pub async fn start_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    run_transition(&state, &current.user, id, JobAction::Start).await
}

pub async fn complete_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<CompletionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    run_transition(&state, &current.user, id, JobAction::Complete(payload)).await
}

pub async fn cancel_job(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: ReasonRequest = optional_json(&body)?;
    let action = JobAction::Cancel { reason: req.reason };
    run_transition(&state, &current.user, id, action).await
}

pub async fn list_updates(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    visible_job(&state, &current.user, id).await?;
    let updates = state.db.call(move |db| db.list_job_updates(id)).await?;
    Ok(Json(updates))
}

pub async fn add_note(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<NoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = visible_job(&state, &current.user, id).await?;
    let user_id = current.user.id;
    let update = state
        .db
        .call(move |db| db.add_job_note(id, user_id, &req.note))
        .await?;
    state.broadcast(WsMessage::JobUpdated { job });
    Ok((StatusCode::CREATED, Json(update)))
}

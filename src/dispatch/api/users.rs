use std::str::FromStr;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiPath, ApiQuery, CurrentUser, SharedState, require_admin};
use crate::dispatch::db::{NewUser, UserPatch};
use crate::dispatch::models::UserRole;
use crate::dispatch::ws::WsMessage;
use crate::errors::DispatchError;

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_users(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "list users")?;
    let role = query
        .role
        .as_deref()
        .map(UserRole::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let include_inactive = query.include_inactive;
    let users = state
        .db
        .call(move |db| db.list_users(role, include_inactive))
        .await?;
    Ok(Json(users))
}

pub async fn create_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiJson(req): ApiJson<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "create users")?;
    let user = state.db.call(move |db| db.create_user(&req)).await?;
    tracing::info!(user_id = user.id, role = %user.role, "user created");
    state.broadcast(WsMessage::UserChanged { user_id: user.id });
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if current.user.id != id {
        require_admin(&current.user, "view other users")?;
    }
    let user = state.db.call(move |db| db.get_user(id)).await?;
    match user {
        Some(user) => Ok(Json(user)),
        None => Err(DispatchError::UserNotFound { id }.into()),
    }
}

pub async fn update_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<UserPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "update users")?;
    if current.user.id == id && patch.active == Some(false) {
        return Err(ApiError::BadRequest(
            "admins cannot deactivate themselves".to_string(),
        ));
    }
    let user = state.db.call(move |db| db.update_user(id, &patch)).await?;
    state.broadcast(WsMessage::UserChanged { user_id: user.id });
    Ok(Json(user))
}

/// Soft delete: users are deactivated, never removed, so job history
/// keeps its references.
pub async fn deactivate_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "deactivate users")?;
    if current.user.id == id {
        return Err(ApiError::BadRequest(
            "admins cannot deactivate themselves".to_string(),
        ));
    }
    let user = state.db.call(move |db| db.deactivate_user(id)).await?;
    tracing::info!(user_id = id, "user deactivated");
    state.broadcast(WsMessage::UserChanged { user_id: id });
    Ok(Json(user))
}

pub async fn list_workers(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "list workers")?;
    let workers = state.db.call(|db| db.list_worker_summaries()).await?;
    Ok(Json(workers))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{send, test_app};

    #[tokio::test]
    async fn test_admin_creates_and_lists_users() {
        let app = test_app();
        let (status, user) = send(
            &app.router,
            "POST",
            "/api/users",
            Some(&app.admin_token),
            Some(json!({
                "name": "Nia",
                "email": "nia@example.com",
                "role": "worker",
                "commission_rate": 25.0,
                "password": "longenough"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["commission_rate"], 25.0);

        let (status, workers) = send(
            &app.router,
            "GET",
            "/api/users?role=WORKER",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(workers.as_array().unwrap().len(), 3);

        let (status, _) = send(
            &app.router,
            "GET",
            "/api/users?role=boss",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_admins_cannot_manage_users() {
        let app = test_app();
        let (status, _) =
            send(&app.router, "GET", "/api/users", Some(&app.worker_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Users may read their own record.
        let uri = format!("/api/users/{}", app.client.id);
        let (status, me) = send(&app.router, "GET", &uri, Some(&app.client_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Cleo");
        let uri = format!("/api/users/{}", app.admin.id);
        let (status, _) = send(&app.router, "GET", &uri, Some(&app.client_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_deactivate_user_revokes_access() {
        let app = test_app();
        let uri = format!("/api/users/{}", app.worker.id);
        let (status, user) = send(&app.router, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["active"], false);

        let (status, _) =
            send(&app.router, "GET", "/api/jobs", Some(&app.worker_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/api/users/{}", app.admin.id);
        let (status, _) = send(&app.router, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_user_and_list_workers() {
        let app = test_app();
        let uri = format!("/api/users/{}", app.worker.id);
        let (status, user) = send(
            &app.router,
            "PATCH",
            &uri,
            Some(&app.admin_token),
            Some(json!({"commission_rate": 40.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["commission_rate"], 40.0);

        let (status, workers) =
            send(&app.router, "GET", "/api/workers", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let workers = workers.as_array().unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0]["open_jobs"], 0);
        assert!(workers[0]["email"].is_string());
    }
}

use axum::{
    Json,
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiPath, ApiQuery, CurrentUser, SharedState};
use crate::dispatch::models::Notification;

const DEFAULT_LIMIT: u32 = 50;

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread: u32,
}

pub async fn list_notifications(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<ListNotificationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let list = state
        .db
        .call(move |db| {
            Ok(NotificationList {
                notifications: db.list_notifications(user_id, query.unread_only, limit)?,
                unread: db.unread_notification_count(user_id)?,
            })
        })
        .await?;
    Ok(Json(list))
}

pub async fn mark_read(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let notification = state
        .db
        .call(move |db| db.mark_notification_read(id, user_id))
        .await?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let updated = state
        .db
        .call(move |db| db.mark_all_notifications_read(user_id))
        .await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

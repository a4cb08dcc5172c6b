use axum::{
    Json,
    extract::State,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use super::{ApiError, ApiQuery, CurrentUser, SharedState};
use crate::dispatch::models::{SyncStatus, TIMESTAMP_FORMAT};

#[derive(Deserialize)]
pub struct SyncQuery {
    /// Version the client last saw; omitted on first contact.
    pub since: Option<i64>,
}

/// Cheap change check for polling clients. `changed` is true whenever the
/// server's version differs from `since`.
pub async fn sync_status(
    State(state): State<SharedState>,
    _current: CurrentUser,
    ApiQuery(query): ApiQuery<SyncQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state.db.call(|db| db.current_version()).await?;
    Ok(Json(SyncStatus {
        version,
        changed: query.since != Some(version),
        server_time: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{send, test_app};

    #[tokio::test]
    async fn test_version_advances_on_mutation() {
        let app = test_app();
        let (status, first) =
            send(&app.router, "GET", "/api/sync/status", Some(&app.worker_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["changed"], true);
        let version = first["version"].as_i64().unwrap();

        let uri = format!("/api/sync/status?since={}", version);
        let (_, same) = send(&app.router, "GET", &uri, Some(&app.worker_token), None).await;
        assert_eq!(same["changed"], false);
        assert_eq!(same["version"], version);

        send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&app.admin_token),
            Some(json!({"client_name": "Pat", "address": "1 Main"})),
        )
        .await;
        let (_, after) = send(&app.router, "GET", &uri, Some(&app.worker_token), None).await;
        assert_eq!(after["changed"], true);
        assert!(after["version"].as_i64().unwrap() > version);
    }

    #[tokio::test]
    async fn test_sync_status_requires_auth() {
        let app = test_app();
        let (status, _) = send(&app.router, "GET", "/api/sync/status", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

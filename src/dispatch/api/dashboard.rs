use axum::{Json, extract::State, response::IntoResponse};
use chrono::{Duration, Utc};

use super::{ApiError, CurrentUser, SharedState};
use crate::dispatch::db::JobFilter;
use crate::dispatch::finance::{DATE_FORMAT, week_start, worker_week_earnings};
use crate::dispatch::models::{Dashboard, JobStatus, UserRole};

/// Role-specific landing data: admins get the business overview, workers
/// their queue and earnings, clients their own jobs.
pub async fn dashboard(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = current.user;
    let today = Utc::now().date_naive();
    let dashboard = state
        .db
        .call(move |db| {
            let unread_notifications = db.unread_notification_count(user.id)?;
            let dashboard = match user.role {
                UserRole::Admin => Dashboard::Admin {
                    status_counts: db.status_counts(None, None)?,
                    week: db.compute_weekly_stats(today)?,
                    workers: db.list_worker_summaries()?,
                    unread_notifications,
                },
                UserRole::Worker => {
                    let jobs = db.list_jobs(&JobFilter {
                        worker_id: Some(user.id),
                        ..JobFilter::default()
                    })?;
                    let start = week_start(today);
                    let week_jobs = db.list_jobs(&JobFilter {
                        worker_id: Some(user.id),
                        status: Some(JobStatus::Completed),
                        completed_from: Some(start.format(DATE_FORMAT).to_string()),
                        completed_before: Some(
                            (start + Duration::days(7)).format(DATE_FORMAT).to_string(),
                        ),
                        ..JobFilter::default()
                    })?;
                    Dashboard::Worker {
                        status_counts: db.status_counts(Some(user.id), None)?,
                        week_earnings: worker_week_earnings(today, &user, &week_jobs),
                        active_jobs: jobs
                            .into_iter()
                            .filter(|j| {
                                matches!(
                                    j.status,
                                    JobStatus::Assigned
                                        | JobStatus::Accepted
                                        | JobStatus::InProgress
                                )
                            })
                            .collect(),
                        unread_notifications,
                    }
                }
                UserRole::Client => Dashboard::Client {
                    jobs: db.list_jobs(&JobFilter {
                        client_id: Some(user.id),
                        ..JobFilter::default()
                    })?,
                    unread_notifications,
                },
            };
            Ok(dashboard)
        })
        .await?;
    Ok(Json(dashboard))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{send, test_app};

    #[tokio::test]
    async fn test_dashboard_shape_per_role() {
        let app = test_app();
        send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&app.admin_token),
            Some(json!({
                "client_name": "Cleo",
                "address": "12 Elm St",
                "worker_id": app.worker.id,
                "client_id": app.client.id,
            })),
        )
        .await;

        let (status, admin) =
            send(&app.router, "GET", "/api/dashboard", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(admin["role"], "admin");
        assert_eq!(admin["status_counts"].as_array().unwrap().len(), 6);
        assert_eq!(admin["workers"].as_array().unwrap().len(), 2);
        assert!(admin["week"]["week_start"].is_string());

        let (_, worker) =
            send(&app.router, "GET", "/api/dashboard", Some(&app.worker_token), None).await;
        assert_eq!(worker["role"], "worker");
        assert_eq!(worker["active_jobs"].as_array().unwrap().len(), 1);
        assert_eq!(worker["unread_notifications"], 1);
        assert_eq!(worker["week_earnings"]["jobs_completed"], 0);

        let (_, client) =
            send(&app.router, "GET", "/api/dashboard", Some(&app.client_token), None).await;
        assert_eq!(client["role"], "client");
        assert_eq!(client["jobs"].as_array().unwrap().len(), 1);
    }
}

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{
    ApiError, ApiJson, ApiPath, ApiQuery, CurrentUser, SharedState, optional_json, require_admin,
};
use crate::dispatch::finance::{DATE_FORMAT, week_start};
use crate::dispatch::ws::WsMessage;

const DEFAULT_HISTORY: u32 = 12;

#[derive(Deserialize, Default)]
pub struct WeekQuery {
    /// Any day of the requested week; defaults to today.
    pub week_start: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct PartnerCostRequest {
    pub partner_name: String,
    pub week_start: String,
    pub amount: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

fn parse_week(raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| {
            ApiError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", s))
        }),
        None => Ok(Utc::now().date_naive()),
    }
}

pub async fn weekly_stats(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<WeekQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "view financials")?;
    let week = parse_week(query.week_start.as_deref())?;
    let stats = state.db.call(move |db| db.compute_weekly_stats(week)).await?;
    Ok(Json(stats))
}

pub async fn recompute_weekly(
    State(state): State<SharedState>,
    current: CurrentUser,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "recompute financials")?;
    let req: WeekQuery = optional_json(&body)?;
    let week = parse_week(req.week_start.as_deref())?;
    let stats = state
        .db
        .call(move |db| db.recompute_weekly_stats(week))
        .await?;
    tracing::info!(
        week_start = %stats.week_start,
        jobs = stats.jobs_completed,
        net_profit = stats.net_profit,
        "weekly stats recomputed"
    );
    state.broadcast(WsMessage::StatsRecomputed {
        week_start: stats.week_start.clone(),
    });
    Ok(Json(stats))
}

pub async fn stats_history(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "view financials")?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY);
    let history = state.db.call(move |db| db.stats_history(limit)).await?;
    Ok(Json(history))
}

pub async fn list_partner_costs(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiQuery(query): ApiQuery<WeekQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "view partner costs")?;
    let week = query
        .week_start
        .as_deref()
        .map(|s| parse_week(Some(s)))
        .transpose()?;
    let costs = state.db.call(move |db| db.list_partner_costs(week)).await?;
    Ok(Json(costs))
}

pub async fn upsert_partner_cost(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiJson(req): ApiJson<PartnerCostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "record partner costs")?;
    let week = parse_week(Some(&req.week_start))?;
    let cost = state
        .db
        .call(move |db| {
            db.upsert_partner_cost(&req.partner_name, week, req.amount, req.notes.as_deref())
        })
        .await?;
    state.broadcast(WsMessage::StatsRecomputed {
        week_start: week_start(week).format(DATE_FORMAT).to_string(),
    });
    Ok((StatusCode::CREATED, Json(cost)))
}

pub async fn delete_partner_cost(
    State(state): State<SharedState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&current.user, "delete partner costs")?;
    state.db.call(move |db| db.delete_partner_cost(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::super::test_support::{TestApp, send, test_app};

    /// Create and complete a job worth `total` for the seeded worker on `day`.
    async fn completed_job(app: &TestApp, total: f64, day: &str) {
        let (_, job) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&app.admin_token),
            Some(json!({"client_name": "Pat", "address": "1 Main", "worker_id": app.worker.id})),
        )
        .await;
        let id = &job["id"];
        for action in ["accept", "start"] {
            send(
                &app.router,
                "POST",
                &format!("/api/jobs/{}/{}", id, action),
                Some(&app.worker_token),
                None,
            )
            .await;
        }
        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/jobs/{}/complete", id),
            Some(&app.worker_token),
            Some(json!({
                "total_amount": total,
                "payment_method": "card",
                "completed_on": day,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_weekly_stats_with_partner_costs() {
        let app = test_app();
        completed_job(&app, 300.0, "2024-03-05").await;
        completed_job(&app, 100.0, "2024-03-07").await;

        let (status, cost) = send(
            &app.router,
            "POST",
            "/api/partner-costs",
            Some(&app.admin_token),
            Some(json!({"partner_name": "Yelp", "week_start": "2024-03-06", "amount": 40.0})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(cost["week_start"], "2024-03-04");

        let (status, stats) = send(
            &app.router,
            "GET",
            "/api/financial/weekly?week_start=2024-03-04",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["jobs_completed"], 2);
        assert_eq!(stats["total_revenue"], 400.0);
        assert_eq!(stats["worker_commissions"], 120.0);
        assert_eq!(stats["ads_cost"], 40.0);
        assert_eq!(stats["net_profit"], 240.0);
        assert_eq!(stats["profit_margin"], 60.0);
        assert_eq!(stats["workers"][0]["worker_name"], "Sam");
    }

    #[tokio::test]
    async fn test_recompute_persists_history() {
        let app = test_app();
        completed_job(&app, 100.0, "2024-03-05").await;
        let mut rx = app.state.ws_tx.subscribe();

        let (status, stats) = send(
            &app.router,
            "POST",
            "/api/financial/weekly/recompute",
            Some(&app.admin_token),
            Some(json!({"week_start": "2024-03-05"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["week_start"], "2024-03-04");
        let msg: Value = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "StatsRecomputed");

        let (status, history) = send(
            &app.router,
            "GET",
            "/api/financial/history",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["total_revenue"], 100.0);
    }

    #[tokio::test]
    async fn test_finance_is_admin_only_and_validates_dates() {
        let app = test_app();
        let (status, _) = send(
            &app.router,
            "GET",
            "/api/financial/weekly",
            Some(&app.worker_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app.router,
            "GET",
            "/api/financial/weekly?week_start=03/04/2024",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_partner_cost() {
        let app = test_app();
        let (_, cost) = send(
            &app.router,
            "POST",
            "/api/partner-costs",
            Some(&app.admin_token),
            Some(json!({"partner_name": "Google", "week_start": "2024-03-04", "amount": 10.0})),
        )
        .await;
        let uri = format!("/api/partner-costs/{}", cost["id"]);
        let (status, _) = send(&app.router, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, costs) =
            send(&app.router, "GET", "/api/partner-costs", Some(&app.admin_token), None).await;
        assert!(costs.as_array().unwrap().is_empty());
    }
}

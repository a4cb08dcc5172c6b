use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, CurrentUser, SharedState};
use crate::dispatch::models::User;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub async fn login(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = state.session_ttl_hours;
    let (token, user) = state
        .db
        .call(move |db| {
            let user = db.verify_credentials(&req.email, &req.password)?;
            let token = db.create_session(user.id, ttl)?;
            Ok((token, user))
        })
        .await?;
    tracing::info!(user_id = user.id, role = %user.role, "user logged in");
    Ok(Json(LoginResponse { token, user }))
}

pub async fn logout(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let token = current.token;
    state.db.call(move |db| db.revoke_session(&token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{send, test_app};

    #[tokio::test]
    async fn test_login_me_logout() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "sam@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "worker");
        assert!(body["user"].get("password_hash").is_none());
        let token = body["token"].as_str().unwrap().to_string();

        let (status, me) = send(&app.router, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], app.worker.id);

        let (status, _) = send(&app.router, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "sam@example.com", "password": "nope-nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");
    }
}

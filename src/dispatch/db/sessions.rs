use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, params};

use super::DispatchDb;
use super::users::get_user;
use crate::dispatch::auth::{hash_token, new_session_token};
use crate::dispatch::models::{TIMESTAMP_FORMAT, User};

impl DispatchDb {
    /// Open a session for `user_id` and return the plain bearer token.
    pub fn create_session(&self, user_id: i64, ttl_hours: u32) -> Result<String> {
        let token = new_session_token();
        let expires_at = (Utc::now() + Duration::hours(i64::from(ttl_hours)))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![hash_token(&token), user_id, expires_at],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    /// Resolve a bearer token to its active, unexpired user.
    pub fn resolve_session(&self, token: &str) -> Result<Option<User>> {
        let user_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT s.user_id FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > datetime('now') AND u.active = 1",
                params![hash_token(token)],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to resolve session")?;
        match user_id {
            Some(id) => get_user(&self.conn, id),
            None => Ok(None),
        }
    }

    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM sessions WHERE token_hash = ?1",
                params![hash_token(token)],
            )
            .context("Failed to revoke session")?;
        Ok(count > 0)
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= datetime('now')",
                [],
            )
            .context("Failed to purge sessions")
    }
}

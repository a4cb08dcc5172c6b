use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use super::{DispatchDb, bump_version, parse_column};
use crate::dispatch::auth::{MIN_PASSWORD_LEN, hash_password, verify_password};
use crate::dispatch::models::{User, UserRole, WorkerSummary};
use crate::errors::DispatchError;

const USER_COLUMNS: &str =
    "id, name, email, phone, user_type, commission_rate, active, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub commission_rate: Option<f64>,
    pub active: Option<bool>,
    pub password: Option<String>,
}

fn validate_commission(rate: f64) -> Result<(), DispatchError> {
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(DispatchError::validation(
            "commission_rate must be between 0 and 100",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), DispatchError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DispatchError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), DispatchError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DispatchError::validation(format!("invalid email: {}", email))),
    }
}

fn map_unique_violation(e: rusqlite::Error, email: &str) -> anyhow::Error {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DispatchError::Conflict(format!("email {} is already registered", email)).into()
        }
        other => anyhow::Error::new(other).context("Failed to write user"),
    }
}

impl DispatchDb {
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(DispatchError::validation("name is required").into());
        }
        validate_email(&new.email)?;
        validate_password(&new.password)?;
        let commission_rate = match new.role {
            UserRole::Worker => new.commission_rate.unwrap_or(0.0),
            _ => 0.0,
        };
        validate_commission(commission_rate)?;

        let email = new.email.trim().to_string();
        self.conn
            .execute(
                "INSERT INTO users (name, email, phone, user_type, commission_rate, password_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    name,
                    email,
                    new.phone,
                    new.role.as_db_str(),
                    commission_rate,
                    hash_password(&new.password)
                ],
            )
            .map_err(|e| map_unique_violation(e, &email))?;
        let id = self.conn.last_insert_rowid();
        bump_version(&self.conn)?;
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn list_users(&self, role: Option<UserRole>, include_inactive: bool) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM users
                 WHERE (?1 IS NULL OR user_type = ?1) AND (?2 OR active = 1)
                 ORDER BY name COLLATE NOCASE, id",
                USER_COLUMNS
            ))
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map(
                params![role.map(|r| r.as_db_str()), include_inactive],
                UserRow::from_row,
            )
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?.into_user()?);
        }
        Ok(users)
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        get_user(&self.conn, id)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email.trim()],
                UserRow::from_row,
            )
            .optional()
            .context("Failed to query user by email")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User> {
        let existing = self
            .get_user(id)?
            .ok_or(DispatchError::UserNotFound { id })?;

        if let Some(rate) = patch.commission_rate {
            validate_commission(rate)?;
            if existing.role != UserRole::Worker && rate != 0.0 {
                return Err(DispatchError::validation(
                    "only workers carry a commission rate",
                )
                .into());
            }
        }
        if let Some(email) = &patch.email {
            validate_email(email)?;
        }
        if let Some(password) = &patch.password {
            validate_password(password)?;
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DispatchError::validation("name cannot be empty").into());
            }
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE users SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![name.trim(), id],
            )
            .context("Failed to update user name")?;
        }
        if let Some(email) = &patch.email {
            let email = email.trim();
            tx.execute(
                "UPDATE users SET email = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![email, id],
            )
            .map_err(|e| map_unique_violation(e, email))?;
        }
        if let Some(phone) = &patch.phone {
            tx.execute(
                "UPDATE users SET phone = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![phone, id],
            )
            .context("Failed to update user phone")?;
        }
        if let Some(rate) = patch.commission_rate {
            tx.execute(
                "UPDATE users SET commission_rate = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![rate, id],
            )
            .context("Failed to update commission rate")?;
        }
        if let Some(active) = patch.active {
            tx.execute(
                "UPDATE users SET active = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![active, id],
            )
            .context("Failed to update user active flag")?;
            if !active {
                tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])
                    .context("Failed to revoke sessions")?;
            }
        }
        if let Some(password) = &patch.password {
            tx.execute(
                "UPDATE users SET password_hash = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![hash_password(password), id],
            )
            .context("Failed to update password")?;
        }
        bump_version(&tx)?;
        tx.commit().context("Failed to commit user update")?;
        self.get_user(id)?.context("User not found after update")
    }

    /// Soft-delete: deactivate the user and revoke their sessions.
    pub fn deactivate_user(&self, id: i64) -> Result<User> {
        self.update_user(
            id,
            &UserPatch {
                active: Some(false),
                ..UserPatch::default()
            },
        )
    }

    /// Check an email/password pair. Inactive users cannot log in.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<User> {
        let row: Option<(i64, String, bool)> = self
            .conn
            .query_row(
                "SELECT id, password_hash, active FROM users WHERE email = ?1",
                params![email.trim()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query credentials")?;
        match row {
            Some((id, hash, true)) if verify_password(password, &hash) => self
                .get_user(id)?
                .ok_or_else(|| DispatchError::UserNotFound { id }.into()),
            _ => Err(DispatchError::InvalidCredentials.into()),
        }
    }

    /// Active workers with their count of open (assigned/accepted/in-progress) jobs.
    pub fn list_worker_summaries(&self) -> Result<Vec<WorkerSummary>> {
        let workers = self.list_users(Some(UserRole::Worker), false)?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT COUNT(*) FROM jobs
                 WHERE worker_id = ?1 AND status IN ('assigned', 'accepted', 'in_progress')",
            )
            .context("Failed to prepare open job count")?;
        let mut summaries = Vec::with_capacity(workers.len());
        for worker in workers {
            let open_jobs: u32 = stmt
                .query_row(params![worker.id], |row| row.get(0))
                .context("Failed to count open jobs")?;
            summaries.push(WorkerSummary { worker, open_jobs });
        }
        Ok(summaries)
    }
}

pub(super) fn get_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            UserRow::from_row,
        )
        .optional()
        .context("Failed to query user")?;
    row.map(UserRow::into_user).transpose()
}

/// Ids of every active admin, for notification fan-out.
pub(super) fn active_admin_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT id FROM users WHERE user_type = 'ADMIN' AND active = 1 ORDER BY id")
        .context("Failed to prepare admin lookup")?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .context("Failed to query admins")?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.context("Failed to read admin id")?);
    }
    Ok(ids)
}

/// Intermediate row struct for reading users before converting `user_type`.
pub(super) struct UserRow {
    id: i64,
    name: String,
    email: String,
    phone: Option<String>,
    user_type: String,
    commission_rate: f64,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    pub(super) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            user_type: row.get(4)?,
            commission_rate: row.get(5)?,
            active: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub(super) fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            role: parse_column(&self.user_type, "user type")?,
            commission_rate: self.commission_rate,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::db::test_support::new_user;

    #[test]
    fn test_create_and_get_user() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let user = db.create_user(&new_user("Sam", UserRole::Worker))?;
        assert!(user.id > 0);
        assert_eq!(user.role, UserRole::Worker);
        assert_eq!(user.commission_rate, 30.0);
        assert!(user.active);

        let fetched = db.get_user(user.id)?.expect("user should exist");
        assert_eq!(fetched, user);
        let by_email = db.get_user_by_email("sam@example.com")?.expect("by email");
        assert_eq!(by_email.id, user.id);
        Ok(())
    }

    #[test]
    fn test_role_is_stored_upper_case() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let user = db.create_user(&new_user("Ada", UserRole::Admin))?;
        let stored: String = db.conn.query_row(
            "SELECT user_type FROM users WHERE id = ?1",
            params![user.id],
            |row| row.get(0),
        )?;
        assert_eq!(stored, "ADMIN");
        Ok(())
    }

    #[test]
    fn test_non_workers_never_carry_commission() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let mut admin = new_user("Ada", UserRole::Admin);
        admin.commission_rate = Some(50.0);
        let admin = db.create_user(&admin)?;
        assert_eq!(admin.commission_rate, 0.0);

        let err = db
            .update_user(
                admin.id,
                &UserPatch {
                    commission_rate: Some(10.0),
                    ..UserPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            DispatchError::find(&err),
            Some(DispatchError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_email_is_conflict() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        db.create_user(&new_user("Sam", UserRole::Worker))?;
        let mut dup = new_user("Other", UserRole::Client);
        dup.email = "SAM@example.com".to_string();
        let err = db.create_user(&dup).unwrap_err();
        assert!(matches!(
            DispatchError::find(&err),
            Some(DispatchError::Conflict(_))
        ));
        Ok(())
    }

    #[test]
    fn test_validation_rejects_bad_input() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let mut short = new_user("Sam", UserRole::Worker);
        short.password = "short".to_string();
        assert!(db.create_user(&short).is_err());

        let mut rate = new_user("Sam", UserRole::Worker);
        rate.commission_rate = Some(150.0);
        assert!(db.create_user(&rate).is_err());

        let mut email = new_user("Sam", UserRole::Worker);
        email.email = "not-an-email".to_string();
        assert!(db.create_user(&email).is_err());
        Ok(())
    }

    #[test]
    fn test_list_users_filters_by_role_and_active() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        db.create_user(&new_user("Ada", UserRole::Admin))?;
        let w1 = db.create_user(&new_user("Bo", UserRole::Worker))?;
        db.create_user(&new_user("Cy", UserRole::Worker))?;
        db.create_user(&new_user("Di", UserRole::Client))?;
        db.deactivate_user(w1.id)?;

        assert_eq!(db.list_users(None, true)?.len(), 4);
        assert_eq!(db.list_users(None, false)?.len(), 3);
        let workers = db.list_users(Some(UserRole::Worker), false)?;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "Cy");
        Ok(())
    }

    #[test]
    fn test_verify_credentials() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let user = db.create_user(&new_user("Sam", UserRole::Worker))?;

        let ok = db.verify_credentials("sam@example.com", "password123")?;
        assert_eq!(ok.id, user.id);

        for (email, password) in [
            ("sam@example.com", "wrong-password"),
            ("nobody@example.com", "password123"),
        ] {
            let err = db.verify_credentials(email, password).unwrap_err();
            assert!(matches!(
                DispatchError::find(&err),
                Some(DispatchError::InvalidCredentials)
            ));
        }

        db.deactivate_user(user.id)?;
        assert!(db.verify_credentials("sam@example.com", "password123").is_err());
        Ok(())
    }

    #[test]
    fn test_update_user_fields_and_password() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let user = db.create_user(&new_user("Sam", UserRole::Worker))?;
        let updated = db.update_user(
            user.id,
            &UserPatch {
                name: Some("Samantha".into()),
                phone: Some("555-0199".into()),
                commission_rate: Some(35.5),
                password: Some("new-password".into()),
                ..UserPatch::default()
            },
        )?;
        assert_eq!(updated.name, "Samantha");
        assert_eq!(updated.phone.as_deref(), Some("555-0199"));
        assert_eq!(updated.commission_rate, 35.5);
        assert!(db.verify_credentials("sam@example.com", "new-password").is_ok());

        let missing = db.update_user(999, &UserPatch::default()).unwrap_err();
        assert!(matches!(
            DispatchError::find(&missing),
            Some(DispatchError::UserNotFound { id: 999 })
        ));
        Ok(())
    }

    #[test]
    fn test_mutations_bump_version() -> Result<()> {
        let db = DispatchDb::new_in_memory()?;
        let before = db.current_version()?;
        db.create_user(&new_user("Sam", UserRole::Worker))?;
        assert!(db.current_version()? > before);
        Ok(())
    }
}

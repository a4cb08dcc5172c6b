use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::{DispatchDb, bump_version};
use crate::dispatch::models::Notification;
use crate::errors::DispatchError;

const NOTIFICATION_COLUMNS: &str = "id, user_id, job_id, title, message, read, created_at";

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_id: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Insert a notification on `conn` (which may be an open transaction).
/// The caller is responsible for bumping the sync version.
pub(super) fn insert_notification(
    conn: &Connection,
    user_id: i64,
    job_id: Option<i64>,
    title: &str,
    message: &str,
) -> Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (user_id, job_id, title, message) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, job_id, title, message],
    )
    .context("Failed to insert notification")?;
    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!(
            "SELECT {} FROM notifications WHERE id = ?1",
            NOTIFICATION_COLUMNS
        ),
        params![id],
        notification_from_row,
    )
    .context("Notification not found after insert")
}

impl DispatchDb {
    pub fn create_notification(
        &self,
        user_id: i64,
        job_id: Option<i64>,
        title: &str,
        message: &str,
    ) -> Result<Notification> {
        let notification = insert_notification(&self.conn, user_id, job_id, title, message)?;
        bump_version(&self.conn)?;
        Ok(notification)
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
                 ORDER BY id DESC LIMIT ?3",
                NOTIFICATION_COLUMNS
            ))
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map(params![user_id, unread_only, limit], notification_from_row)
            .context("Failed to query notifications")?;
        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row.context("Failed to read notification row")?);
        }
        Ok(notifications)
    }

    /// Mark one of `user_id`'s notifications as read. Other users'
    /// notifications are reported as not found.
    pub fn mark_notification_read(&self, id: i64, user_id: i64) -> Result<Notification> {
        let count = self
            .conn
            .execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to mark notification read")?;
        if count == 0 {
            return Err(DispatchError::NotificationNotFound { id }.into());
        }
        bump_version(&self.conn)?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM notifications WHERE id = ?1",
                    NOTIFICATION_COLUMNS
                ),
                params![id],
                notification_from_row,
            )
            .optional()
            .context("Failed to reload notification")?
            .ok_or_else(|| DispatchError::NotificationNotFound { id }.into())
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        let count = self
            .conn
            .execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                params![user_id],
            )
            .context("Failed to mark notifications read")?;
        if count > 0 {
            bump_version(&self.conn)?;
        }
        Ok(count)
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count unread notifications")
    }
}

//! SQLite storage for the dispatch back office.
//!
//! `DispatchDb` owns the connection; resource-specific queries live in the
//! submodules as further `impl DispatchDb` blocks. Every mutating method
//! bumps the sync version (see [`DispatchDb::current_version`]) so polling
//! clients can detect changes cheaply.

mod finance;
mod jobs;
mod notifications;
mod sessions;
mod users;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

pub use jobs::{JobFilter, JobPatch, NewJob, TransitionOutcome};
pub use users::{NewUser, UserPatch};

use crate::errors::DispatchError;

const SYNC_VERSION_KEY: &str = "sync_version";

/// Async-safe handle to the dispatch database.
///
/// Wraps `DispatchDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DispatchDb>>,
}

impl DbHandle {
    pub fn new(db: DispatchDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DispatchDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| DispatchError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct DispatchDb {
    conn: Connection,
}

impl DispatchDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    phone TEXT,
                    user_type TEXT NOT NULL CHECK (user_type IN ('ADMIN', 'WORKER', 'CLIENT')),
                    commission_rate REAL NOT NULL DEFAULT 0,
                    password_hash TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_name TEXT NOT NULL,
                    client_phone TEXT NOT NULL DEFAULT '',
                    address TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    job_type TEXT NOT NULL DEFAULT 'general',
                    status TEXT NOT NULL DEFAULT 'pending',
                    worker_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    client_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    scheduled_at TEXT,
                    estimated_price REAL,
                    total_amount REAL,
                    parts_cost REAL,
                    commission_amount REAL,
                    payment_method TEXT,
                    completion_notes TEXT,
                    accepted_at TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    cancelled_reason TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS job_updates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    from_status TEXT,
                    to_status TEXT,
                    note TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    job_id INTEGER REFERENCES jobs(id) ON DELETE SET NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL DEFAULT '',
                    read INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS financial_stats (
                    week_start TEXT PRIMARY KEY,
                    week_end TEXT NOT NULL,
                    jobs_completed INTEGER NOT NULL DEFAULT 0,
                    total_revenue REAL NOT NULL DEFAULT 0,
                    parts_cost REAL NOT NULL DEFAULT 0,
                    worker_commissions REAL NOT NULL DEFAULT 0,
                    ads_cost REAL NOT NULL DEFAULT 0,
                    total_expenses REAL NOT NULL DEFAULT 0,
                    net_profit REAL NOT NULL DEFAULT 0,
                    average_job_value REAL NOT NULL DEFAULT 0,
                    profit_margin REAL NOT NULL DEFAULT 0,
                    workers TEXT NOT NULL DEFAULT '[]',
                    computed_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS partner_weekly_costs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    partner_name TEXT NOT NULL,
                    week_start TEXT NOT NULL,
                    amount REAL NOT NULL,
                    notes TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(partner_name, week_start)
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs(worker_id);
                CREATE INDEX IF NOT EXISTS idx_jobs_client ON jobs(client_id);
                CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(completed_at);
                CREATE INDEX IF NOT EXISTS idx_job_updates_job ON job_updates(job_id);
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        set_setting(&self.conn, key, value)
    }

    // ── Sync version ──────────────────────────────────────────────────

    /// Current sync version; 0 until the first mutation.
    pub fn current_version(&self) -> Result<i64> {
        current_version(&self.conn)
    }
}

fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![key, value],
    )
    .context("Failed to upsert setting")?;
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![SYNC_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read sync version")?;
    match raw {
        Some(v) => v.parse::<i64>().context("Corrupt sync version"),
        None => Ok(0),
    }
}

/// Advance the sync version to `max(previous + 1, now_millis)`.
///
/// Called inside every mutating operation, on the same connection or
/// transaction as the mutation itself.
fn bump_version(conn: &Connection) -> Result<i64> {
    let previous = current_version(conn)?;
    let now = chrono::Utc::now().timestamp_millis();
    let next = now.max(previous + 1);
    set_setting(conn, SYNC_VERSION_KEY, &next.to_string())?;
    Ok(next)
}

fn now_timestamp() -> String {
    chrono::Utc::now()
        .format(super::models::TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse a stored enum column, surfacing corrupt values as errors.
fn parse_column<T>(value: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    T::from_str(value)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to parse {}", what))
}

/// Fixtures shared by the storage and API tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::dispatch::models::{User, UserRole};

    pub(crate) fn new_user(name: &str, role: UserRole) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
            role,
            commission_rate: (role == UserRole::Worker).then_some(30.0),
            password: "password123".to_string(),
        }
    }

    pub(crate) fn new_job(client_name: &str) -> NewJob {
        NewJob {
            client_name: client_name.to_string(),
            client_phone: "555-0100".to_string(),
            address: "12 Elm St".to_string(),
            description: "Locked out of house".to_string(),
            job_type: Some("lockout".to_string()),
            scheduled_at: None,
            estimated_price: Some(120.0),
            worker_id: None,
            client_id: None,
        }
    }

    /// Database seeded with one admin, two workers and one client.
    pub(crate) struct Seeded {
        pub db: DispatchDb,
        pub admin: User,
        pub worker: User,
        pub other_worker: User,
        pub client: User,
    }

    pub(crate) fn seeded() -> Result<Seeded> {
        let db = DispatchDb::new_in_memory()?;
        let admin = db.create_user(&new_user("Ada", UserRole::Admin))?;
        let worker = db.create_user(&new_user("Sam", UserRole::Worker))?;
        let other_worker = db.create_user(&new_user("Kim", UserRole::Worker))?;
        let client = db.create_user(&new_user("Cleo", UserRole::Client))?;
        Ok(Seeded {
            db,
            admin,
            worker,
            other_worker,
            client,
        })
    }
}

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Deserialize;

use super::notifications::insert_notification;
use super::users::{active_admin_ids, get_user};
use super::{DispatchDb, bump_version, now_timestamp, parse_column};
use crate::dispatch::lifecycle::{Actor, JobAction, commission_for, plan_transition};
use crate::dispatch::models::{
    Job, JobDetail, JobStatus, JobUpdate, Notification, StatusCount, UserRole,
};
use crate::errors::DispatchError;

const JOB_COLUMNS: &str = "id, client_name, client_phone, address, description, job_type, \
     status, worker_id, client_id, created_by, scheduled_at, estimated_price, total_amount, \
     parts_cost, commission_amount, payment_method, completion_notes, accepted_at, started_at, \
     completed_at, cancelled_reason, created_at, updated_at";

const UPDATE_COLUMNS: &str = "id, job_id, user_id, from_status, to_status, note, created_at";

const DEFAULT_JOB_TYPE: &str = "general";

#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub client_name: String,
    #[serde(default)]
    pub client_phone: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub estimated_price: Option<f64>,
    /// Assign on creation (admins only).
    #[serde(default)]
    pub worker_id: Option<i64>,
    /// Owning client account (admins only; clients always own what they create).
    #[serde(default)]
    pub client_id: Option<i64>,
}

/// Editable descriptive fields. Status, worker and money go through
/// lifecycle transitions instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub scheduled_at: Option<String>,
    pub estimated_price: Option<f64>,
}

impl JobPatch {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.client_name.is_none()
            && self.client_phone.is_none()
            && self.address.is_none()
            && self.description.is_none()
            && self.job_type.is_none()
            && self.scheduled_at.is_none()
            && self.estimated_price.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub worker_id: Option<i64>,
    pub client_id: Option<i64>,
    /// Inclusive lower bound on `completed_at` (`YYYY-MM-DD`).
    pub completed_from: Option<String>,
    /// Exclusive upper bound on `completed_at` (`YYYY-MM-DD`).
    pub completed_before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub job: Job,
    pub from: JobStatus,
    pub to: JobStatus,
    /// False when the job was already in the target state.
    pub changed: bool,
    pub notifications: Vec<Notification>,
}

fn validate_price(price: Option<f64>) -> Result<(), DispatchError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(DispatchError::validation(
            "estimated_price must be a non-negative number",
        )),
        _ => Ok(()),
    }
}

fn required(value: &str, field: &str) -> Result<String, DispatchError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

impl DispatchDb {
    /// Create a job on behalf of `actor`.
    ///
    /// Clients always own the jobs they create and cannot pick a worker;
    /// admins may set both. A job created with a worker goes straight to
    /// `assigned`. Returns the job and every notification produced.
    pub fn create_job(&self, new: &NewJob, actor: Actor) -> Result<(Job, Vec<Notification>)> {
        let client_name = required(&new.client_name, "client_name")?;
        let address = required(&new.address, "address")?;
        validate_price(new.estimated_price)?;

        let client_id = match actor.role {
            UserRole::Admin => new.client_id,
            UserRole::Client => {
                if new.worker_id.is_some() {
                    return Err(DispatchError::forbidden(actor.role, "assign a worker").into());
                }
                Some(actor.user_id)
            }
            UserRole::Worker => {
                return Err(DispatchError::forbidden(actor.role, "create jobs").into());
            }
        };
        if let Some(id) = client_id {
            let owner = get_user(&self.conn, id)?.ok_or(DispatchError::UserNotFound { id })?;
            if owner.role != UserRole::Client {
                return Err(DispatchError::validation(format!(
                    "user {} is not a client account",
                    id
                ))
                .into());
            }
        }
        let job_type = new
            .job_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_JOB_TYPE);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO jobs (client_name, client_phone, address, description, job_type,
                               client_id, created_by, scheduled_at, estimated_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                client_name,
                new.client_phone.trim(),
                address,
                new.description.trim(),
                job_type,
                client_id,
                actor.user_id,
                new.scheduled_at,
                new.estimated_price
            ],
        )
        .context("Failed to insert job")?;
        let job_id = tx.last_insert_rowid();
        insert_update(
            &tx,
            job_id,
            Some(actor.user_id),
            None,
            Some(JobStatus::Pending),
            "Job created",
        )?;

        let mut notifications = Vec::new();
        if actor.role == UserRole::Client {
            for admin_id in active_admin_ids(&tx)? {
                notifications.push(insert_notification(
                    &tx,
                    admin_id,
                    Some(job_id),
                    "New job request",
                    &format!("{} at {}", client_name, address),
                )?);
            }
        }

        let job = match new.worker_id {
            Some(worker_id) => {
                let outcome =
                    transition(&tx, job_id, &JobAction::Assign { worker_id }, actor)?;
                notifications.extend(outcome.notifications);
                outcome.job
            }
            None => {
                bump_version(&tx)?;
                get_job(&tx, job_id)?.context("Job not found after insert")?
            }
        };
        tx.commit().context("Failed to commit job creation")?;
        Ok((job, notifications))
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        get_job(&self.conn, id)
    }

    pub fn get_job_detail(&self, id: i64) -> Result<JobDetail> {
        let job = self.get_job(id)?.ok_or(DispatchError::JobNotFound { id })?;
        let updates = self.list_job_updates(id)?;
        Ok(JobDetail { job, updates })
    }

    /// Jobs matching `filter`, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(worker_id) = filter.worker_id {
            clauses.push("worker_id = ?");
            values.push(Value::Integer(worker_id));
        }
        if let Some(client_id) = filter.client_id {
            clauses.push("client_id = ?");
            values.push(Value::Integer(client_id));
        }
        if let Some(from) = &filter.completed_from {
            clauses.push("completed_at >= ?");
            values.push(Value::Text(from.clone()));
        }
        if let Some(before) = &filter.completed_before {
            clauses.push("completed_at < ?");
            values.push(Value::Text(before.clone()));
        }

        let mut sql = format!("SELECT {} FROM jobs", JOB_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_jobs")?;
        let rows = stmt
            .query_map(params_from_iter(values), JobRow::from_row)
            .context("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.context("Failed to read job row")?.into_job()?);
        }
        Ok(jobs)
    }

    /// Edit descriptive fields. Closed jobs are read-only.
    pub fn update_job(&self, id: i64, patch: &JobPatch) -> Result<Job> {
        let existing = self.get_job(id)?.ok_or(DispatchError::JobNotFound { id })?;
        if existing.status.is_terminal() {
            return Err(DispatchError::Conflict(format!(
                "job {} is {} and can no longer be edited",
                id, existing.status
            ))
            .into());
        }
        if patch.is_empty() {
            return Ok(existing);
        }
        validate_price(patch.estimated_price)?;
        let client_name = patch
            .client_name
            .as_deref()
            .map(|v| required(v, "client_name"))
            .transpose()?;
        let address = patch
            .address
            .as_deref()
            .map(|v| required(v, "address"))
            .transpose()?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let text_fields = [
            ("client_name", client_name),
            ("client_phone", patch.client_phone.clone()),
            ("address", address),
            ("description", patch.description.clone()),
            ("job_type", patch.job_type.clone()),
            ("scheduled_at", patch.scheduled_at.clone()),
        ];
        for (column, value) in text_fields {
            if let Some(value) = value {
                tx.execute(
                    &format!(
                        "UPDATE jobs SET {} = ?1, updated_at = datetime('now') WHERE id = ?2",
                        column
                    ),
                    params![value, id],
                )
                .with_context(|| format!("Failed to update job {}", column))?;
            }
        }
        if let Some(price) = patch.estimated_price {
            tx.execute(
                "UPDATE jobs SET estimated_price = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![price, id],
            )
            .context("Failed to update estimated price")?;
        }
        bump_version(&tx)?;
        tx.commit().context("Failed to commit job update")?;
        self.get_job(id)?.context("Job not found after update")
    }

    /// Hard-delete a job with its history. Returns false if it did not exist.
    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .context("Failed to delete job")?;
        if count > 0 {
            bump_version(&self.conn)?;
        }
        Ok(count > 0)
    }

    /// Run a lifecycle action atomically: status change, audit row,
    /// notifications and version bump commit together or not at all.
    pub fn apply_transition(
        &self,
        job_id: i64,
        action: &JobAction,
        actor: Actor,
    ) -> Result<TransitionOutcome> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let outcome = transition(&tx, job_id, action, actor)?;
        tx.commit().context("Failed to commit transition")?;
        Ok(outcome)
    }

    /// Oldest first.
    pub fn list_job_updates(&self, job_id: i64) -> Result<Vec<JobUpdate>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM job_updates WHERE job_id = ?1 ORDER BY id",
                UPDATE_COLUMNS
            ))
            .context("Failed to prepare list_job_updates")?;
        let rows = stmt
            .query_map(params![job_id], UpdateRow::from_row)
            .context("Failed to query job updates")?;
        let mut updates = Vec::new();
        for row in rows {
            updates.push(row.context("Failed to read job update row")?.into_update()?);
        }
        Ok(updates)
    }

    /// Free-form note on a job's timeline; does not change status.
    pub fn add_job_note(&self, job_id: i64, user_id: i64, note: &str) -> Result<JobUpdate> {
        let note = required(note, "note")?;
        if self.get_job(job_id)?.is_none() {
            return Err(DispatchError::JobNotFound { id: job_id }.into());
        }
        let update = insert_update(&self.conn, job_id, Some(user_id), None, None, &note)?;
        bump_version(&self.conn)?;
        Ok(update)
    }

    /// Job count for every status (zeros included), optionally scoped to a
    /// worker or a client.
    pub fn status_counts(
        &self,
        worker_id: Option<i64>,
        client_id: Option<i64>,
    ) -> Result<Vec<StatusCount>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT status, COUNT(*) FROM jobs
                 WHERE (?1 IS NULL OR worker_id = ?1) AND (?2 IS NULL OR client_id = ?2)
                 GROUP BY status",
            )
            .context("Failed to prepare status counts")?;
        let rows = stmt
            .query_map(params![worker_id, client_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })
            .context("Failed to query status counts")?;
        let mut counts: Vec<StatusCount> = JobStatus::ALL
            .iter()
            .map(|&status| StatusCount { status, count: 0 })
            .collect();
        for row in rows {
            let (status, count) = row.context("Failed to read status count")?;
            let status: JobStatus = parse_column(&status, "job status")?;
            if let Some(slot) = counts.iter_mut().find(|c| c.status == status) {
                slot.count = count;
            }
        }
        Ok(counts)
    }
}

fn get_job(conn: &Connection, id: i64) -> Result<Option<Job>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            JobRow::from_row,
        )
        .optional()
        .context("Failed to query job")?;
    row.map(JobRow::into_job).transpose()
}

fn insert_update(
    conn: &Connection,
    job_id: i64,
    user_id: Option<i64>,
    from: Option<JobStatus>,
    to: Option<JobStatus>,
    note: &str,
) -> Result<JobUpdate> {
    conn.execute(
        "INSERT INTO job_updates (job_id, user_id, from_status, to_status, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            job_id,
            user_id,
            from.map(|s| s.as_str()),
            to.map(|s| s.as_str()),
            note
        ],
    )
    .context("Failed to insert job update")?;
    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!("SELECT {} FROM job_updates WHERE id = ?1", UPDATE_COLUMNS),
        params![id],
        UpdateRow::from_row,
    )
    .context("Job update not found after insert")?
    .into_update()
}

fn transition(
    conn: &Connection,
    job_id: i64,
    action: &JobAction,
    actor: Actor,
) -> Result<TransitionOutcome> {
    let job = get_job(conn, job_id)?.ok_or(DispatchError::JobNotFound { id: job_id })?;

    if let JobAction::Assign { worker_id } = action {
        let worker = get_user(conn, *worker_id)?.ok_or(DispatchError::UserNotFound {
            id: *worker_id,
        })?;
        if worker.role != UserRole::Worker || !worker.active {
            return Err(DispatchError::NotAWorker {
                user_id: *worker_id,
            }
            .into());
        }
    }

    let plan = plan_transition(&job, action, actor)?;
    if plan.no_op {
        return Ok(TransitionOutcome {
            from: plan.from,
            to: plan.to,
            changed: false,
            notifications: Vec::new(),
            job,
        });
    }

    let now = now_timestamp();
    match action {
        JobAction::Assign { .. } | JobAction::Reject { .. } => {
            conn.execute(
                "UPDATE jobs SET status = ?1, worker_id = ?2, accepted_at = NULL,
                                 updated_at = datetime('now')
                 WHERE id = ?3",
                params![plan.to.as_str(), plan.worker_id, job_id],
            )
            .context("Failed to update job assignment")?;
        }
        JobAction::Accept => {
            conn.execute(
                "UPDATE jobs SET status = ?1, accepted_at = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![plan.to.as_str(), now, job_id],
            )
            .context("Failed to accept job")?;
        }
        JobAction::Start => {
            conn.execute(
                "UPDATE jobs SET status = ?1, started_at = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![plan.to.as_str(), now, job_id],
            )
            .context("Failed to start job")?;
        }
        JobAction::Complete(payload) => {
            let rate = match plan.worker_id {
                Some(id) => get_user(conn, id)?.map_or(0.0, |w| w.commission_rate),
                None => 0.0,
            };
            let completed_at = match payload.completed_on {
                Some(day) => format!("{} 00:00:00", day.format("%Y-%m-%d")),
                None => now.clone(),
            };
            conn.execute(
                "UPDATE jobs SET status = ?1, total_amount = ?2, parts_cost = ?3,
                                 commission_amount = ?4, payment_method = ?5,
                                 completion_notes = ?6, completed_at = ?7,
                                 updated_at = datetime('now')
                 WHERE id = ?8",
                params![
                    plan.to.as_str(),
                    payload.total_amount,
                    payload.parts_cost,
                    commission_for(payload.total_amount, rate),
                    payload.payment_method.as_str(),
                    payload.notes,
                    completed_at,
                    job_id
                ],
            )
            .context("Failed to complete job")?;
        }
        JobAction::Cancel { reason } => {
            conn.execute(
                "UPDATE jobs SET status = ?1, cancelled_reason = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![plan.to.as_str(), reason, job_id],
            )
            .context("Failed to cancel job")?;
        }
    }

    insert_update(
        conn,
        job_id,
        Some(actor.user_id),
        Some(plan.from),
        Some(plan.to),
        &action.note(),
    )?;

    let job = get_job(conn, job_id)?.context("Job not found after transition")?;
    let notifications = notify_transition(conn, &job, action, actor)?;
    bump_version(conn)?;

    Ok(TransitionOutcome {
        job,
        from: plan.from,
        to: plan.to,
        changed: true,
        notifications,
    })
}

/// Fan out notifications for a transition. The acting user is never
/// notified of their own action.
fn notify_transition(
    conn: &Connection,
    job: &Job,
    action: &JobAction,
    actor: Actor,
) -> Result<Vec<Notification>> {
    let admins = active_admin_ids(conn)?;
    let worker_name = match job.worker_id {
        Some(id) => get_user(conn, id)?.map(|w| w.name),
        None => None,
    }
    .unwrap_or_else(|| "A worker".to_string());

    let (recipients, title, message): (Vec<i64>, String, String) = match action {
        JobAction::Assign { worker_id } => (
            vec![*worker_id],
            "New job assigned".to_string(),
            format!("{} at {} for {}", job.job_type, job.address, job.client_name),
        ),
        JobAction::Accept => (
            admins,
            format!("Job #{} accepted", job.id),
            format!("{} accepted the job at {}", worker_name, job.address),
        ),
        JobAction::Reject { .. } => (
            admins,
            format!("Job #{} rejected", job.id),
            action.note(),
        ),
        JobAction::Start => (
            admins.into_iter().chain(job.client_id).collect(),
            format!("Job #{} started", job.id),
            format!("{} is on the way to {}", worker_name, job.address),
        ),
        JobAction::Complete(payload) => (
            admins.into_iter().chain(job.client_id).collect(),
            format!("Job #{} completed", job.id),
            format!("Completed at {}, total {:.2}", job.address, payload.total_amount),
        ),
        JobAction::Cancel { .. } => (
            admins
                .into_iter()
                .chain(job.worker_id)
                .chain(job.client_id)
                .collect(),
            format!("Job #{} cancelled", job.id),
            action.note(),
        ),
    };

    let mut seen = Vec::new();
    let mut notifications = Vec::new();
    for user_id in recipients {
        if user_id == actor.user_id || seen.contains(&user_id) {
            continue;
        }
        seen.push(user_id);
        notifications.push(insert_notification(
            conn,
            user_id,
            Some(job.id),
            &title,
            &message,
        )?);
    }
    Ok(notifications)
}

/// Intermediate row struct for reading jobs before parsing enum columns.
struct JobRow {
    id: i64,
    client_name: String,
    client_phone: String,
    address: String,
    description: String,
    job_type: String,
    status: String,
    worker_id: Option<i64>,
    client_id: Option<i64>,
    created_by: Option<i64>,
    scheduled_at: Option<String>,
    estimated_price: Option<f64>,
    total_amount: Option<f64>,
    parts_cost: Option<f64>,
    commission_amount: Option<f64>,
    payment_method: Option<String>,
    completion_notes: Option<String>,
    accepted_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    cancelled_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_name: row.get(1)?,
            client_phone: row.get(2)?,
            address: row.get(3)?,
            description: row.get(4)?,
            job_type: row.get(5)?,
            status: row.get(6)?,
            worker_id: row.get(7)?,
            client_id: row.get(8)?,
            created_by: row.get(9)?,
            scheduled_at: row.get(10)?,
            estimated_price: row.get(11)?,
            total_amount: row.get(12)?,
            parts_cost: row.get(13)?,
            commission_amount: row.get(14)?,
            payment_method: row.get(15)?,
            completion_notes: row.get(16)?,
            accepted_at: row.get(17)?,
            started_at: row.get(18)?,
            completed_at: row.get(19)?,
            cancelled_reason: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            client_name: self.client_name,
            client_phone: self.client_phone,
            address: self.address,
            description: self.description,
            job_type: self.job_type,
            status: parse_column(&self.status, "job status")?,
            worker_id: self.worker_id,
            client_id: self.client_id,
            created_by: self.created_by,
            scheduled_at: self.scheduled_at,
            estimated_price: self.estimated_price,
            total_amount: self.total_amount,
            parts_cost: self.parts_cost,
            commission_amount: self.commission_amount,
            payment_method: self
                .payment_method
                .as_deref()
                .map(|m| parse_column(m, "payment method"))
                .transpose()?,
            completion_notes: self.completion_notes,
            accepted_at: self.accepted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_reason: self.cancelled_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct UpdateRow {
    id: i64,
    job_id: i64,
    user_id: Option<i64>,
    from_status: Option<String>,
    to_status: Option<String>,
    note: String,
    created_at: String,
}

impl UpdateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            user_id: row.get(2)?,
            from_status: row.get(3)?,
            to_status: row.get(4)?,
            note: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_update(self) -> Result<JobUpdate> {
        let parse = |s: Option<String>| -> Result<Option<JobStatus>> {
            s.as_deref()
                .map(|v| parse_column(v, "job update status"))
                .transpose()
        };
        Ok(JobUpdate {
            id: self.id,
            job_id: self.job_id,
            user_id: self.user_id,
            from_status: parse(self.from_status)?,
            to_status: parse(self.to_status)?,
            note: self.note,
            created_at: self.created_at,
        })
    }
}

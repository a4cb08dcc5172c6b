use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Timestamp format used for every TEXT datetime column (matches SQLite's
/// `datetime('now')`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Worker,
    Client,
}

impl UserRole {
    /// Lower-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Worker => "worker",
            Self::Client => "client",
        }
    }

    /// Upper-case name stored in `users.user_type`.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Worker => "WORKER",
            Self::Client => "CLIENT",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "worker" => Ok(Self::Worker),
            "client" => Ok(Self::Client),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Assigned,
        Self::Accepted,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses in which a worker must be attached to the job.
    pub fn requires_worker(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::Accepted | Self::InProgress | Self::Completed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "accepted" => Ok(Self::Accepted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    Transfer,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Check => "check",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "check" => Ok(Self::Check),
            "transfer" => Ok(Self::Transfer),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid payment method: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: UserRole,
    /// Percentage of job value paid to a worker, 0 for other roles.
    pub commission_rate: f64,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub address: String,
    pub description: String,
    pub job_type: String,
    pub status: JobStatus,
    pub worker_id: Option<i64>,
    pub client_id: Option<i64>,
    pub created_by: Option<i64>,
    pub scheduled_at: Option<String>,
    pub estimated_price: Option<f64>,
    pub total_amount: Option<f64>,
    pub parts_cost: Option<f64>,
    pub commission_amount: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub completion_notes: Option<String>,
    pub accepted_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Audit entry for a status change or a free-form note on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdate {
    pub id: i64,
    pub job_id: i64,
    pub user_id: Option<i64>,
    pub from_status: Option<JobStatus>,
    pub to_status: Option<JobStatus>,
    pub note: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub job_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: String,
}

/// Advertising / lead-source spend for one calendar week.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartnerWeeklyCost {
    pub id: i64,
    pub partner_name: String,
    /// Monday of the week, `YYYY-MM-DD`.
    pub week_start: String,
    pub amount: f64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerEarnings {
    pub worker_id: i64,
    pub worker_name: String,
    pub jobs_completed: u32,
    pub revenue: f64,
    pub commission: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeeklyFinancialStats {
    pub week_start: String,
    pub week_end: String,
    pub jobs_completed: u32,
    pub total_revenue: f64,
    pub parts_cost: f64,
    pub worker_commissions: f64,
    pub ads_cost: f64,
    pub total_expenses: f64,
    pub net_profit: f64,
    pub average_job_value: f64,
    pub profit_margin: f64,
    #[serde(default)]
    pub workers: Vec<WorkerEarnings>,
    pub computed_at: String,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: Job,
    pub updates: Vec<JobUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub version: i64,
    pub changed: bool,
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    #[serde(flatten)]
    pub worker: User,
    pub open_jobs: u32,
}

/// Per-role dashboard payload served by `GET /api/dashboard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Dashboard {
    Admin {
        status_counts: Vec<StatusCount>,
        week: WeeklyFinancialStats,
        workers: Vec<WorkerSummary>,
        unread_notifications: u32,
    },
    Worker {
        status_counts: Vec<StatusCount>,
        active_jobs: Vec<Job>,
        week_earnings: WorkerEarnings,
        unread_notifications: u32,
    },
    Client {
        jobs: Vec<Job>,
        unread_notifications: u32,
    },
}

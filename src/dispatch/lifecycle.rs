//! Job lifecycle state machine.
//!
//! Every status change goes through [`plan_transition`], which checks the
//! acting user's permissions and the transition table before the storage
//! layer writes anything:
//!
//! ```text
//!   pending ──assign──> assigned ──accept──> accepted ──start──> in_progress ──complete──> completed
//!      ^                   │  ^
//!      └──────reject───────┘  └─assign (reassign)
//!
//!   pending | assigned | accepted | in_progress ──cancel──> cancelled
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::models::{Job, JobStatus, PaymentMethod, User, UserRole};
use crate::errors::DispatchError;

/// The user performing an action, reduced to what permission checks need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: UserRole,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
        }
    }
}

/// Data recorded when a job is closed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionPayload {
    pub total_amount: f64,
    #[serde(default)]
    pub parts_cost: f64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
    /// Backdated completion day; defaults to now.
    #[serde(default)]
    pub completed_on: Option<NaiveDate>,
}

impl CompletionPayload {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.total_amount.is_finite() || self.total_amount < 0.0 {
            return Err(DispatchError::validation(
                "total_amount must be a non-negative number",
            ));
        }
        if !self.parts_cost.is_finite() || self.parts_cost < 0.0 {
            return Err(DispatchError::validation(
                "parts_cost must be a non-negative number",
            ));
        }
        if self.parts_cost > self.total_amount {
            return Err(DispatchError::validation(
                "parts_cost cannot exceed total_amount",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    Assign { worker_id: i64 },
    Accept,
    Reject { reason: Option<String> },
    Start,
    Complete(CompletionPayload),
    Cancel { reason: Option<String> },
}

impl JobAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::Accept => "accept",
            Self::Reject { .. } => "reject",
            Self::Start => "start",
            Self::Complete(_) => "complete",
            Self::Cancel { .. } => "cancel",
        }
    }

    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::Assign { .. } => JobStatus::Assigned,
            Self::Accept => JobStatus::Accepted,
            Self::Reject { .. } => JobStatus::Pending,
            Self::Start => JobStatus::InProgress,
            Self::Complete(_) => JobStatus::Completed,
            Self::Cancel { .. } => JobStatus::Cancelled,
        }
    }

    /// Human-readable audit note for the job update row.
    pub fn note(&self) -> String {
        match self {
            Self::Assign { worker_id } => format!("Assigned to worker {}", worker_id),
            Self::Accept => "Job accepted".to_string(),
            Self::Reject { reason } => match reason {
                Some(r) => format!("Job rejected: {}", r),
                None => "Job rejected".to_string(),
            },
            Self::Start => "Work started".to_string(),
            Self::Complete(p) => match &p.notes {
                Some(n) => format!("Job completed ({:.2}): {}", p.total_amount, n),
                None => format!("Job completed ({:.2})", p.total_amount),
            },
            Self::Cancel { reason } => match reason {
                Some(r) => format!("Job cancelled: {}", r),
                None => "Job cancelled".to_string(),
            },
        }
    }
}

/// Outcome of a validated transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub from: JobStatus,
    pub to: JobStatus,
    /// Worker attached to the job after the transition.
    pub worker_id: Option<i64>,
    /// The job is already where the action would put it; nothing to write.
    pub no_op: bool,
}

/// Validate `action` against `job` for `actor` and compute the resulting state.
pub fn plan_transition(
    job: &Job,
    action: &JobAction,
    actor: Actor,
) -> Result<TransitionPlan, DispatchError> {
    authorize(job, action, actor)?;

    let from = job.status;
    let invalid = || DispatchError::InvalidTransition {
        from,
        action: action.name().to_string(),
    };
    let plan = |worker_id: Option<i64>| TransitionPlan {
        from,
        to: action.target_status(),
        worker_id,
        no_op: false,
    };
    let no_op = || TransitionPlan {
        from,
        to: from,
        worker_id: job.worker_id,
        no_op: true,
    };

    match (action, from) {
        (JobAction::Assign { worker_id }, JobStatus::Assigned)
            if job.worker_id == Some(*worker_id) =>
        {
            Ok(no_op())
        }
        (JobAction::Assign { worker_id }, JobStatus::Pending | JobStatus::Assigned) => {
            Ok(plan(Some(*worker_id)))
        }
        (JobAction::Accept, JobStatus::Accepted) => Ok(no_op()),
        (JobAction::Accept, JobStatus::Assigned) => Ok(plan(job.worker_id)),
        (JobAction::Reject { .. }, JobStatus::Assigned) => Ok(plan(None)),
        (JobAction::Start, JobStatus::InProgress) => Ok(no_op()),
        (JobAction::Start, JobStatus::Accepted) => Ok(plan(job.worker_id)),
        (JobAction::Complete(payload), JobStatus::InProgress) => {
            payload.validate()?;
            Ok(plan(job.worker_id))
        }
        (JobAction::Cancel { .. }, JobStatus::Cancelled) => Ok(no_op()),
        (JobAction::Cancel { .. }, JobStatus::Pending) => Ok(plan(None)),
        (
            JobAction::Cancel { .. },
            JobStatus::Assigned | JobStatus::Accepted | JobStatus::InProgress,
        ) if actor.role == UserRole::Admin => Ok(plan(job.worker_id)),
        (
            JobAction::Cancel { .. },
            JobStatus::Assigned | JobStatus::Accepted | JobStatus::InProgress,
        ) => {
            Err(DispatchError::forbidden(
                actor.role,
                "cancel a job once a worker is assigned",
            ))
        }
        _ => Err(invalid()),
    }
}

fn authorize(job: &Job, action: &JobAction, actor: Actor) -> Result<(), DispatchError> {
    let is_assigned_worker =
        actor.role == UserRole::Worker && job.worker_id == Some(actor.user_id);
    let is_owning_client = actor.role == UserRole::Client && job.client_id == Some(actor.user_id);

    let allowed = match (actor.role, action) {
        (UserRole::Admin, _) => true,
        (UserRole::Worker, JobAction::Assign { .. } | JobAction::Cancel { .. }) => false,
        (UserRole::Worker, _) => is_assigned_worker,
        (UserRole::Client, JobAction::Cancel { .. }) => is_owning_client,
        (UserRole::Client, _) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(DispatchError::forbidden(
            actor.role,
            format!("{} job {}", action.name(), job.id),
        ))
    }
}

/// Commission owed to a worker for a completed job, rounded to cents.
pub fn commission_for(total_amount: f64, commission_rate: f64) -> f64 {
    super::finance::round2(total_amount * commission_rate / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: Actor = Actor {
        user_id: 1,
        role: UserRole::Admin,
    };
    const WORKER: Actor = Actor {
        user_id: 2,
        role: UserRole::Worker,
    };
    const OTHER_WORKER: Actor = Actor {
        user_id: 3,
        role: UserRole::Worker,
    };
    const CLIENT: Actor = Actor {
        user_id: 4,
        role: UserRole::Client,
    };

    fn job(status: JobStatus, worker_id: Option<i64>) -> Job {
        Job {
            id: 10,
            client_name: "Dana".into(),
            client_phone: "555-0100".into(),
            address: "1 Main St".into(),
            description: "Locked out".into(),
            job_type: "lockout".into(),
            status,
            worker_id,
            client_id: Some(CLIENT.user_id),
            created_by: Some(ADMIN.user_id),
            scheduled_at: None,
            estimated_price: None,
            total_amount: None,
            parts_cost: None,
            commission_amount: None,
            payment_method: None,
            completion_notes: None,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_reason: None,
            created_at: "2024-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        }
    }

    fn payload(total: f64, parts: f64) -> CompletionPayload {
        CompletionPayload {
            total_amount: total,
            parts_cost: parts,
            payment_method: PaymentMethod::Card,
            notes: None,
            completed_on: None,
        }
    }

    #[test]
    fn test_happy_path_walks_every_status() {
        let mut j = job(JobStatus::Pending, None);
        let steps = [
            (JobAction::Assign { worker_id: 2 }, ADMIN, JobStatus::Assigned),
            (JobAction::Accept, WORKER, JobStatus::Accepted),
            (JobAction::Start, WORKER, JobStatus::InProgress),
            (
                JobAction::Complete(payload(200.0, 20.0)),
                WORKER,
                JobStatus::Completed,
            ),
        ];
        for (action, actor, expected) in steps {
            let p = plan_transition(&j, &action, actor).unwrap();
            assert!(!p.no_op);
            assert_eq!(p.to, expected);
            j.status = p.to;
            j.worker_id = p.worker_id;
        }
        assert_eq!(j.worker_id, Some(2));
    }

    #[test]
    fn test_reject_returns_job_to_pending_and_clears_worker() {
        let j = job(JobStatus::Assigned, Some(2));
        let p = plan_transition(&j, &JobAction::Reject { reason: None }, WORKER).unwrap();
        assert_eq!(p.to, JobStatus::Pending);
        assert_eq!(p.worker_id, None);
    }

    #[test]
    fn test_reassign_to_same_worker_is_noop() {
        let j = job(JobStatus::Assigned, Some(2));
        let p = plan_transition(&j, &JobAction::Assign { worker_id: 2 }, ADMIN).unwrap();
        assert!(p.no_op);

        let p = plan_transition(&j, &JobAction::Assign { worker_id: 3 }, ADMIN).unwrap();
        assert!(!p.no_op);
        assert_eq!(p.worker_id, Some(3));
    }

    #[test]
    fn test_repeated_accept_and_start_are_idempotent() {
        let j = job(JobStatus::Accepted, Some(2));
        assert!(plan_transition(&j, &JobAction::Accept, WORKER).unwrap().no_op);
        let j = job(JobStatus::InProgress, Some(2));
        assert!(plan_transition(&j, &JobAction::Start, WORKER).unwrap().no_op);
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        let j = job(JobStatus::Assigned, Some(2));
        let err = plan_transition(&j, &JobAction::Start, WORKER).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                from: JobStatus::Assigned,
                ..
            }
        ));

        let j = job(JobStatus::Accepted, Some(2));
        let err =
            plan_transition(&j, &JobAction::Complete(payload(10.0, 0.0)), WORKER).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        for status in [JobStatus::Completed, JobStatus::Cancelled] {
            let j = job(status, Some(2));
            for action in [
                JobAction::Assign { worker_id: 3 },
                JobAction::Accept,
                JobAction::Start,
                JobAction::Reject { reason: None },
            ] {
                assert!(plan_transition(&j, &action, ADMIN).is_err());
            }
        }
        let j = job(JobStatus::Completed, Some(2));
        assert!(plan_transition(&j, &JobAction::Cancel { reason: None }, ADMIN).is_err());
    }

    #[test]
    fn test_other_worker_is_forbidden() {
        let j = job(JobStatus::Assigned, Some(2));
        let err = plan_transition(&j, &JobAction::Accept, OTHER_WORKER).unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden { .. }));
    }

    #[test]
    fn test_workers_cannot_assign_or_cancel() {
        let j = job(JobStatus::Pending, None);
        assert!(matches!(
            plan_transition(&j, &JobAction::Assign { worker_id: 2 }, WORKER),
            Err(DispatchError::Forbidden { .. })
        ));
        let j = job(JobStatus::Assigned, Some(2));
        assert!(matches!(
            plan_transition(&j, &JobAction::Cancel { reason: None }, WORKER),
            Err(DispatchError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_client_may_cancel_own_pending_job_only() {
        let j = job(JobStatus::Pending, None);
        let p = plan_transition(&j, &JobAction::Cancel { reason: None }, CLIENT).unwrap();
        assert_eq!(p.to, JobStatus::Cancelled);

        let j = job(JobStatus::Assigned, Some(2));
        assert!(matches!(
            plan_transition(&j, &JobAction::Cancel { reason: None }, CLIENT),
            Err(DispatchError::Forbidden { .. })
        ));

        let mut foreign = job(JobStatus::Pending, None);
        foreign.client_id = Some(99);
        assert!(matches!(
            plan_transition(&foreign, &JobAction::Cancel { reason: None }, CLIENT),
            Err(DispatchError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_completion_payload_is_validated() {
        let j = job(JobStatus::InProgress, Some(2));
        for bad in [payload(-1.0, 0.0), payload(50.0, 60.0), payload(f64::NAN, 0.0)] {
            let err = plan_transition(&j, &JobAction::Complete(bad), WORKER).unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)));
        }
    }

    #[test]
    fn test_commission_rounds_to_cents() {
        assert_eq!(commission_for(199.99, 30.0), 60.0);
        assert_eq!(commission_for(100.0, 12.5), 12.5);
        assert_eq!(commission_for(0.0, 40.0), 0.0);
    }

    #[test]
    fn test_notes_describe_the_action() {
        assert_eq!(
            JobAction::Reject {
                reason: Some("too far".into())
            }
            .note(),
            "Job rejected: too far"
        );
        assert_eq!(JobAction::Assign { worker_id: 5 }.note(), "Assigned to worker 5");
    }
}

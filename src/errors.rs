//! Typed error hierarchy for lockdispatch.
//!
//! `DispatchError` carries the domain failures the API layer needs to map
//! onto HTTP status codes. Storage and I/O plumbing stays on `anyhow`; a
//! `DispatchError` wrapped inside an `anyhow::Error` is recovered with
//! [`DispatchError::find`].

use thiserror::Error;

use crate::dispatch::models::{JobStatus, UserRole};

/// Errors from the dispatch API, lifecycle and storage layers.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("User {id} not found")]
    UserNotFound { id: i64 },

    #[error("Job {id} not found")]
    JobNotFound { id: i64 },

    #[error("Notification {id} not found")]
    NotificationNotFound { id: i64 },

    #[error("Partner cost {id} not found")]
    PartnerCostNotFound { id: i64 },

    #[error("Cannot {action} a job that is {from}")]
    InvalidTransition { from: JobStatus, action: String },

    #[error("User {user_id} is not an active worker")]
    NotAWorker { user_id: i64 },

    #[error("Role {role} may not {action}")]
    Forbidden { role: UserRole, action: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing or expired session")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

}

impl DispatchError {
    pub fn forbidden(role: UserRole, action: impl Into<String>) -> Self {
        Self::Forbidden {
            role,
            action: action.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Find a `DispatchError` anywhere in an anyhow error chain.
    pub fn find(err: &anyhow::Error) -> Option<&DispatchError> {
        err.chain().find_map(|cause| cause.downcast_ref::<DispatchError>())
    }

    /// True for the "does not exist" family of variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound { .. }
                | Self::JobNotFound { .. }
                | Self::NotificationNotFound { .. }
                | Self::PartnerCostNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_job_not_found_carries_id() {
        let err = DispatchError::JobNotFound { id: 42 };
        match &err {
            DispatchError::JobNotFound { id } => assert_eq!(*id, 42),
            _ => panic!("Expected JobNotFound"),
        }
        assert!(err.to_string().contains("42"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_transition_message_names_status() {
        let err = DispatchError::InvalidTransition {
            from: JobStatus::Completed,
            action: "start".into(),
        };
        assert_eq!(err.to_string(), "Cannot start a job that is completed");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_find_recovers_error_through_context() {
        let result: anyhow::Result<()> = Err(DispatchError::UserNotFound { id: 7 })
            .context("Failed to assign job");
        let err = result.unwrap_err();
        assert!(matches!(
            DispatchError::find(&err),
            Some(DispatchError::UserNotFound { id: 7 })
        ));
    }

    #[test]
    fn test_find_returns_none_for_plain_anyhow() {
        let err = anyhow::anyhow!("disk full");
        assert!(DispatchError::find(&err).is_none());
    }

    #[test]
    fn test_forbidden_names_role_and_action() {
        let err = DispatchError::forbidden(UserRole::Client, "assign jobs");
        assert_eq!(err.to_string(), "Role client may not assign jobs");
    }

    #[test]
    fn test_implements_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&DispatchError::LockPoisoned);
    }
}

//! Job state machine
//!
//! Created → Funded → Submitted → Completed, with Created|Funded → Canceled.
//! No other edge exists.

use crate::{
    authorization::Method,
    error::EscrowError,
    models::{JobRecord, JobStatus},
    EscrowResult,
};
use chrono::Utc;
use serde::Serialize;

/// A validated edge of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub method: Method,
    /// `None` before `initialize`
    pub from_state: Option<JobStatus>,
    pub to_state: JobStatus,
}

/// Validates and applies status transitions
pub struct JobStateMachine;

impl JobStateMachine {
    /// Postcondition of a successful call
    pub fn target(method: Method) -> JobStatus {
        match method {
            Method::Initialize => JobStatus::Created,
            Method::Fund => JobStatus::Funded,
            Method::SubmitWork => JobStatus::Submitted,
            Method::ApproveWork => JobStatus::Completed,
            Method::Cancel => JobStatus::Canceled,
        }
    }

    /// Whether `method` is allowed from `current`
    pub fn permits(method: Method, current: Option<JobStatus>) -> bool {
        match (method, current) {
            (Method::Initialize, None) => true,
            (_, None) => false,
            (Method::Initialize, Some(_)) => false,
            (Method::Fund, Some(status)) => status.can_fund(),
            (Method::SubmitWork, Some(status)) => status.can_submit_work(),
            (Method::ApproveWork, Some(status)) => status.can_approve(),
            (Method::Cancel, Some(status)) => status.can_cancel(),
        }
    }

    /// Validate the precondition of `method` without mutating anything
    pub fn check(method: Method, current: Option<JobStatus>) -> EscrowResult<StateTransition> {
        if Self::permits(method, current) {
            return Ok(StateTransition {
                method,
                from_state: current,
                to_state: Self::target(method),
            });
        }

        let current_name = current
            .map(|status| status.to_string())
            .unwrap_or_else(|| "Uninitialized".to_string());
        let reason = match (method, current) {
            (Method::Initialize, Some(_)) => "instance already initialized".to_string(),
            (_, None) => "instance not initialized".to_string(),
            (_, Some(status)) if status.is_terminal() => {
                format!("job is {} and accepts no further calls", status)
            }
            (Method::Cancel, Some(_)) => "only Created or Funded jobs can be canceled".to_string(),
            (_, Some(_)) => format!("{} requires status {}", method, Self::required(method)),
        };

        Err(EscrowError::invalid_state_transition(
            method.name().to_string(),
            current_name,
            reason,
        ))
    }

    /// Check and apply a transition on an initialized record
    pub fn apply(record: &mut JobRecord, method: Method) -> EscrowResult<StateTransition> {
        let transition = Self::check(method, Some(record.status))?;
        record.status = transition.to_state;
        record.updated_at = Utc::now();
        Ok(transition)
    }

    fn required(method: Method) -> &'static str {
        match method {
            Method::Initialize => "none",
            Method::Fund => "Created",
            Method::SubmitWork => "Funded",
            Method::ApproveWork => "Submitted",
            Method::Cancel => "Created or Funded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountId, InstanceId, JobTitle};

    fn record() -> JobRecord {
        JobRecord::new(
            InstanceId(1),
            AccountId::new("PAYER").unwrap(),
            AccountId::new("WORKER").unwrap(),
            1_000_000,
            JobTitle::from_validated("Test Job".to_string()),
        )
    }

    #[test]
    fn test_edge_table_is_exhaustive() {
        let allowed = [
            (Method::Fund, JobStatus::Created),
            (Method::SubmitWork, JobStatus::Funded),
            (Method::ApproveWork, JobStatus::Submitted),
            (Method::Cancel, JobStatus::Created),
            (Method::Cancel, JobStatus::Funded),
        ];

        for method in Method::ALL {
            assert_eq!(
                JobStateMachine::permits(method, None),
                method == Method::Initialize
            );
            for status in JobStatus::ALL {
                assert_eq!(
                    JobStateMachine::permits(method, Some(status)),
                    allowed.contains(&(method, status)),
                    "{} from {}",
                    method,
                    status
                );
            }
        }
    }

    #[test]
    fn test_happy_path_walks_all_states() {
        let mut job = record();
        assert_eq!(job.status, JobStatus::Created);

        let t = JobStateMachine::apply(&mut job, Method::Fund).unwrap();
        assert_eq!(t.from_state, Some(JobStatus::Created));
        assert_eq!(job.status, JobStatus::Funded);

        JobStateMachine::apply(&mut job, Method::SubmitWork).unwrap();
        assert_eq!(job.status, JobStatus::Submitted);

        JobStateMachine::apply(&mut job, Method::ApproveWork).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_rejected_transition_leaves_record_unchanged() {
        let mut job = record();
        let before = job.clone();

        let first = JobStateMachine::apply(&mut job, Method::ApproveWork).unwrap_err();
        let second = JobStateMachine::apply(&mut job, Method::ApproveWork).unwrap_err();

        assert!(matches!(first, EscrowError::InvalidStateTransition { .. }));
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(job, before);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let mut job = record();
        JobStateMachine::apply(&mut job, Method::Cancel).unwrap();
        assert_eq!(job.status, JobStatus::Canceled);

        for method in Method::ALL {
            assert!(JobStateMachine::check(method, Some(job.status)).is_err());
        }
    }

    #[test]
    fn test_initialize_only_once() {
        assert!(JobStateMachine::check(Method::Initialize, None).is_ok());
        let err = JobStateMachine::check(Method::Initialize, Some(JobStatus::Created)).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }
}

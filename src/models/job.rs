use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::report::RiskSummary;

/// Lifecycle state of a scan job.
///
/// Legal transitions: pending -> running, pending -> failed,
/// running -> completed, running -> failed. Completed and failed are
/// terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

/// Reason code recorded when a job enters the failed state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    /// The external scanner rejected or never acknowledged the start call.
    StartFailed,
    /// The external scanner itself reported the scan as failed.
    ScanFailed,
    /// The job exceeded its maximum lifetime.
    Timeout,
    /// Result storage exhausted its retry budget.
    PersistFailed,
    /// A caller requested cancellation.
    Cancelled,
}

/// A scan job tracked end-to-end by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub url: String,
    pub scan_type: String,
    pub requester: String,
    pub state: JobState,
    /// Handle issued by the external scanner; set by the transition into
    /// running, needed for crash recovery and cancellation.
    pub external_ref: Option<String>,
    /// Object key of the stored report; set only with the transition into
    /// completed.
    pub result_key: Option<String>,
    pub result_summary: Option<RiskSummary>,
    pub error_code: Option<FailureReason>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new job row. The id is assigned by the ledger on reserve.
#[derive(Debug, Clone)]
pub struct NewScanJob {
    pub url: String,
    pub scan_type: String,
    pub requester: String,
}

/// A state transition together with the payload that transition is allowed
/// to write. The target state is implied, so result and error can never be
/// set by the wrong transition.
#[derive(Debug, Clone)]
pub enum JobTransition {
    Started {
        external_ref: String,
    },
    Completed {
        result_key: String,
        summary: RiskSummary,
    },
    Failed {
        code: FailureReason,
        message: String,
    },
}

impl JobTransition {
    pub fn target_state(&self) -> JobState {
        match self {
            JobTransition::Started { .. } => JobState::Running,
            JobTransition::Completed { .. } => JobState::Completed,
            JobTransition::Failed { .. } => JobState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [JobState::Completed, JobState::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                JobState::Pending,
                JobState::Running,
                JobState::Completed,
                JobState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
    }

    #[test]
    fn state_round_trips_through_column_text() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
        ] {
            let text = state.to_string();
            assert_eq!(JobState::from_str(&text).unwrap(), state);
        }
        assert_eq!(JobState::Running.to_string(), "running");
        assert!(JobState::from_str("exploded").is_err());
    }

    #[test]
    fn failure_reason_codes_are_snake_case() {
        assert_eq!(FailureReason::StartFailed.to_string(), "start_failed");
        assert_eq!(FailureReason::PersistFailed.to_string(), "persist_failed");
        assert_eq!(
            FailureReason::from_str("cancelled").unwrap(),
            FailureReason::Cancelled
        );
    }

    #[test]
    fn transition_implies_target_state() {
        let started = JobTransition::Started {
            external_ref: "ext-1".into(),
        };
        assert_eq!(started.target_state(), JobState::Running);

        let failed = JobTransition::Failed {
            code: FailureReason::Timeout,
            message: "exceeded maximum lifetime".into(),
        };
        assert_eq!(failed.target_state(), JobState::Failed);
    }
}

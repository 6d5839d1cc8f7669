//! Job state machine
//!
//! Pure decision logic: given where a job is and what the connector
//! reported, decide where it goes next and which side effect the loop must
//! perform. No I/O here; the loop in `manager` executes the decisions.

use helix_connector::BackendStatus;
use helix_core::JobStatus;

/// The connector operation a job in a given state requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// New job: claim it and stage its environment.
    Stage,
    /// Staged (or mid-staging) job: prepare is re-run idempotently, then
    /// the pipeline is submitted.
    Submit,
    /// Submitted or running job: query the backend scheduler.
    Poll,
    /// Terminal job: nothing to do.
    Done,
}

pub fn required_step(status: JobStatus) -> Step {
    match status {
        JobStatus::New => Step::Stage,
        JobStatus::Staging => Step::Submit,
        JobStatus::Submitted | JobStatus::Running => Step::Poll,
        JobStatus::Finished | JobStatus::Failed | JobStatus::Errored => Step::Done,
    }
}

/// Decision for a successful status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Backend is still working and we already knew; keep state. Carries
    /// whether a stale retry counter should be cleared (the Unknown
    /// tolerance counts *consecutive* occurrences).
    Hold { clear_retries: bool },
    /// Submitted -> Running edge: fires the Started notification, once.
    Start,
    /// Backend finished successfully: retrieve results, then Finished.
    Complete,
    /// Backend reports failure: Failed, notify.
    Fail,
    /// Backend does not recognize the id; tolerated, bump the counter.
    RetryUnknown,
    /// Unknown beyond tolerance: Errored, notify failure.
    Escalate,
}

pub fn on_poll(
    current: JobStatus,
    backend: BackendStatus,
    retry_count: i32,
    max_retries: i32,
) -> PollDecision {
    match backend {
        BackendStatus::Completed => PollDecision::Complete,
        BackendStatus::Failed => PollDecision::Fail,
        BackendStatus::Pending | BackendStatus::Running => {
            if current == JobStatus::Submitted {
                PollDecision::Start
            } else {
                PollDecision::Hold {
                    clear_retries: retry_count > 0,
                }
            }
        }
        BackendStatus::Unknown => {
            if retry_count + 1 >= max_retries {
                PollDecision::Escalate
            } else {
                PollDecision::RetryUnknown
            }
        }
    }
}

/// Decision for a failed connector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Hold state, record the error, try again next cycle.
    Retry,
    /// Give up on the job: Errored, notify failure.
    Escalate,
}

pub fn on_connector_failure(
    recoverable: bool,
    retry_count: i32,
    max_retries: i32,
) -> FailureDecision {
    if !recoverable || retry_count + 1 >= max_retries {
        FailureDecision::Escalate
    } else {
        FailureDecision::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: i32 = 3;

    #[test]
    fn test_required_steps() {
        assert_eq!(required_step(JobStatus::New), Step::Stage);
        assert_eq!(required_step(JobStatus::Staging), Step::Submit);
        assert_eq!(required_step(JobStatus::Submitted), Step::Poll);
        assert_eq!(required_step(JobStatus::Running), Step::Poll);
        assert_eq!(required_step(JobStatus::Finished), Step::Done);
        assert_eq!(required_step(JobStatus::Failed), Step::Done);
        assert_eq!(required_step(JobStatus::Errored), Step::Done);
    }

    #[test]
    fn test_started_fires_only_on_the_edge() {
        // First sighting of backend activity moves Submitted to Running.
        assert_eq!(
            on_poll(JobStatus::Submitted, BackendStatus::Pending, 0, MAX),
            PollDecision::Start
        );
        assert_eq!(
            on_poll(JobStatus::Submitted, BackendStatus::Running, 0, MAX),
            PollDecision::Start
        );
        // While already Running, further activity is a no-op.
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Running, 0, MAX),
            PollDecision::Hold { clear_retries: false }
        );
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Pending, 0, MAX),
            PollDecision::Hold { clear_retries: false }
        );
    }

    #[test]
    fn test_completion_and_failure_from_either_state() {
        for current in [JobStatus::Submitted, JobStatus::Running] {
            assert_eq!(
                on_poll(current, BackendStatus::Completed, 0, MAX),
                PollDecision::Complete
            );
            assert_eq!(
                on_poll(current, BackendStatus::Failed, 0, MAX),
                PollDecision::Fail
            );
        }
    }

    #[test]
    fn test_unknown_is_tolerated_below_threshold() {
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Unknown, 0, MAX),
            PollDecision::RetryUnknown
        );
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Unknown, 1, MAX),
            PollDecision::RetryUnknown
        );
        // The poll that reaches the threshold escalates, exactly once.
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Unknown, 2, MAX),
            PollDecision::Escalate
        );
    }

    #[test]
    fn test_successful_poll_clears_consecutive_unknown_count() {
        assert_eq!(
            on_poll(JobStatus::Running, BackendStatus::Running, 2, MAX),
            PollDecision::Hold { clear_retries: true }
        );
    }

    #[test]
    fn test_connector_failures_retry_then_escalate() {
        assert_eq!(on_connector_failure(true, 0, MAX), FailureDecision::Retry);
        assert_eq!(on_connector_failure(true, 1, MAX), FailureDecision::Retry);
        assert_eq!(on_connector_failure(true, 2, MAX), FailureDecision::Escalate);
    }

    #[test]
    fn test_unrecoverable_failure_escalates_immediately() {
        assert_eq!(on_connector_failure(false, 0, MAX), FailureDecision::Escalate);
    }
}

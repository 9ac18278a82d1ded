//! The record of one pipeline run

use chrono::{DateTime, Utc};
use kiln_core::{BuildOutcome, ChangeRequest, ChangeSet, FixAttempt, KilnError};
use kiln_project::ApplyReport;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AutomationError;
use crate::state_machine::State;

/// Bounded count of build attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }

    /// Take one attempt from the budget, returning its 1-based number.
    /// `None` once exhausted; the counter never goes past `max`.
    pub fn consume(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }
}

/// One clean + build attempt and the repairs that followed it
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    pub attempt: u32,
    pub outcome: Option<BuildOutcome>,
    /// Set when clean or build errored instead of producing an outcome
    pub error: Option<String>,
    pub fixes: Vec<FixAttempt>,
}

impl BuildAttempt {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            outcome: None,
            error: None,
            fixes: Vec::new(),
        }
    }
}

/// Result of the optional test stage
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TestStatus {
    #[default]
    Skipped,
    Passed,
    Failed,
    Errored(String),
}

/// Per-call options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    /// Overrides the configured test policy
    pub run_tests: Option<bool>,
    /// Overrides the configured retry ceiling
    pub max_attempts: Option<u32>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tests(mut self, run_tests: bool) -> Self {
        self.run_tests = Some(run_tests);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Full audit trail of one `process_request` invocation
#[derive(Debug)]
pub struct PipelineRun {
    pub id: Uuid,
    pub request: ChangeRequest,
    pub budget: RetryBudget,
    pub change_set: Option<ChangeSet>,
    pub apply_report: Option<ApplyReport>,
    pub attempts: Vec<BuildAttempt>,
    pub tests: TestStatus,
    pub state: State,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cause kept for the terminal error
    pub(crate) failure: Option<KilnError>,
}

impl PipelineRun {
    pub fn new(request: ChangeRequest, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            budget: RetryBudget::new(max_attempts),
            change_set: None,
            apply_report: None,
            attempts: Vec::new(),
            tests: TestStatus::Skipped,
            state: State::Idle,
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        }
    }

    /// Build outcomes in attempt order
    pub fn history(&self) -> impl Iterator<Item = &BuildOutcome> {
        self.attempts.iter().filter_map(|a| a.outcome.as_ref())
    }

    pub fn last_outcome(&self) -> Option<&BuildOutcome> {
        self.attempts.iter().rev().find_map(|a| a.outcome.as_ref())
    }

    pub fn current_attempt_mut(&mut self) -> Option<&mut BuildAttempt> {
        self.attempts.last_mut()
    }

    pub fn fixes(&self) -> impl Iterator<Item = &FixAttempt> {
        self.attempts.iter().flat_map(|a| a.fixes.iter())
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done { .. })
    }

    /// Advisory test failure, if the test stage did not pass
    pub fn test_failure(&self) -> Option<AutomationError> {
        match &self.tests {
            TestStatus::Failed => Some(AutomationError::TestFailed(
                "test command reported failures".to_string(),
            )),
            TestStatus::Errored(message) => Some(AutomationError::TestFailed(message.clone())),
            _ => None,
        }
    }

    /// One-line description of how the run ended
    pub fn summary(&self) -> String {
        let base = match &self.state {
            State::Done { .. } => format!("done after {} build(s)", self.budget.used()),
            State::BuildFailed { attempts } => {
                let errors = self.last_outcome().map(|o| o.error_count()).unwrap_or(0);
                format!("build failed after {} attempt(s), {} error(s)", attempts, errors)
            }
            State::PlanningFailed { error } => format!("planning failed: {}", error),
            State::ApplyFailed { error } => format!("apply failed: {}", error),
            State::Cancelled { stage } => format!("cancelled during {}", stage),
            State::Aborted { error } => format!("aborted: {}", error),
            other => format!("in progress ({})", other.name()),
        };
        match &self.tests {
            TestStatus::Passed => format!("{}, tests passed", base),
            TestStatus::Failed => format!("{}, tests failed", base),
            TestStatus::Errored(_) => format!("{}, tests errored", base),
            TestStatus::Skipped => base,
        }
    }

    /// Map the terminal state to the caller-facing result
    pub fn into_result(self) -> Result<(), AutomationError> {
        let last_outcome = self.last_outcome().cloned().map(Box::new);
        let used = self.budget.used();
        let PipelineRun { state, failure, .. } = self;

        match state {
            State::Done { .. } => Ok(()),
            State::BuildFailed { attempts } => Err(AutomationError::BuildFailed {
                attempts,
                last_outcome,
            }),
            State::PlanningFailed { error } => Err(AutomationError::PlanningFailed {
                source: failure.unwrap_or(KilnError::Planner(error)),
            }),
            State::ApplyFailed { error } => Err(AutomationError::ApplyFailed {
                message: error,
                source: failure,
            }),
            State::Cancelled { stage } => Err(AutomationError::Cancelled {
                stage: stage.to_string(),
            }),
            State::Aborted { error } => Err(AutomationError::Attempt {
                attempt: used,
                source: failure.unwrap_or(KilnError::Other(error)),
            }),
            other => Err(AutomationError::InvalidArgument(format!(
                "run ended in non-terminal state {}",
                other.name()
            ))),
        }
    }
}

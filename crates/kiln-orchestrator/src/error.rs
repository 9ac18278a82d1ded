//! Run-level error taxonomy

use kiln_core::{BuildOutcome, KilnError};
use thiserror::Error;

/// Why a pipeline run did not finish in `Done`
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Another run holds the project")]
    Busy,

    #[error("Planning failed: {source}")]
    PlanningFailed {
        #[source]
        source: KilnError,
    },

    #[error("Applying changes failed: {message}")]
    ApplyFailed {
        message: String,
        #[source]
        source: Option<KilnError>,
    },

    #[error("Build still failing after {attempts} attempt(s)")]
    BuildFailed {
        attempts: u32,
        last_outcome: Option<Box<BuildOutcome>>,
    },

    /// Advisory only; recorded on the run, never returned from it
    #[error("Tests failed: {0}")]
    TestFailed(String),

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("Build attempt {attempt} failed: {source}")]
    Attempt {
        attempt: u32,
        #[source]
        source: KilnError,
    },
}

impl AutomationError {
    /// Short stable name, used in progress events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Busy => "busy",
            Self::PlanningFailed { .. } => "planning_failed",
            Self::ApplyFailed { .. } => "apply_failed",
            Self::BuildFailed { .. } => "build_failed",
            Self::TestFailed(_) => "test_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Attempt { .. } => "attempt",
        }
    }
}

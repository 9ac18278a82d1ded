//! # kiln-orchestrator
//!
//! The build-repair pipeline:
//!
//! ```text
//! Planning -> Applying -> Building -> (Repairing -> Building)* -> Testing? -> Done
//! ```
//!
//! - Planning and applying failures are fatal, with no retry
//! - A failed build is diagnosed and fixed one diagnostic at a time, bounded by the
//!   retry budget
//! - Tests are advisory and never re-enter the repair loop
//! - One run at a time per project, enforced by the single-writer affinity token
//! - Cancellation is honored before every collaborator call

mod activity_logger;
mod error;
mod orchestrator;
mod progress;
mod run;
mod state_machine;

pub use activity_logger::ActivityLogger;
pub use error::AutomationError;
pub use orchestrator::{direct_response, Orchestrator, FALLBACK_RESPONSE};
pub use progress::{
    ChannelObserver, ObserverRegistry, ProgressEvent, ProgressObserver, SubscriptionId,
    TracingObserver,
};
pub use run::{BuildAttempt, PipelineRun, RetryBudget, RunOptions, TestStatus};
pub use state_machine::{transition, Action, Event, State};

pub use tokio_util::sync::CancellationToken;

//! # kiln-project
//!
//! Everything that touches the project on disk:
//!
//! - [`AffinityToken`]: the single-writer token every mutation must hold
//! - [`ProjectTree`]: the host project model (current project, folders, references)
//! - [`ProjectMutator`]: applies change-sets and reports per-item results
//! - [`BuildDriver`]: clean/build/test with structured diagnostics

mod affinity;
mod build;
mod diagnostics;
mod mutator;
mod tree;

pub use affinity::{AffinityGuard, AffinityToken};
pub use build::{BuildDriver, CommandBuildDriver};
pub use diagnostics::parse_diagnostics;
pub use mutator::{
    validate_path, ApplyReport, ItemAction, ItemOutcome, ProjectMutator, WorkspaceMutator,
};
pub use tree::{CargoProjectTree, ProjectTree};

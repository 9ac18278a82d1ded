//! # kiln-core
//!
//! Core types for the Kiln build-repair pipeline.
//!
//! Kiln takes a natural-language change request, asks a planner for a structured
//! change-set, applies it to a project, builds, and feeds build diagnostics back to
//! the planner until the build passes or the retry budget runs out.
//!
//! This crate holds the vocabulary shared by every other Kiln crate:
//!
//! - Change-sets and their items (creations, modifications, reference additions)
//! - Build outcomes and diagnostics
//! - Repository configuration (`.kiln/config.toml`)
//! - The collaborator-level error type

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    BuildCommands, BuildConfig, ConcurrencyPolicy, KilnConfig, Language, ModelConfig,
    ModificationMode, PipelineConfig, ProjectConfig,
};
pub use error::{KilnError, Result};
pub use types::*;

//! Unified error type for Kiln collaborators

use thiserror::Error;

/// Error raised by planners, mutators, build drivers and project trees
#[derive(Error, Debug)]
pub enum KilnError {
    // Project mutation errors
    #[error("Invalid path: {0}")]
    PathValidation(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("No project could be resolved: {0}")]
    ProjectNotFound(String),

    #[error("Project tree error: {0}")]
    Project(String),

    // Build errors
    #[error("Build driver error: {0}")]
    Build(String),

    // Planner / model errors
    #[error("Planner error: {0}")]
    Planner(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;

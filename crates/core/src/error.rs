//! Error types for Baseliner core

use thiserror::Error;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration-class failures raised while resolving baselines and templates.
///
/// None of these are ever turned into a diff: a malformed baseline must not pass.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown comparator type: {0}")]
    UnknownComparator(String),

    #[error("Invalid comparison directive: {0}")]
    InvalidDirective(String),

    #[error("Self comparator requires a template context")]
    MissingContext,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Test name `{0}` collides with a reserved or global context key")]
    ReservedName(String),

    #[error("Duplicate test name: {0}")]
    DuplicateTest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

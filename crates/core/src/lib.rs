//! Baseliner Core Library
//!
//! I/O-free building blocks for HTTP snapshot regression:
//! - `types`: tests, baselines, run results and diff records
//! - `compare`: `_t`-tagged comparison directives
//! - `diff`: structural tree diff producing path-addressed records
//! - `context`: the run-scoped template store threaded between tests

pub mod compare;
pub mod context;
pub mod diff;
pub mod error;
pub mod types;

pub use compare::{
    hash_placeholder, validate_directives, values_equal, Comparator, DirectiveKind, TYPE_FIELD,
};
pub use context::{ContextEntry, ContextStore, RUN_KEY};
pub use diff::{compare, StructuralDiff};
pub use error::{Error, Result};
pub use types::*;

/// Baseliner version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Errors surfaced by the public API.
//!
//! Only precondition violations get their own variants. Everything the engine reports about the
//! managed hosts (unreachable hosts, failed tasks) is returned as data in a
//! [RunSummary](crate::summary::RunSummary) instead.

use thiserror::Error;

/// Shorthand for results returned by this crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A playbook (or other required file) does not exist.
    #[error("file not found: {name}")]
    FileNotFound { name: String },

    /// An option was given a value of the wrong type.
    ///
    /// `name` is the type that was received and `param` the option that rejected it.
    #[error("invalid type {name} for parameter {param}")]
    InvalidParameter { name: String, param: String },

    /// The engine could not be launched, or it produced output that could not be understood.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

//! Provides the error type used throughout this crate.

use thiserror::Error;

/// The error type used throughout this crate.
#[derive(Error, Debug)]
pub enum ReachError {
    /// Invalid study parameters. Raised before any work begins.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// `optimize` or neighbor statistics requested on a database without records.
    #[error("Reach database contains no records")]
    EmptyDatabase,
    /// An IK solver or evaluator failed. Recovered at the worker boundary.
    #[error("Plugin failure: {0}")]
    Plugin(String),
    /// A pose handed to an evaluator does not cover the joints it requires.
    #[error("Pose is missing required joint '{0}'")]
    InvalidPose(String),
    /// The database file could not be decoded or fails the schema checks.
    #[error("Corrupt reach database: {0}")]
    CorruptDatabase(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A record id that is not present in the database.
    #[error("Unknown record: {0}")]
    UnknownRecord(String),
    // Internal errors
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

//! Error types for lowq.

use thiserror::Error;

use crate::model::WorkerState;

#[derive(Debug, Error)]
pub enum Error {
    /// The encoded payload is already in the backlog.
    #[error("duplicate work item")]
    DuplicateWork,

    /// Another worker holds the status marker.
    #[error("another worker is already active")]
    AlreadyActive,

    /// The store stayed busy or locked through every retry attempt.
    #[error("storage busy after {attempts} attempts: {source}")]
    Busy {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// A uniqueness constraint rejected a write. Mapped by the storage
    /// layer to `DuplicateWork` or `AlreadyActive`.
    #[error("constraint violation: {0}")]
    Constraint(#[source] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid worker transition: {from} -> {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

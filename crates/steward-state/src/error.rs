//! Error types for the Steward state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures reported by the state store.
///
/// A missing record is never an error: lookups return `Option` and scans
/// return an empty `Vec`.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state store: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode record: {0}")]
    Deserialize(String),

    /// The backend refused the call outright.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

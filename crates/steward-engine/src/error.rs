//! Engine error types.

use thiserror::Error;

use steward_state::StateError;

/// Errors that end an analysis or dispatch cycle.
///
/// Per-action outcomes (verification failure, expiry) are not errors; they
/// are counted in the cycle reports.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: StateError,
    },

    #[error("{what} state is stale (last refreshed at {refreshed_at}, now {now})")]
    Stale {
        what: &'static str,
        refreshed_at: u64,
        now: u64,
    },

    #[error("failed to persist {what}: {source}")]
    Persist {
        what: &'static str,
        #[source]
        source: StateError,
    },

    #[error("{failed} of {attempted} sends failed")]
    SendFailed { failed: usize, attempted: usize },
}

impl EngineError {
    pub(crate) fn read(what: &'static str) -> impl FnOnce(StateError) -> Self {
        move |source| Self::Read { what, source }
    }

    pub(crate) fn persist(what: &'static str) -> impl FnOnce(StateError) -> Self {
        move |source| Self::Persist { what, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

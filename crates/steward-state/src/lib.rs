//! steward-state — state store for the Steward convergence engine.
//!
//! Backed by [redb](https://docs.rs/redb), holds the cached desired state,
//! the heartbeat-derived actual state, crash counters, pending start/stop
//! actions and per-reason counters.
//!
//! # Architecture
//!
//! All record types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{app_id},{app_version},{index}`) keep every record of an
//! app adjacent. The engine talks to the store through the [`Store`] trait so
//! cycles can be exercised against failing doubles; [`StateStore`] is the
//! production implementation and is `Clone` + `Send` + `Sync`.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, Store};
pub use types::*;

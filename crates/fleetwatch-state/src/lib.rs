//! fleetwatch-state — persisted decision-engine state, one record per group.
//!
//! Backed by [redb](https://docs.rs/redb). Each group's `EngineState` is
//! wrapped in a versioned `StoredState` envelope and JSON-serialized into a
//! single `&[u8]` value keyed by the group name.
//!
//! The store never interprets the state it moves: it loads it at the start
//! of an invocation and overwrites it at the end. A missing, unreadable, or
//! foreign-version record loads as a fresh `EngineState`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

//! fleetwatchd — wiring for the fleetwatch daemon.
//!
//! - `config`: the `fleetwatch.toml` file format
//! - `fixture`: a JSON-file group simulator implementing both collaborator seams
//! - `app`: builds a `Controller` from a loaded config

pub mod app;
pub mod config;
pub mod fixture;

pub use app::{build_controller, open_store};
pub use config::{BackendConfig, DaemonConfig};
pub use fixture::FixtureBackend;

//! fleetwatch-engine — CPU-driven scaling decisions for one instance group.
//!
//! Each invocation takes a `GroupSnapshot` from the control plane, fans out
//! to the `SampleSource` for per-instance utilization, runs the decision
//! pipeline against the group's persisted `EngineState`, applies at most
//! one termination and one capacity change, then persists the new state.
//!
//! # Decision pipeline
//!
//! ```text
//! no measured samples           → NoData   (counters reset)
//! instance far below average    → TooLow   (terminate, maybe shrink)
//! instance far above average    → TooHigh  (terminate and maybe shrink,
//!   or a single urgent instance              or grow by one)
//! avg above high limit N times  → ScaleUp  (desired + 1)
//! projected avg below low limit → ScaleDown (desired - 1)
//! otherwise                     → Steady
//! ```
//!
//! Hysteresis counters make the normal checks wait for
//! `{low,high}_counter_limit + 1` consecutive observations and reset on
//! the first evaluation that does not observe the condition.

pub mod config;
pub mod controller;
pub mod decision;
pub mod executor;
pub mod group;
pub mod sampling;

pub use config::{ConfigError, EngineConfig, SamplingConfig};
pub use controller::{Controller, RunSummary};
pub use decision::{evaluate, CapacityChange, Decision, Outcome};
pub use executor::{Command, CommandResult, CommandStatus, ExecutionReport, Executor};
pub use group::{ControlPlane, ControlPlaneError, GroupSnapshot};
pub use sampling::{collect_samples, Sample, SampleSet, SampleSource};

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

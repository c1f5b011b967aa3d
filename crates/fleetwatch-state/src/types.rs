//! Persisted types for the fleetwatch state store.
//!
//! `EngineState` is plain data: it holds only what the decision engine
//! needs to carry from one invocation to the next. Live collaborator
//! handles never appear here.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Name of a managed instance group.
pub type GroupName = String;

/// Identifier of a compute instance within a group.
pub type InstanceId = String;

/// Current version of the `StoredState` envelope.
pub const STATE_VERSION: u32 = 1;

// ── Engine state ──────────────────────────────────────────────────

/// Mutable decision-engine state for one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineState {
    /// Consecutive evaluations that observed a low average.
    pub low_counter: u32,
    /// Consecutive evaluations that observed a high average.
    pub high_counter: u32,
    /// Action log of the latest run, joined. Empty if nothing fired.
    pub last_action: String,
    /// Unix timestamp (seconds) of the last executed command, 0 if never.
    pub last_action_ts: u64,
    /// Capacity requested by the last executed capacity command.
    pub last_desired: Option<u32>,
    /// Highest per-instance load seen on the latest run.
    pub last_max_load: f64,
    /// Instance that carried `last_max_load`.
    pub last_max_loaded: Option<InstanceId>,
    /// Unix timestamp (seconds) of the latest run.
    pub last_run_ts: u64,
    /// Oldest-first load history, bounded by the configured history size.
    pub history: VecDeque<HistoryEntry>,
}

/// One row of the per-run load history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Unix timestamp (seconds) of the run.
    pub ts: u64,
    pub instance_count: u32,
    /// Sum of measured loads, rounded to whole percent.
    pub total_load: u32,
    /// Average of measured loads, rounded to whole percent.
    pub avg_load: u32,
}

impl EngineState {
    /// Append a history row, evicting the oldest rows beyond `capacity`.
    ///
    /// A capacity of 0 disables history and drops anything retained.
    pub fn push_history(&mut self, entry: HistoryEntry, capacity: usize) {
        if capacity == 0 {
            self.history.clear();
            return;
        }
        self.history.push_back(entry);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

// ── Stored envelope ───────────────────────────────────────────────

/// Versioned on-disk record wrapping an `EngineState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredState {
    pub version: u32,
    pub state: EngineState,
}

impl StoredState {
    pub fn current(state: EngineState) -> Self {
        Self {
            version: STATE_VERSION,
            state,
        }
    }
}

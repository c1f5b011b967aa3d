//! Decision engine — turns one run's samples into at most one termination
//! and at most one capacity change.
//!
//! `evaluate` is synchronous and pure apart from the `EngineState` it
//! mutates. Stages run in a fixed order and the first one that fires ends
//! the evaluation; `Outcome` names which stage that was.

use fleetwatch_state::{EngineState, InstanceId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::group::GroupSnapshot;
use crate::sampling::SampleSet;

/// Loads below this fraction of the average are outliers.
const LOW_OUTLIER_RATIO: f64 = 0.2;
/// Outliers must also sit below this absolute load (percent).
const LOW_OUTLIER_CEILING: f64 = 4.0;
/// Loads above this multiple of the average are outliers.
const HIGH_OUTLIER_RATIO: f64 = 1.4;
/// Low threshold multiplier for groups of fewer than three instances.
const SMALL_GROUP_LOW_FACTOR: f64 = 0.95;
/// High threshold multiplier for a lone instance.
const SINGLE_INSTANCE_HIGH_FACTOR: f64 = 0.90;

/// Which pipeline stage ended the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No instance reported data; nothing evaluated.
    NoData,
    /// An instance idles while its peers work.
    TooLow,
    /// An instance runs far hotter than its peers, or above the urgent limit.
    TooHigh,
    ScaleUp,
    ScaleDown,
    Steady,
}

/// Requested move of the group's desired capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityChange {
    pub from: u32,
    pub to: u32,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub terminate: Option<InstanceId>,
    pub capacity: Option<CapacityChange>,
    /// Human-readable reasons, in the order they were produced.
    pub log: Vec<String>,
}

impl Decision {
    fn new() -> Self {
        Self {
            outcome: Outcome::Steady,
            terminate: None,
            capacity: None,
            log: Vec::new(),
        }
    }

    /// Whether the decision carries any command.
    pub fn has_action(&self) -> bool {
        self.terminate.is_some() || self.capacity.is_some()
    }
}

/// Run the decision pipeline for one invocation.
pub fn evaluate(
    config: &EngineConfig,
    snapshot: &GroupSnapshot,
    samples: &SampleSet,
    state: &mut EngineState,
) -> Decision {
    let mut eval = Evaluation {
        config,
        snapshot,
        samples,
        avg_load: samples.avg_load(),
        total_load: samples.total_load(),
        state: &mut *state,
        decision: Decision::new(),
    };

    let outcome = if samples.measured_count() == 0 {
        eval.state.low_counter = 0;
        eval.state.high_counter = 0;
        Outcome::NoData
    } else if eval.check_too_low() {
        Outcome::TooLow
    } else if eval.check_too_high() {
        Outcome::TooHigh
    } else if eval.check_avg_high() {
        Outcome::ScaleUp
    } else if eval.check_avg_low() {
        Outcome::ScaleDown
    } else {
        Outcome::Steady
    };

    let mut decision = eval.decision;
    decision.outcome = outcome;
    debug!(
        group = %snapshot.name,
        ?outcome,
        avg_load = samples.avg_load(),
        low_counter = state.low_counter,
        high_counter = state.high_counter,
        "evaluation finished"
    );
    decision
}

struct Evaluation<'a> {
    config: &'a EngineConfig,
    snapshot: &'a GroupSnapshot,
    samples: &'a SampleSet,
    avg_load: f64,
    total_load: f64,
    state: &'a mut EngineState,
    decision: Decision,
}

impl Evaluation<'_> {
    /// Samples backed by more than one data point. Single-point readings are
    /// too noisy to call an instance an outlier.
    fn settled(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.samples
            .iter()
            .filter(|(_, s)| s.count > 1)
            .map(|(id, s)| (id, s.value))
    }

    fn check_too_low(&mut self) -> bool {
        if self.snapshot.instance_count <= 1 {
            return false;
        }
        let outlier = self
            .settled()
            .find(|&(_, load)| load < self.avg_load * LOW_OUTLIER_RATIO && load < LOW_OUTLIER_CEILING)
            .map(|(id, load)| (id.to_string(), load));

        let Some((instance, load)) = outlier else {
            return false;
        };

        // The idle instance may also mean the group is oversized.
        self.check_avg_low();
        self.terminate(
            instance,
            format!("terminate instance with abnormally low load ({load:5.2}%)"),
        );
        true
    }

    fn check_too_high(&mut self) -> bool {
        let count = self.snapshot.instance_count;
        let mut fired = None;
        for (id, load) in self.settled() {
            if count > 2 && load > self.avg_load * HIGH_OUTLIER_RATIO {
                fired = Some((id.to_string(), load, true));
                break;
            }
            if load > self.config.high_urgent {
                fired = Some((id.to_string(), load, false));
                break;
            }
        }

        let Some((instance, load, runaway)) = fired else {
            return false;
        };

        let desired = self.snapshot.desired_capacity;
        if runaway {
            self.terminate(
                instance,
                format!("terminate instance with abnormally high load ({load:5.2}%)"),
            );
            // Below the high limit the remaining members can absorb the load.
            if self.avg_load < self.config.high_limit {
                self.request_capacity(
                    desired.checked_sub(1),
                    format!("remove runaway instance capacity: {desired} -> {}", desired.saturating_sub(1)),
                );
            }
        } else {
            self.request_capacity(
                desired.checked_add(1),
                format!(
                    "urgent load on one instance ({instance} {load:5.2}%): {desired} -> {}",
                    desired.saturating_add(1)
                ),
            );
        }
        true
    }

    fn check_avg_high(&mut self) -> bool {
        let count = self.snapshot.instance_count;
        if count >= self.snapshot.max_size {
            self.state.high_counter = 0;
            return false;
        }

        let mut threshold = self.config.high_limit;
        if count == 1 {
            threshold *= SINGLE_INSTANCE_HIGH_FACTOR;
        }

        if self.avg_load <= threshold {
            self.state.high_counter = 0;
            return false;
        }

        self.state.high_counter += 1;
        if self.state.high_counter <= self.config.high_counter_limit {
            debug!(
                group = %self.snapshot.name,
                high_counter = self.state.high_counter,
                avg_load = self.avg_load,
                threshold,
                "high load observed"
            );
            return false;
        }

        self.state.high_counter = 0;
        let desired = self.snapshot.desired_capacity;
        // Fired even if the request is dropped: the shrink check must not run.
        self.request_capacity(
            desired.checked_add(1),
            format!(
                "high load ({:5.2}/{threshold:5.2}): {desired} -> {}",
                self.avg_load,
                desired.saturating_add(1)
            ),
        );
        true
    }

    fn check_avg_low(&mut self) -> bool {
        let count = self.snapshot.instance_count;
        // A lone instance has nowhere to shed its load to.
        if count <= self.snapshot.min_size || count <= 1 {
            self.state.low_counter = 0;
            return false;
        }

        let mut threshold = self.config.low_limit;
        if count < 3 {
            threshold *= SMALL_GROUP_LOW_FACTOR;
        }

        let projected = self.total_load / f64::from(count - 1);
        if projected >= threshold {
            self.state.low_counter = 0;
            return false;
        }

        self.state.low_counter += 1;
        if self.state.low_counter <= self.config.low_counter_limit {
            debug!(
                group = %self.snapshot.name,
                low_counter = self.state.low_counter,
                projected,
                threshold,
                "low load observed"
            );
            return false;
        }

        self.state.low_counter = 0;
        let desired = self.snapshot.desired_capacity;
        self.request_capacity(
            desired.checked_sub(1),
            format!(
                "low load ({:5.2}/{threshold:5.2}): {desired} -> {}",
                self.avg_load,
                desired.saturating_sub(1)
            ),
        )
    }

    fn terminate(&mut self, instance: InstanceId, reason: String) {
        info!(
            group = %self.snapshot.name,
            instance = %instance,
            instances = self.snapshot.instance_count,
            %reason,
            "terminate decided"
        );
        self.decision.log.push(format!("{reason} [{instance}]"));
        self.decision.terminate = Some(instance);
    }

    /// Record a capacity request if it stays inside the group's band.
    fn request_capacity(&mut self, target: Option<u32>, reason: String) -> bool {
        let from = self.snapshot.desired_capacity;
        let Some(to) = target.filter(|&to| self.snapshot.in_band(to)) else {
            warn!(
                group = %self.snapshot.name,
                from,
                min = self.snapshot.min_size,
                max = self.snapshot.max_size,
                %reason,
                "capacity request outside group bounds, dropped"
            );
            self.decision.log.push(format!(
                "{reason} (dropped: outside [{}, {}])",
                self.snapshot.min_size, self.snapshot.max_size
            ));
            return false;
        };

        info!(group = %self.snapshot.name, from, to, %reason, "capacity change decided");
        self.decision.log.push(reason);
        self.decision.capacity = Some(CapacityChange { from, to });
        true
    }
}

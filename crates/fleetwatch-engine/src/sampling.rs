//! Sampling aggregation — per-instance utilization for one run.
//!
//! Members are sampled concurrently (bounded by `SamplingConfig`), but the
//! resulting `SampleSet` is always ordered like the snapshot's members so
//! every scan downstream is deterministic.

use std::sync::Arc;
use std::time::Duration;

use fleetwatch_state::InstanceId;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{EngineConfig, SamplingConfig};
use crate::group::GroupSnapshot;
use crate::BoxFuture;

/// Latest aggregated reading for one instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Utilization percentage (0–100) of the most recent data point.
    pub value: f64,
    /// Number of data points the backend returned for the window.
    pub count: u32,
}

/// Metrics backend seam.
///
/// Must return `Ok(None)` when the window holds no data points, never a
/// fabricated zero.
pub trait SampleSource: Send + Sync {
    fn sample<'a>(
        &'a self,
        instance_id: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, anyhow::Result<Option<Sample>>>;
}

/// Present samples for a group, in member order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    entries: Vec<(InstanceId, Sample)>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample. Later inserts for the same instance replace earlier ones.
    pub fn insert(&mut self, instance_id: impl Into<InstanceId>, sample: Sample) {
        let instance_id = instance_id.into();
        match self.entries.iter_mut().find(|(id, _)| *id == instance_id) {
            Some((_, existing)) => *existing = sample,
            None => self.entries.push((instance_id, sample)),
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&Sample> {
        self.entries
            .iter()
            .find(|(id, _)| id == instance_id)
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sample)> {
        self.entries.iter().map(|(id, s)| (id.as_str(), s))
    }

    /// Number of instances with a sample.
    pub fn measured_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_load(&self) -> f64 {
        self.entries.iter().map(|(_, s)| s.value).sum()
    }

    /// Mean over measured instances, 0 when nothing was measured.
    pub fn avg_load(&self) -> f64 {
        match self.measured_count() {
            0 => 0.0,
            n => self.total_load() / n as f64,
        }
    }

    /// Most loaded instance. Ties go to the earliest member.
    pub fn max_loaded(&self) -> Option<(&str, f64)> {
        self.entries.iter().fold(None, |best, (id, s)| match best {
            Some((_, load)) if load >= s.value => best,
            _ => Some((id.as_str(), s.value)),
        })
    }
}

impl<I: Into<InstanceId>> FromIterator<(I, Sample)> for SampleSet {
    fn from_iter<T: IntoIterator<Item = (I, Sample)>>(iter: T) -> Self {
        let mut set = SampleSet::new();
        for (id, sample) in iter {
            set.insert(id, sample);
        }
        set
    }
}

/// Sample every member of `snapshot` over `3 × stats_period_secs`.
///
/// Source errors and timeouts are logged and the member is treated as
/// unmeasured.
pub async fn collect_samples(
    source: Arc<dyn SampleSource>,
    snapshot: &GroupSnapshot,
    config: &EngineConfig,
    sampling: &SamplingConfig,
) -> SampleSet {
    let window = config.sample_window();
    let timeout = sampling.timeout();
    let permits = Arc::new(Semaphore::new(sampling.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, instance_id) in snapshot.members.iter().cloned().enumerate() {
        let source = source.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            // Never closed, so acquisition cannot fail.
            let _permit = permits.acquire_owned().await.ok();
            let result = tokio::time::timeout(timeout, source.sample(&instance_id, window)).await;
            let sample = match result {
                Ok(Ok(sample)) => sample,
                Ok(Err(e)) => {
                    warn!(instance = %instance_id, error = %e, "sample request failed");
                    None
                }
                Err(_) => {
                    warn!(instance = %instance_id, timeout_secs = timeout.as_secs(), "sample request timed out");
                    None
                }
            };
            (index, instance_id, sample)
        });
    }

    let mut slots: Vec<Option<(InstanceId, Sample)>> = vec![None; snapshot.members.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, instance_id, Some(sample))) => slots[index] = Some((instance_id, sample)),
            Ok((_, instance_id, None)) => {
                debug!(instance = %instance_id, "no data points in window");
            }
            Err(e) => warn!(error = %e, "sample task failed"),
        }
    }

    let samples: SampleSet = slots.into_iter().flatten().collect();
    debug!(
        group = %snapshot.name,
        measured = samples.measured_count(),
        members = snapshot.members.len(),
        avg_load = samples.avg_load(),
        "samples collected"
    );
    samples
}

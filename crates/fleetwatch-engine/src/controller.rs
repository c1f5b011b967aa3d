//! Controller — one group's invocation pipeline and its periodic loop.
//!
//! ```text
//! snapshot → collect_samples → load state → evaluate → apply → push history → save
//! ```
//!
//! A missing group aborts the run before any state is read or written.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use fleetwatch_state::{EngineState, HistoryEntry, StateStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EngineConfig, SamplingConfig};
use crate::decision::{evaluate, Decision};
use crate::executor::{Command, ExecutionReport, Executor};
use crate::group::{ControlPlane, GroupSnapshot};
use crate::sampling::{collect_samples, SampleSet, SampleSource};

/// Everything one invocation produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub group: String,
    pub instance_count: u32,
    pub measured: usize,
    pub avg_load: f64,
    pub decision: Decision,
    pub report: ExecutionReport,
    pub state: EngineState,
}

/// Drives the decision engine for a single group.
pub struct Controller {
    group: String,
    config: EngineConfig,
    sampling: SamplingConfig,
    source: Arc<dyn SampleSource>,
    control: Arc<dyn ControlPlane>,
    executor: Executor,
    store: StateStore,
}

impl Controller {
    pub fn new(
        group: impl Into<String>,
        config: EngineConfig,
        sampling: SamplingConfig,
        source: Arc<dyn SampleSource>,
        control: Arc<dyn ControlPlane>,
        store: StateStore,
    ) -> Self {
        let executor = Executor::new(control.clone(), config.dry_run);
        Self {
            group: group.into(),
            config,
            sampling,
            source,
            control,
            executor,
            store,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Run one invocation end to end.
    pub async fn run_once(&self) -> anyhow::Result<RunSummary> {
        let snapshot = self
            .control
            .snapshot(&self.group)
            .await
            .with_context(|| format!("failed to snapshot group {}", self.group))?;
        snapshot.validate()?;

        let samples = collect_samples(self.source.clone(), &snapshot, &self.config, &self.sampling).await;
        let mut state = self.store.load(&self.group);

        let decision = evaluate(&self.config, &snapshot, &samples, &mut state);
        let report = self.executor.apply(&snapshot, &decision).await;

        let now = epoch_secs();
        self.record(&mut state, &snapshot, &samples, &decision, &report, now);
        self.store
            .save(&self.group, &state)
            .with_context(|| format!("failed to persist state for group {}", self.group))?;

        info!(
            group = %self.group,
            outcome = ?decision.outcome,
            instances = snapshot.instance_count,
            measured = samples.measured_count(),
            avg_load = samples.avg_load(),
            commands = report.commands.len(),
            "run complete"
        );

        Ok(RunSummary {
            group: self.group.clone(),
            instance_count: snapshot.instance_count,
            measured: samples.measured_count(),
            avg_load: samples.avg_load(),
            decision,
            report,
            state,
        })
    }

    /// Fold one run's results into the persisted state.
    fn record(
        &self,
        state: &mut EngineState,
        snapshot: &GroupSnapshot,
        samples: &SampleSet,
        decision: &Decision,
        report: &ExecutionReport,
        now: u64,
    ) {
        state.last_action = decision.log.join("; ");
        state.last_run_ts = now;
        match samples.max_loaded() {
            Some((instance, load)) => {
                state.last_max_load = load;
                state.last_max_loaded = Some(instance.to_string());
            }
            None => {
                state.last_max_load = 0.0;
                state.last_max_loaded = None;
            }
        }

        for result in report.attempted() {
            state.last_action_ts = now;
            if let Command::SetDesiredCapacity { to, .. } = result.command {
                state.last_desired = Some(to);
            }
        }

        state.push_history(
            HistoryEntry {
                ts: now,
                instance_count: snapshot.instance_count,
                total_load: samples.total_load().round() as u32,
                avg_load: samples.avg_load().round() as u32,
            },
            self.config.history_size,
        );
    }

    /// Run the controller loop until shutdown is signalled. The first
    /// invocation happens immediately.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            group = %self.group,
            interval_secs = interval.as_secs(),
            dry_run = self.executor.is_dry_run(),
            "controller started"
        );

        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(group = %self.group, error = %e, "run failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(group = %self.group, "controller shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::decision::Outcome;
    use crate::executor::CommandStatus;
    use crate::group::ControlPlaneError;
    use crate::sampling::Sample;
    use crate::BoxFuture;

    /// In-memory group with canned samples; commands are recorded and
    /// applied to the desired capacity.
    struct FakeCloud {
        snapshot: Mutex<Option<GroupSnapshot>>,
        samples: HashMap<String, Sample>,
        commands: Mutex<Vec<String>>,
    }

    impl FakeCloud {
        fn new(snapshot: Option<GroupSnapshot>, loads: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
                samples: loads
                    .iter()
                    .map(|(id, value)| (id.to_string(), Sample { value: *value, count: 3 }))
                    .collect(),
                commands: Mutex::new(Vec::new()),
            })
        }
    }

    impl SampleSource for FakeCloud {
        fn sample<'a>(
            &'a self,
            instance_id: &'a str,
            _window: Duration,
        ) -> BoxFuture<'a, anyhow::Result<Option<Sample>>> {
            Box::pin(async move { Ok(self.samples.get(instance_id).copied()) })
        }
    }

    impl ControlPlane for FakeCloud {
        fn snapshot<'a>(
            &'a self,
            group: &'a str,
        ) -> BoxFuture<'a, Result<GroupSnapshot, ControlPlaneError>> {
            Box::pin(async move {
                self.snapshot
                    .lock()
                    .unwrap()
                    .clone()
                    .filter(|s| s.name == group)
                    .ok_or_else(|| ControlPlaneError::GroupNotFound(group.to_string()))
            })
        }

        fn terminate<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
            Box::pin(async move {
                self.commands.lock().unwrap().push(format!("terminate {instance_id}"));
                Ok(())
            })
        }

        fn set_desired_capacity<'a>(
            &'a self,
            group: &'a str,
            capacity: u32,
        ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
            Box::pin(async move {
                self.commands.lock().unwrap().push(format!("desired {group} {capacity}"));
                if let Some(snap) = self.snapshot.lock().unwrap().as_mut() {
                    snap.desired_capacity = capacity;
                }
                Ok(())
            })
        }
    }

    fn group(ids: &[&str], min: u32, max: u32) -> GroupSnapshot {
        GroupSnapshot::new(
            "web",
            ids.iter().map(|s| s.to_string()).collect(),
            ids.len() as u32,
            min,
            max,
        )
    }

    fn controller(cloud: Arc<FakeCloud>, store: StateStore, config: EngineConfig) -> Controller {
        Controller::new(
            "web",
            config,
            SamplingConfig::default(),
            cloud.clone(),
            cloud,
            store,
        )
    }

    #[tokio::test]
    async fn hysteresis_survives_across_runs() {
        let cloud = FakeCloud::new(
            Some(group(&["i-1", "i-2", "i-3", "i-4"], 1, 8)),
            &[("i-1", 95.0), ("i-2", 95.0), ("i-3", 95.0), ("i-4", 95.0)],
        );
        let store = StateStore::open_in_memory().unwrap();
        let config = EngineConfig {
            high_counter_limit: 1,
            high_urgent: 98.0,
            ..Default::default()
        };

        let first = controller(cloud.clone(), store.clone(), config.clone())
            .run_once()
            .await
            .unwrap();
        assert_eq!(first.decision.outcome, Outcome::Steady);
        assert_eq!(store.load("web").high_counter, 1);

        // A fresh controller sees the persisted counter.
        let second = controller(cloud.clone(), store.clone(), config)
            .run_once()
            .await
            .unwrap();
        assert_eq!(second.decision.outcome, Outcome::ScaleUp);
        assert_eq!(*cloud.commands.lock().unwrap(), vec!["desired web 5".to_string()]);

        let state = store.load("web");
        assert_eq!(state.high_counter, 0);
        assert_eq!(state.last_desired, Some(5));
        assert!(state.last_action_ts > 0);
        assert!(state.last_action.contains("high load"));
    }

    #[tokio::test]
    async fn missing_group_writes_nothing() {
        let cloud = FakeCloud::new(None, &[]);
        let store = StateStore::open_in_memory().unwrap();

        let err = controller(cloud.clone(), store.clone(), EngineConfig::default())
            .run_once()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("web"));
        assert!(store.list_groups().unwrap().is_empty());
        assert!(cloud.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_records_decision_without_commands() {
        let cloud = FakeCloud::new(
            Some(group(&["i-1", "i-2", "i-3"], 1, 5)),
            &[("i-1", 3.0), ("i-2", 60.0), ("i-3", 57.0)],
        );
        let store = StateStore::open_in_memory().unwrap();
        let config = EngineConfig {
            dry_run: true,
            ..Default::default()
        };

        let summary = controller(cloud.clone(), store.clone(), config)
            .run_once()
            .await
            .unwrap();

        assert_eq!(summary.decision.outcome, Outcome::TooLow);
        assert!(summary
            .report
            .commands
            .iter()
            .all(|c| c.status == CommandStatus::DryRun));
        assert!(cloud.commands.lock().unwrap().is_empty());

        let state = store.load("web");
        assert_eq!(state.last_action_ts, 0);
        assert_eq!(state.last_desired, None);
        assert!(state.last_action.contains("abnormally low"));
        assert_eq!(state.last_max_loaded.as_deref(), Some("i-2"));
    }

    #[tokio::test]
    async fn history_is_bounded_by_config() {
        let cloud = FakeCloud::new(
            Some(group(&["i-1", "i-2"], 2, 4)),
            &[("i-1", 80.0), ("i-2", 81.0)],
        );
        let store = StateStore::open_in_memory().unwrap();
        let config = EngineConfig {
            history_size: 3,
            ..Default::default()
        };
        let controller = controller(cloud, store.clone(), config);

        for _ in 0..5 {
            controller.run_once().await.unwrap();
        }

        let state = store.load("web");
        assert_eq!(state.history.len(), 3);
        let row = state.history.back().unwrap();
        assert_eq!(row.instance_count, 2);
        assert_eq!(row.total_load, 161);
        assert_eq!(row.avg_load, 81);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let cloud = FakeCloud::new(Some(group(&["i-1"], 1, 2)), &[("i-1", 50.0)]);
        let store = StateStore::open_in_memory().unwrap();
        let controller = Arc::new(controller(cloud, store.clone(), EngineConfig::default()));

        let (tx, rx) = tokio::sync::watch::channel(false);
        let looping = controller.clone();
        let handle = tokio::spawn(async move {
            looping.run(Duration::from_millis(10), rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.load("web").last_run_ts > 0);
    }

    #[tokio::test]
    async fn run_loop_evaluates_before_first_interval() {
        let cloud = FakeCloud::new(Some(group(&["i-1"], 1, 2)), &[("i-1", 50.0)]);
        let store = StateStore::open_in_memory().unwrap();
        let controller = Arc::new(controller(cloud, store.clone(), EngineConfig::default()));

        let (tx, rx) = tokio::sync::watch::channel(false);
        let looping = controller.clone();
        let handle = tokio::spawn(async move {
            looping.run(Duration::from_secs(3600), rx).await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.load("web").last_run_ts > 0);
    }
}

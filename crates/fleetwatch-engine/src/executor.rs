//! Action executor — applies a `Decision` against the control plane.
//!
//! Commands are fire-and-forget: failures are logged and reported, never
//! retried, and never abort the run.

use std::sync::Arc;

use fleetwatch_state::InstanceId;
use serde::Serialize;
use tracing::{info, warn};

use crate::decision::Decision;
use crate::group::{ControlPlane, GroupSnapshot};

/// A command sent (or withheld) by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Terminate { instance: InstanceId },
    SetDesiredCapacity { from: u32, to: u32 },
}

/// What happened to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CommandStatus {
    Applied,
    /// Dry-run mode: logged only.
    DryRun,
    /// Withheld before reaching the control plane.
    Rejected(String),
    /// The control plane refused or errored.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: Command,
    pub status: CommandStatus,
}

/// Outcome of every command issued for one decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub commands: Vec<CommandResult>,
}

impl ExecutionReport {
    /// Commands that were sent to the control plane, successful or not.
    pub fn attempted(&self) -> impl Iterator<Item = &CommandResult> {
        self.commands.iter().filter(|c| {
            matches!(c.status, CommandStatus::Applied | CommandStatus::Failed(_))
        })
    }

    pub fn failures(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c.status, CommandStatus::Failed(_)))
            .count()
    }
}

/// Sends decisions to a control plane, honouring dry-run mode.
#[derive(Clone)]
pub struct Executor {
    control: Arc<dyn ControlPlane>,
    dry_run: bool,
}

impl Executor {
    pub fn new(control: Arc<dyn ControlPlane>, dry_run: bool) -> Self {
        Self { control, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply the termination first, then the capacity change.
    pub async fn apply(&self, snapshot: &GroupSnapshot, decision: &Decision) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let reason = decision.log.join("; ");

        if let Some(instance) = &decision.terminate {
            let status = self.terminate(snapshot, instance, &reason).await;
            report.commands.push(CommandResult {
                command: Command::Terminate {
                    instance: instance.clone(),
                },
                status,
            });
        }

        if let Some(change) = decision.capacity {
            let status = self
                .set_desired_capacity(snapshot, change.from, change.to, &reason)
                .await;
            report.commands.push(CommandResult {
                command: Command::SetDesiredCapacity {
                    from: change.from,
                    to: change.to,
                },
                status,
            });
        }

        report
    }

    async fn terminate(&self, snapshot: &GroupSnapshot, instance: &str, reason: &str) -> CommandStatus {
        info!(
            group = %snapshot.name,
            %instance,
            instances = snapshot.instance_count,
            %reason,
            dry_run = self.dry_run,
            "terminate instance"
        );
        if self.dry_run {
            return CommandStatus::DryRun;
        }
        match self.control.terminate(instance).await {
            Ok(()) => CommandStatus::Applied,
            Err(e) => {
                warn!(group = %snapshot.name, %instance, error = %e, "terminate failed");
                CommandStatus::Failed(e.to_string())
            }
        }
    }

    async fn set_desired_capacity(
        &self,
        snapshot: &GroupSnapshot,
        from: u32,
        to: u32,
        reason: &str,
    ) -> CommandStatus {
        info!(
            group = %snapshot.name,
            from,
            to,
            %reason,
            dry_run = self.dry_run,
            "set desired capacity"
        );
        if self.dry_run {
            return CommandStatus::DryRun;
        }
        if !snapshot.in_band(to) {
            let detail = format!(
                "capacity {to} outside [{}, {}]",
                snapshot.min_size, snapshot.max_size
            );
            warn!(group = %snapshot.name, from, to, "{detail}");
            return CommandStatus::Rejected(detail);
        }
        match self.control.set_desired_capacity(&snapshot.name, to).await {
            Ok(()) => CommandStatus::Applied,
            Err(e) => {
                warn!(group = %snapshot.name, from, to, error = %e, "set desired capacity failed");
                CommandStatus::Failed(e.to_string())
            }
        }
    }
}

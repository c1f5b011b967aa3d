//! fleetwatchd — the fleetwatch daemon.
//!
//! Scales one instance group on CPU utilization: removes outlier
//! instances, and grows or shrinks desired capacity with hysteresis.
//!
//! # Usage
//!
//! ```text
//! fleetwatchd --config fleetwatch.toml run --dry-run
//! fleetwatchd --config fleetwatch.toml watch --interval 60
//! fleetwatchd --config fleetwatch.toml state --group web
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use fleetwatchd::{build_controller, open_store, DaemonConfig};

#[derive(Parser)]
#[command(name = "fleetwatchd", about = "fleetwatch group scaling daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "fleetwatch.toml")]
    config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single invocation and print its summary.
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Run periodically until interrupted.
    Watch {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between invocations.
        #[arg(long, default_value = "60")]
        interval: u64,
    },
    /// Print the persisted engine state of a group.
    State {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Delete the persisted engine state of a group.
    Reset {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args)]
struct Overrides {
    /// Group to manage (overrides the config file).
    #[arg(long)]
    group: Option<String>,

    /// Log commands without sending them.
    #[arg(long)]
    dry_run: bool,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(group) = self.group {
            config.group = Some(group);
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        config.engine.dry_run |= self.dry_run;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = DaemonConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Run { overrides } => {
            overrides.apply(&mut config);
            run(config).await
        }
        Command::Watch { overrides, interval } => {
            overrides.apply(&mut config);
            run_watch(config, Duration::from_secs(interval)).await
        }
        Command::State { overrides } => {
            overrides.apply(&mut config);
            show_state(&config)
        }
        Command::Reset { overrides } => {
            overrides.apply(&mut config);
            reset_state(&config)
        }
    }
}

/// Used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info,fleetwatch_engine=debug,fleetwatch_state=debug,fleetwatchd=debug";

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let controller = build_controller(&config, store)?;
    let summary = controller.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_watch(config: DaemonConfig, interval: Duration) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let controller = build_controller(&config, store)?;
    info!(group = %controller.group(), "fleetwatch daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    controller.run(interval, shutdown_rx).await;
    info!("fleetwatch daemon stopped");
    Ok(())
}

fn group_name(config: &DaemonConfig) -> anyhow::Result<&str> {
    config
        .group
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no group configured (set `group` or pass --group)"))
}

fn show_state(config: &DaemonConfig) -> anyhow::Result<()> {
    let group = group_name(config)?;
    let store = open_store(config)?;
    match store.get_stored(group)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => anyhow::bail!("no stored state for group {group}"),
    }
    Ok(())
}

fn reset_state(config: &DaemonConfig) -> anyhow::Result<()> {
    let group = group_name(config)?;
    let store = open_store(config)?;
    if store.delete(group)? {
        info!(%group, "stored state deleted");
    } else {
        info!(%group, "no stored state to delete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_covers_every_crate() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        for target in ["fleetwatch_engine", "fleetwatch_state", "fleetwatchd"] {
            assert!(
                DEFAULT_LOG_FILTER.contains(&format!("{target}=debug")),
                "{target} missing from default filter"
            );
        }
    }
}

//! Assembles a `Controller` from a loaded `DaemonConfig`.

use std::sync::Arc;

use anyhow::Context;
use fleetwatch_engine::Controller;
use fleetwatch_state::StateStore;
use tracing::info;

use crate::config::DaemonConfig;
use crate::fixture::FixtureBackend;

/// Open the state database under the configured data directory.
pub fn open_store(config: &DaemonConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    let path = config.state_path();
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

/// Build the controller for the configured group.
pub fn build_controller(config: &DaemonConfig, store: StateStore) -> anyhow::Result<Controller> {
    let group = config
        .group
        .clone()
        .context("no group configured (set `group` in the config file or pass --group)")?;

    let backend = Arc::new(FixtureBackend::open(&config.backend.fixture)?);
    info!(
        %group,
        fixture = ?config.backend.fixture,
        dry_run = config.engine.dry_run,
        "fixture backend initialized"
    );

    Ok(Controller::new(
        group,
        config.engine.clone(),
        config.sampling.clone(),
        backend.clone(),
        backend,
        store,
    ))
}

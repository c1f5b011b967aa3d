//! StateStore — redb-backed persistence of per-group engine state.
//!
//! Every record is a JSON-serialized `StoredState` in the `engine_states`
//! table. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENGINE_STATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load the engine state for a group.
    ///
    /// Never fails: a missing record, a record that does not parse, a
    /// record of an unknown version, or a storage read error all yield a
    /// fresh `EngineState`.
    pub fn load(&self, group: &str) -> EngineState {
        match self.get_record(group) {
            Ok(Some(bytes)) => decode_record(group, &bytes),
            Ok(None) => {
                debug!(%group, "no stored state, starting fresh");
                EngineState::default()
            }
            Err(e) => {
                warn!(%group, error = %e, "failed to read stored state, starting fresh");
                EngineState::default()
            }
        }
    }

    /// Fetch the raw stored record for a group, if one exists.
    pub fn get_stored(&self, group: &str) -> StateResult<Option<StoredState>> {
        Ok(self
            .get_record(group)?
            .and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }

    /// Overwrite the stored state for a group in a single transaction.
    pub fn save(&self, group: &str, state: &EngineState) -> StateResult<()> {
        let record = StoredState::current(state.clone());
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        self.put_record(group, &value)?;
        debug!(%group, version = record.version, "engine state stored");
        Ok(())
    }

    /// Delete the stored state for a group. Returns true if it existed.
    pub fn delete(&self, group: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENGINE_STATES).map_err(map_err!(Table))?;
            existed = table.remove(group).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%group, existed, "engine state deleted");
        Ok(existed)
    }

    /// List the names of all groups with stored state.
    pub fn list_groups(&self) -> StateResult<Vec<GroupName>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENGINE_STATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    fn get_record(&self, group: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENGINE_STATES).map_err(map_err!(Table))?;
        Ok(table
            .get(group)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    fn put_record(&self, group: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENGINE_STATES).map_err(map_err!(Table))?;
            table.insert(group, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn decode_record(group: &str, bytes: &[u8]) -> EngineState {
    match serde_json::from_slice::<StoredState>(bytes) {
        Ok(record) if record.version == STATE_VERSION => record.state,
        Ok(record) => {
            warn!(%group, version = record.version, "unsupported state version, starting fresh");
            EngineState::default()
        }
        Err(e) => {
            warn!(%group, error = %e, "corrupt stored state, starting fresh");
            EngineState::default()
        }
    }
}

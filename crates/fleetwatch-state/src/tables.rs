//! redb table definitions for the fleetwatch state store.

use redb::TableDefinition;

/// Versioned engine state records keyed by group name.
pub const ENGINE_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("engine_states");

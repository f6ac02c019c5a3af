//! redb table definitions for the Shunt store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Trace/event keys are `{timestamp_ms:020}:{id}` so lexicographic
//! order equals chronological order.

use redb::TableDefinition;

/// Single-row table holding the global routing settings (key `"settings"`).
pub const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Single-row table holding the health-check config (key `"health_check"`).
pub const HEALTH_CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("health_config");

/// Routes keyed by `{route_id}`.
pub const ROUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("routes");

/// Pipelines keyed by `{route_id}` (one pipeline per route).
pub const PIPELINES: TableDefinition<&str, &[u8]> = TableDefinition::new("pipelines");

/// Request traces keyed by `{timestamp_ms:020}:{trace_id}`.
pub const TRACES: TableDefinition<&str, &[u8]> = TableDefinition::new("traces");

/// Routing events keyed by `{timestamp_ms:020}:{event_id}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

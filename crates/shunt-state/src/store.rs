//! Store — redb-backed persistence for routing config and traces.
//!
//! Provides typed CRUD over settings, health config, routes, pipelines,
//! request traces, and routing events. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk
//! and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const SETTINGS_KEY: &str = "settings";
const HEALTH_CONFIG_KEY: &str = "health_check";

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_CONFIG).map_err(map_err!(Table))?;
        txn.open_table(ROUTES).map_err(map_err!(Table))?;
        txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        txn.open_table(TRACES).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Load the global settings, if any have been saved.
    pub fn load_settings(&self) -> StateResult<Option<Settings>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        match table.get(SETTINGS_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let settings: Settings =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    /// Save the global settings.
    pub fn save_settings(&self, settings: &Settings) -> StateResult<()> {
        let value = serde_json::to_vec(settings).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            table
                .insert(SETTINGS_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load the health-check config, if any has been saved.
    pub fn load_health_config(&self) -> StateResult<Option<HealthCheckConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEALTH_CONFIG).map_err(map_err!(Table))?;
        match table.get(HEALTH_CONFIG_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let config: HealthCheckConfig =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// Save the health-check config.
    pub fn save_health_config(&self, config: &HealthCheckConfig) -> StateResult<()> {
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HEALTH_CONFIG).map_err(map_err!(Table))?;
            table
                .insert(HEALTH_CONFIG_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Insert or update a route.
    pub fn put_route(&self, route: &Route) -> StateResult<()> {
        let value = serde_json::to_vec(route).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            table
                .insert(route.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(route_id = %route.id, "route stored");
        Ok(())
    }

    /// Get a route by id.
    pub fn get_route(&self, route_id: &str) -> StateResult<Option<Route>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        match table.get(route_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let route: Route =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(route))
            }
            None => Ok(None),
        }
    }

    /// List all routes.
    pub fn list_routes(&self) -> StateResult<Vec<Route>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let route: Route =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(route);
        }
        Ok(results)
    }

    /// Delete a route and its pipeline. Returns true if the route existed.
    pub fn delete_route(&self, route_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut routes = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            existed = routes.remove(route_id).map_err(map_err!(Write))?.is_some();
            let mut pipelines = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            pipelines.remove(route_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%route_id, existed, "route deleted");
        Ok(existed)
    }

    // ── Pipelines ──────────────────────────────────────────────────

    /// Insert or update the pipeline for a route.
    pub fn put_pipeline(&self, pipeline: &Pipeline) -> StateResult<()> {
        let value = serde_json::to_vec(pipeline).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            table
                .insert(pipeline.route_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the pipeline for a route.
    pub fn get_pipeline(&self, route_id: &str) -> StateResult<Option<Pipeline>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        match table.get(route_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let pipeline: Pipeline =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pipeline))
            }
            None => Ok(None),
        }
    }

    // ── Traces ─────────────────────────────────────────────────────

    /// Append a request trace.
    pub fn record_trace(&self, trace: &RequestTrace) -> StateResult<()> {
        let key = trace.table_key();
        let value = serde_json::to_vec(trace).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TRACES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a single trace by its trace id (key suffix scan).
    pub fn get_trace(&self, trace_id: &str) -> StateResult<Option<RequestTrace>> {
        let suffix = format!(":{trace_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACES).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().ends_with(&suffix) {
                let trace: RequestTrace =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                return Ok(Some(trace));
            }
        }
        Ok(None)
    }

    /// List traces matching the filter, newest first.
    pub fn list_traces(&self, filter: &TraceFilter) -> StateResult<Vec<RequestTrace>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let trace: RequestTrace =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if let Some(route_id) = &filter.route_id {
                if &trace.route_id != route_id {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if trace.status != status {
                    continue;
                }
            }
            results.push(trace);
        }
        // Keys iterate oldest-first; callers want newest-first.
        results.reverse();
        Ok(apply_window(results, filter.offset, filter.limit))
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append a routing event.
    pub fn record_event(&self, event: &RoutingEvent) -> StateResult<()> {
        let key = event.table_key();
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List events matching the filter, newest first.
    pub fn list_events(&self, filter: &EventFilter) -> StateResult<Vec<RoutingEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: RoutingEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if let Some(event_type) = filter.event_type {
                if event.event_type != event_type {
                    continue;
                }
            }
            if let Some(route_id) = &filter.route_id {
                if &event.route_id != route_id {
                    continue;
                }
            }
            results.push(event);
        }
        results.reverse();
        Ok(apply_window(results, filter.offset, filter.limit))
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Delete traces and events older than `cutoff_ms`. Returns the
    /// number of records removed.
    pub fn prune_older_than(&self, cutoff_ms: u64) -> StateResult<u64> {
        // Key prefix is a zero-padded timestamp, so string comparison
        // against the padded cutoff is a chronological comparison.
        let cutoff_prefix = format!("{cutoff_ms:020}");
        let mut removed = 0u64;

        for table_def in [TRACES, EVENTS] {
            let stale: Vec<String> = {
                let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
                let table = txn.open_table(table_def).map_err(map_err!(Table))?;
                table
                    .iter()
                    .map_err(map_err!(Read))?
                    .filter_map(|entry| {
                        let (key, _) = entry.ok()?;
                        let k = key.value().to_string();
                        (k.as_str() < cutoff_prefix.as_str()).then_some(k)
                    })
                    .collect()
            };
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
                for key in &stale {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                    removed += 1;
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
        }

        if removed > 0 {
            debug!(removed, "pruned stale trace/event records");
        }
        Ok(removed)
    }
}

/// Apply offset/limit to an already-ordered result set. A limit of 0
/// means unbounded.
fn apply_window<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_route(id: &str, name: &str) -> Route {
        Route {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            enabled: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_pipeline(route_id: &str) -> Pipeline {
        Pipeline {
            route_id: route_id.to_string(),
            layers: vec![Layer {
                level: 1,
                strategy: LoadStrategy::RoundRobin,
                cooldown_seconds: 0,
                targets: vec![Target {
                    id: "t1".into(),
                    credential_id: "cred-1".into(),
                    model: "gpt-test".into(),
                    weight: 1,
                    enabled: true,
                }],
            }],
        }
    }

    fn test_trace(id: &str, route_id: &str, timestamp: u64, status: TraceStatus) -> RequestTrace {
        RequestTrace {
            trace_id: id.to_string(),
            route_id: route_id.to_string(),
            route_name: "fast".into(),
            timestamp,
            status,
            total_latency_ms: 42,
            attempts: vec![],
        }
    }

    fn test_event(id: &str, route_id: &str, timestamp: u64) -> RoutingEvent {
        RoutingEvent {
            id: id.to_string(),
            event_type: RoutingEventType::CooldownStarted,
            timestamp,
            route_id: route_id.to_string(),
            target_id: Some("t1".into()),
            details: Default::default(),
        }
    }

    #[test]
    fn settings_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_settings().unwrap().is_none());

        let settings = Settings {
            enabled: true,
            hide_upstream_models: true,
        };
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), Some(settings));
    }

    #[test]
    fn health_config_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_health_config().unwrap().is_none());

        let config = HealthCheckConfig {
            default_cooldown_seconds: 120,
            ..Default::default()
        };
        store.save_health_config(&config).unwrap();
        assert_eq!(store.load_health_config().unwrap(), Some(config));
    }

    #[test]
    fn route_crud() {
        let store = Store::open_in_memory().unwrap();
        let route = test_route("r1", "fast");

        store.put_route(&route).unwrap();
        assert_eq!(store.get_route("r1").unwrap(), Some(route.clone()));
        assert_eq!(store.list_routes().unwrap().len(), 1);

        assert!(store.delete_route("r1").unwrap());
        assert!(store.get_route("r1").unwrap().is_none());
        assert!(!store.delete_route("r1").unwrap());
    }

    #[test]
    fn deleting_route_removes_pipeline() {
        let store = Store::open_in_memory().unwrap();
        store.put_route(&test_route("r1", "fast")).unwrap();
        store.put_pipeline(&test_pipeline("r1")).unwrap();

        store.delete_route("r1").unwrap();
        assert!(store.get_pipeline("r1").unwrap().is_none());
    }

    #[test]
    fn pipeline_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = test_pipeline("r1");
        store.put_pipeline(&pipeline).unwrap();
        assert_eq!(store.get_pipeline("r1").unwrap(), Some(pipeline));
    }

    #[test]
    fn traces_newest_first_with_filters() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_trace(&test_trace("trace-a", "r1", 100, TraceStatus::Success))
            .unwrap();
        store
            .record_trace(&test_trace("trace-b", "r1", 200, TraceStatus::Failed))
            .unwrap();
        store
            .record_trace(&test_trace("trace-c", "r2", 300, TraceStatus::Success))
            .unwrap();

        let all = store.list_traces(&TraceFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].trace_id, "trace-c");
        assert_eq!(all[2].trace_id, "trace-a");

        let r1_only = store
            .list_traces(&TraceFilter {
                route_id: Some("r1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(r1_only.len(), 2);

        let failed = store
            .list_traces(&TraceFilter {
                status: Some(TraceStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].trace_id, "trace-b");
    }

    #[test]
    fn trace_limit_and_offset() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5u64 {
            store
                .record_trace(&test_trace(
                    &format!("trace-{i}"),
                    "r1",
                    100 + i,
                    TraceStatus::Success,
                ))
                .unwrap();
        }

        let page = store
            .list_traces(&TraceFilter {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].trace_id, "trace-3");
        assert_eq!(page[1].trace_id, "trace-2");
    }

    #[test]
    fn get_trace_by_id() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_trace(&test_trace("trace-abc", "r1", 100, TraceStatus::Success))
            .unwrap();

        assert!(store.get_trace("trace-abc").unwrap().is_some());
        assert!(store.get_trace("trace-missing").unwrap().is_none());
    }

    #[test]
    fn events_filter_by_type() {
        let store = Store::open_in_memory().unwrap();
        store.record_event(&test_event("evt-1", "r1", 100)).unwrap();
        let mut recovered = test_event("evt-2", "r1", 200);
        recovered.event_type = RoutingEventType::TargetRecovered;
        store.record_event(&recovered).unwrap();

        let all = store.list_events(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "evt-2");

        let cooldowns = store
            .list_events(&EventFilter {
                event_type: Some(RoutingEventType::CooldownStarted),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cooldowns.len(), 1);
        assert_eq!(cooldowns[0].id, "evt-1");
    }

    #[test]
    fn prune_removes_old_records() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_trace(&test_trace("trace-old", "r1", 100, TraceStatus::Success))
            .unwrap();
        store
            .record_trace(&test_trace("trace-new", "r1", 5000, TraceStatus::Success))
            .unwrap();
        store.record_event(&test_event("evt-old", "r1", 100)).unwrap();
        store.record_event(&test_event("evt-new", "r1", 5000)).unwrap();

        let removed = store.prune_older_than(1000).unwrap();
        assert_eq!(removed, 2);

        let traces = store.list_traces(&TraceFilter::default()).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].trace_id, "trace-new");
        assert_eq!(store.list_events(&EventFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shunt.redb");

        {
            let store = Store::open(&path).unwrap();
            store.put_route(&test_route("r1", "fast")).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert!(store.get_route("r1").unwrap().is_some());
    }
}

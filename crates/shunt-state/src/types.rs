//! Domain types for the Shunt routing gateway.
//!
//! Configuration types (Route, Pipeline, Layer, Target) are immutable
//! snapshots owned by the config service. Runtime types (TargetState) are
//! owned by the engine's state manager. Observability types (RequestTrace,
//! RoutingEvent, stats) are immutable once built.
//!
//! Timestamps are unix epoch milliseconds throughout.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a route.
pub type RouteId = String;

/// Unique identifier for a target (globally unique across routes).
pub type TargetId = String;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Configuration ──────────────────────────────────────────────────

/// Global routing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Settings {
    /// Master switch: when false the gateway refuses to route.
    pub enabled: bool,
    /// Hide raw upstream model ids from model listings while routing
    /// is active.
    pub hide_upstream_models: bool,
}

/// Health-check tunables, hot-reloadable through the config service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckConfig {
    /// Cooldown applied when a layer does not override it (seconds).
    pub default_cooldown_seconds: u32,
    /// Background probe interval (seconds).
    pub check_interval_seconds: u64,
    /// Per-probe timeout (seconds).
    pub check_timeout_seconds: u64,
    /// Threshold surfaced to collaborators (alerting); does not itself
    /// drive cooldown transitions.
    pub max_consecutive_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            default_cooldown_seconds: 60,
            check_interval_seconds: 30,
            check_timeout_seconds: 10,
            max_consecutive_failures: 3,
        }
    }
}

/// A named, user-facing routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub enabled: bool,
    /// Unix timestamp (ms) when this route was created.
    pub created_at: u64,
    /// Unix timestamp (ms) of the last update.
    pub updated_at: u64,
}

/// The ordered set of failover layers attached to one route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub route_id: RouteId,
    pub layers: Vec<Layer>,
}

impl Pipeline {
    /// An empty pipeline for a route (created lazily with the route).
    pub fn empty(route_id: impl Into<RouteId>) -> Self {
        Self {
            route_id: route_id.into(),
            layers: Vec::new(),
        }
    }

    /// Layers in ascending level order. Levels need not be contiguous.
    pub fn layers_sorted(&self) -> Vec<Layer> {
        let mut layers = self.layers.clone();
        layers.sort_by_key(|l| l.level);
        layers
    }
}

/// One failover tier with its own load-balancing strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    /// Sort key; layers are tried in ascending level order.
    pub level: i32,
    #[serde(default)]
    pub strategy: LoadStrategy,
    /// Cooldown for targets failing in this layer; 0 means "use the
    /// health-check default".
    #[serde(default)]
    pub cooldown_seconds: u32,
    pub targets: Vec<Target>,
}

/// One concrete backend (credential + model) a layer can dispatch to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub id: TargetId,
    pub credential_id: String,
    pub model: String,
    /// Meaningful only for the weighted strategy; values ≤ 0 count as 1.
    #[serde(default = "default_weight")]
    pub weight: i32,
    pub enabled: bool,
}

fn default_weight() -> i32 {
    1
}

impl Target {
    /// Weight with the ≤0 → 1 normalization applied.
    pub fn effective_weight(&self) -> u64 {
        if self.weight <= 0 { 1 } else { self.weight as u64 }
    }
}

/// Load-balancing strategy for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoadStrategy {
    #[default]
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "weighted-round-robin")]
    WeightedRoundRobin,
    #[serde(rename = "least-connections")]
    LeastConnections,
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "first-available")]
    FirstAvailable,
}

// ── Runtime state ──────────────────────────────────────────────────

/// Status of a target. Two states only: any failure either leaves the
/// target healthy or puts it into cooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Healthy,
    Cooling,
}

/// Runtime state of a target, keyed by target id across all routes.
///
/// A target represents one real credential/backend; a cooldown triggered
/// via one route makes it ineligible everywhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TargetState {
    pub target_id: TargetId,
    pub status: TargetStatus,
    pub consecutive_failures: u32,
    /// Present iff status is `Cooling` (unix ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ends_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    pub active_connections: i64,
    pub total_requests: u64,
    pub successful_requests: u64,
}

impl TargetState {
    /// Fresh state for a target never seen before (healthy, zero counters).
    pub fn new(target_id: impl Into<TargetId>) -> Self {
        Self {
            target_id: target_id.into(),
            ..Default::default()
        }
    }

    /// Remaining cooldown at `now_ms`, zero if not cooling or elapsed.
    pub fn cooldown_remaining_ms(&self, now_ms: u64) -> u64 {
        match (self.status, self.cooldown_ends_at) {
            (TargetStatus::Cooling, Some(ends)) => ends.saturating_sub(now_ms),
            _ => 0,
        }
    }
}

/// Read-model of one route's runtime health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteState {
    pub route_id: RouteId,
    pub route_name: String,
    pub status: RouteHealth,
    /// Level of the first layer with at least one healthy target.
    pub active_layer: i32,
    pub layers: Vec<LayerState>,
}

/// Aggregate health of a route, derived from its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Read-model of one layer's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerState {
    pub level: i32,
    pub status: LayerStanding,
    pub targets: Vec<TargetState>,
}

/// Whether a layer is currently serving, waiting, or out of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStanding {
    Active,
    Standby,
    Exhausted,
}

/// Whole-system state summary for operator display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateOverview {
    pub routing_enabled: bool,
    pub hide_upstream_models: bool,
    pub total_routes: usize,
    pub healthy_routes: usize,
    pub degraded_routes: usize,
    pub unhealthy_routes: usize,
    pub routes: Vec<RouteState>,
}

// ── Tracing ────────────────────────────────────────────────────────

/// Terminal status of one logical routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// First attempt succeeded.
    Success,
    /// Succeeded after retrying within the same layer.
    Retry,
    /// Succeeded after falling back to a later layer.
    Fallback,
    /// All layers exhausted.
    Failed,
}

/// Outcome of a single attempt within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    /// Cancelled before/while running; never counts as a target failure.
    Skipped,
}

/// The recorded sequence of attempts made to satisfy one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTrace {
    pub trace_id: String,
    pub route_id: RouteId,
    pub route_name: String,
    /// Unix timestamp (ms) when routing started.
    pub timestamp: u64,
    pub status: TraceStatus,
    pub total_latency_ms: u64,
    pub attempts: Vec<AttemptTrace>,
}

impl RequestTrace {
    /// Composite key for the traces table (chronological ordering).
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.trace_id)
    }
}

/// One attempt against one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptTrace {
    /// 1-based position within the trace.
    pub attempt: u32,
    pub layer: i32,
    pub target_id: TargetId,
    pub credential_id: String,
    pub model: String,
    pub status: AttemptStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Events ─────────────────────────────────────────────────────────

/// Kind of a discrete routing occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingEventType {
    TargetFailed,
    TargetRecovered,
    LayerFallback,
    CooldownStarted,
    CooldownEnded,
}

/// Fire-and-forget observability record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: RoutingEventType,
    /// Unix timestamp (ms).
    pub timestamp: u64,
    pub route_id: RouteId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<TargetId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl RoutingEvent {
    /// Composite key for the events table (chronological ordering).
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.id)
    }
}

// ── Health checks ──────────────────────────────────────────────────

/// Result of a single health probe against one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResult {
    pub target_id: TargetId,
    pub credential_id: String,
    pub model: String,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix timestamp (ms).
    pub checked_at: u64,
}

/// Verdict of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
}

// ── Statistics ─────────────────────────────────────────────────────

/// Aggregation window for stats queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StatsPeriod {
    #[default]
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl StatsPeriod {
    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        const HOUR: u64 = 60 * 60 * 1000;
        match self {
            StatsPeriod::LastHour => HOUR,
            StatsPeriod::LastDay => 24 * HOUR,
            StatsPeriod::LastWeek => 7 * 24 * HOUR,
            StatsPeriod::LastMonth => 30 * 24 * HOUR,
        }
    }
}

/// Filter for stats aggregation.
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub period: StatsPeriod,
}

/// Filter for trace queries (newest first).
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub route_id: Option<RouteId>,
    pub status: Option<TraceStatus>,
    /// 0 means no limit.
    pub limit: usize,
    pub offset: usize,
}

/// Filter for event queries (newest first).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<RoutingEventType>,
    pub route_id: Option<RouteId>,
    /// 0 means no limit.
    pub limit: usize,
    pub offset: usize,
}

/// Aggregated statistics over traces within a period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AggregatedStats {
    pub period: StatsPeriod,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// 0.0–1.0.
    pub success_rate: f64,
    pub avg_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_distribution: Vec<LayerDistribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_distribution: Vec<TargetDistribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts_distribution: Vec<AttemptsDistribution>,
}

/// Which layer ultimately served requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerDistribution {
    pub level: i32,
    pub requests: u64,
    pub percentage: f64,
}

/// Per-target share of served requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetDistribution {
    pub target_id: TargetId,
    pub credential_id: String,
    pub requests: u64,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
}

/// How many attempts successful requests needed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptsDistribution {
    pub attempts: u32,
    pub count: u64,
    /// Percentage of successful requests.
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_wire_names() {
        let s: LoadStrategy = serde_json::from_str("\"weighted-round-robin\"").unwrap();
        assert_eq!(s, LoadStrategy::WeightedRoundRobin);
        assert_eq!(
            serde_json::to_string(&LoadStrategy::LeastConnections).unwrap(),
            "\"least-connections\""
        );
    }

    #[test]
    fn default_strategy_is_round_robin() {
        assert_eq!(LoadStrategy::default(), LoadStrategy::RoundRobin);
    }

    #[test]
    fn effective_weight_floors_at_one() {
        let mut target = Target {
            id: "t1".into(),
            credential_id: "c1".into(),
            model: "m".into(),
            weight: -3,
            enabled: true,
        };
        assert_eq!(target.effective_weight(), 1);
        target.weight = 0;
        assert_eq!(target.effective_weight(), 1);
        target.weight = 7;
        assert_eq!(target.effective_weight(), 7);
    }

    #[test]
    fn layers_sorted_by_level() {
        let pipeline = Pipeline {
            route_id: "r1".into(),
            layers: vec![
                Layer {
                    level: 5,
                    strategy: LoadStrategy::Random,
                    cooldown_seconds: 0,
                    targets: vec![],
                },
                Layer {
                    level: 1,
                    strategy: LoadStrategy::RoundRobin,
                    cooldown_seconds: 0,
                    targets: vec![],
                },
            ],
        };
        let sorted = pipeline.layers_sorted();
        assert_eq!(sorted[0].level, 1);
        assert_eq!(sorted[1].level, 5);
    }

    #[test]
    fn cooldown_remaining() {
        let mut state = TargetState::new("t1");
        assert_eq!(state.cooldown_remaining_ms(1_000), 0);

        state.status = TargetStatus::Cooling;
        state.cooldown_ends_at = Some(5_000);
        assert_eq!(state.cooldown_remaining_ms(1_000), 4_000);
        assert_eq!(state.cooldown_remaining_ms(9_000), 0);
    }

    #[test]
    fn trace_key_is_chronological() {
        let early = RequestTrace {
            trace_id: "trace-zzzz".into(),
            route_id: "r1".into(),
            route_name: "fast".into(),
            timestamp: 100,
            status: TraceStatus::Success,
            total_latency_ms: 5,
            attempts: vec![],
        };
        let late = RequestTrace {
            trace_id: "trace-aaaa".into(),
            timestamp: 200,
            ..early.clone()
        };
        assert!(early.table_key() < late.table_key());
    }

    #[test]
    fn health_config_defaults() {
        let cfg = HealthCheckConfig::default();
        assert_eq!(cfg.default_cooldown_seconds, 60);
        assert_eq!(cfg.check_interval_seconds, 30);
        assert_eq!(cfg.check_timeout_seconds, 10);
        assert_eq!(cfg.max_consecutive_failures, 3);
    }

    #[test]
    fn stats_period_windows() {
        assert_eq!(StatsPeriod::LastHour.window_ms(), 3_600_000);
        assert_eq!(StatsPeriod::LastDay.window_ms(), 86_400_000);
    }
}

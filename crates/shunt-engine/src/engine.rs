//! Failover engine — the per-request routing state machine.
//!
//! One `route()` call walks a route's layers in level order, asking the
//! selector for a target, invoking the injected call capability, and
//! recording each outcome. Per-target failures are absorbed (cooldown
//! started, attempt traced, next target tried); only terminal
//! conditions reach the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shunt_config::ConfigService;
use shunt_metrics::MetricsCollector;
use shunt_state::{
    AttemptStatus, Layer, LayerStanding, LayerState, RequestTrace, Route, RouteHealth, RouteState,
    RoutingEventType, StateOverview, Target, TargetId, now_millis,
};

use crate::cooldown::{CooldownPolicy, FailureReason};
use crate::error::{EngineError, EngineResult};
use crate::selector::Selector;
use crate::state::TargetStateManager;
use crate::trace::TraceBuilder;

/// A failed upstream invocation, carrying the classified reason that
/// feeds the cooldown policy.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct InvokeError {
    pub reason: FailureReason,
    pub message: String,
}

impl InvokeError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Upstream, message)
    }
}

/// The injected call capability. Implementations perform the actual
/// upstream request (or health probe); the engine neither knows nor
/// cares how.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        credential_id: &str,
        model: &str,
        payload: &Value,
    ) -> Result<Value, InvokeError>;
}

/// Result of a successfully routed request.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub result: Value,
    pub trace: RequestTrace,
}

/// The routing engine. Cheap to clone; all clones share the same
/// target state, cursors, and metrics sink.
#[derive(Clone)]
pub struct Engine {
    config: ConfigService,
    states: Arc<TargetStateManager>,
    selector: Arc<Selector>,
    metrics: MetricsCollector,
    invoker: Arc<dyn Invoker>,
}

impl Engine {
    pub fn new(
        config: ConfigService,
        states: Arc<TargetStateManager>,
        metrics: MetricsCollector,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            config,
            states,
            selector: Arc::new(Selector::new()),
            metrics,
            invoker,
        }
    }

    pub fn states(&self) -> &Arc<TargetStateManager> {
        &self.states
    }

    /// Whether the routing master switch is on.
    pub fn is_enabled(&self) -> EngineResult<bool> {
        Ok(self.config.settings()?.enabled)
    }

    /// Route one logical request. Attempts are strictly sequential:
    /// layers in ascending level order, targets within a layer until it
    /// is exhausted. `cancel` flipping to true stops further attempts
    /// and propagates as [`EngineError::Cancelled`] without cooling
    /// down any target.
    pub async fn route(
        &self,
        route_id: &str,
        payload: &Value,
        cancel: watch::Receiver<bool>,
    ) -> EngineResult<RouteOutcome> {
        let settings = self.config.settings()?;
        if !settings.enabled {
            return Err(EngineError::RoutingDisabled);
        }
        let route = self.config.get_route(route_id)?;
        if !route.enabled {
            return Err(EngineError::RouteDisabled(route.id));
        }

        let pipeline = self.config.get_pipeline(route_id)?;
        let health = self.config.health_config()?;
        let layers = pipeline.layers_sorted();

        let mut builder = TraceBuilder::new(&route);
        debug!(%route_id, trace_id = %builder.trace_id(), layers = layers.len(), "routing request");

        for (layer_idx, layer) in layers.iter().enumerate() {
            let cooldown_floor = if layer.cooldown_seconds > 0 {
                layer.cooldown_seconds
            } else {
                health.default_cooldown_seconds
            };
            let policy = CooldownPolicy::with_floor(Duration::from_secs(cooldown_floor as u64));
            let layer_key = format!("{}:{}", route.id, layer.level);
            let mut exclude: HashSet<TargetId> = HashSet::new();

            loop {
                if *cancel.borrow() {
                    return self.finish_cancelled(builder);
                }

                let Some(target) =
                    self.selector
                        .select(&layer_key, layer, &self.states, &exclude)
                else {
                    // Layer exhausted.
                    if layer_idx + 1 < layers.len() {
                        debug!(%route_id, level = layer.level, "layer exhausted, falling back");
                        self.metrics.record_event(
                            RoutingEventType::LayerFallback,
                            &route.id,
                            None,
                            HashMap::from([
                                ("from_level".into(), json!(layer.level)),
                                ("to_level".into(), json!(layers[layer_idx + 1].level)),
                            ]),
                        );
                    }
                    break;
                };

                let was_cooling = self.states.is_in_cooldown(&target.id);
                let guard = self.states.acquire_connection(&target.id);
                let started = Instant::now();

                let outcome = tokio::select! {
                    result = self.invoker.invoke(&target.credential_id, &target.model, payload) => Some(result),
                    _ = wait_cancelled(cancel.clone()) => None,
                };
                let latency_ms = started.elapsed().as_millis() as u64;
                drop(guard);

                match outcome {
                    None => {
                        // Cancelled mid-call: no failure, no cooldown.
                        builder.record_attempt(
                            layer.level,
                            &target,
                            AttemptStatus::Skipped,
                            latency_ms,
                            None,
                        );
                        return self.finish_cancelled(builder);
                    }
                    Some(Ok(result)) => {
                        self.states.record_success(&target.id);
                        builder.record_attempt(
                            layer.level,
                            &target,
                            AttemptStatus::Success,
                            latency_ms,
                            None,
                        );
                        if was_cooling {
                            self.metrics.record_event(
                                RoutingEventType::TargetRecovered,
                                &route.id,
                                Some(&target.id),
                                HashMap::new(),
                            );
                        }
                        let trace = builder.finish();
                        info!(
                            %route_id,
                            trace_id = %trace.trace_id,
                            target_id = %target.id,
                            status = ?trace.status,
                            attempts = trace.attempts.len(),
                            "request routed"
                        );
                        self.metrics.record_trace(trace.clone());
                        return Ok(RouteOutcome { result, trace });
                    }
                    Some(Err(e)) => {
                        let applied =
                            self.states
                                .record_failure(&target.id, &e.reason, &policy);
                        builder.record_attempt(
                            layer.level,
                            &target,
                            AttemptStatus::Failed,
                            latency_ms,
                            Some(e.message.clone()),
                        );
                        self.metrics.record_event(
                            RoutingEventType::TargetFailed,
                            &route.id,
                            Some(&target.id),
                            HashMap::from([
                                ("reason".into(), json!(e.reason.label())),
                                ("error".into(), json!(e.message)),
                            ]),
                        );
                        self.metrics.record_event(
                            RoutingEventType::CooldownStarted,
                            &route.id,
                            Some(&target.id),
                            HashMap::from([
                                ("reason".into(), json!(e.reason.label())),
                                ("cooldown_seconds".into(), json!(applied.as_secs())),
                            ]),
                        );
                        exclude.insert(target.id);
                    }
                }
            }
        }

        let attempts = builder.attempts();
        let trace = builder.finish();
        warn!(%route_id, trace_id = %trace.trace_id, attempts, "all layers exhausted");
        self.metrics.record_trace(trace);
        Err(EngineError::AllLayersExhausted {
            route_id: route_id.to_string(),
            attempts,
        })
    }

    fn finish_cancelled(&self, builder: TraceBuilder) -> EngineResult<RouteOutcome> {
        let trace = builder.finish();
        debug!(trace_id = %trace.trace_id, "request cancelled");
        self.metrics.record_trace(trace);
        Err(EngineError::Cancelled)
    }

    /// Run one selection round against a layer without invoking
    /// anything. Used by route simulation.
    pub fn select_target(&self, route_id: &str, level: i32) -> EngineResult<Option<Target>> {
        let route = self.config.get_route(route_id)?;
        let pipeline = self.config.get_pipeline(route_id)?;
        let Some(layer) = pipeline.layers.iter().find(|l| l.level == level) else {
            return Ok(None);
        };
        let layer_key = format!("{}:{}", route.id, layer.level);
        Ok(self
            .selector
            .select(&layer_key, layer, &self.states, &HashSet::new()))
    }

    // ── Read models ────────────────────────────────────────────────

    /// Runtime state of one route, derived from config plus the target
    /// state table.
    pub fn route_state(&self, route_id: &str) -> EngineResult<RouteState> {
        let route = self.config.get_route(route_id)?;
        let pipeline = self.config.get_pipeline(route_id)?;
        Ok(self.build_route_state(&route, &pipeline.layers_sorted()))
    }

    /// Whole-system state summary.
    pub fn overview(&self) -> EngineResult<StateOverview> {
        let settings = self.config.settings()?;
        let mut routes = Vec::new();
        for route in self.config.list_routes()? {
            let pipeline = self.config.get_pipeline(&route.id)?;
            routes.push(self.build_route_state(&route, &pipeline.layers_sorted()));
        }

        let healthy = routes
            .iter()
            .filter(|r| r.status == RouteHealth::Healthy)
            .count();
        let degraded = routes
            .iter()
            .filter(|r| r.status == RouteHealth::Degraded)
            .count();
        let unhealthy = routes
            .iter()
            .filter(|r| r.status == RouteHealth::Unhealthy)
            .count();

        Ok(StateOverview {
            routing_enabled: settings.enabled,
            hide_upstream_models: settings.hide_upstream_models,
            total_routes: routes.len(),
            healthy_routes: healthy,
            degraded_routes: degraded,
            unhealthy_routes: unhealthy,
            routes,
        })
    }

    fn build_route_state(&self, route: &Route, layers: &[Layer]) -> RouteState {
        let now = now_millis();
        let active_layer = layers
            .iter()
            .find(|layer| {
                layer
                    .targets
                    .iter()
                    .any(|t| self.states.is_eligible(t, now))
            })
            .map(|l| l.level);

        let mut all_eligible = true;
        let layer_states: Vec<LayerState> = layers
            .iter()
            .map(|layer| {
                let eligible = layer
                    .targets
                    .iter()
                    .filter(|t| self.states.is_eligible(t, now))
                    .count();
                all_eligible &= eligible == layer.targets.len();

                let status = if eligible == 0 {
                    LayerStanding::Exhausted
                } else if Some(layer.level) == active_layer {
                    LayerStanding::Active
                } else {
                    LayerStanding::Standby
                };
                LayerState {
                    level: layer.level,
                    status,
                    targets: layer
                        .targets
                        .iter()
                        .map(|t| self.states.display_state(&t.id))
                        .collect(),
                }
            })
            .collect();

        let status = match active_layer {
            None => RouteHealth::Unhealthy,
            Some(level) if all_eligible && Some(level) == layers.first().map(|l| l.level) => {
                RouteHealth::Healthy
            }
            Some(_) => RouteHealth::Degraded,
        };

        RouteState {
            route_id: route.id.clone(),
            route_name: route.name.clone(),
            status,
            active_layer: active_layer.unwrap_or(-1),
            layers: layer_states,
        }
    }
}

/// Resolves once the cancellation flag flips to true; pends forever if
/// the sender is dropped without cancelling.
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

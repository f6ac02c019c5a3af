//! Health checker — on-demand probes against configured targets.
//!
//! A probe is just another invocation: it goes through the same
//! [`Invoker`] seam and feeds the same state manager as live traffic,
//! so a failing probe cools a target down and a passing probe recovers
//! it, exactly like a real request would.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};

use shunt_config::{ConfigError, ConfigService};
use shunt_engine::{CooldownPolicy, FailureReason, Invoker, TargetStateManager};
use shunt_metrics::MetricsCollector;
use shunt_state::{HealthResult, ProbeStatus, RoutingEventType, Target, now_millis};

/// Probe results kept for display.
const HISTORY_CAPACITY: usize = 1000;

/// Probes targets and records the outcomes into target state.
pub struct HealthChecker {
    config: ConfigService,
    states: Arc<TargetStateManager>,
    metrics: MetricsCollector,
    invoker: Arc<dyn Invoker>,
    history: RwLock<VecDeque<HealthResult>>,
}

impl HealthChecker {
    pub fn new(
        config: ConfigService,
        states: Arc<TargetStateManager>,
        metrics: MetricsCollector,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            config,
            states,
            metrics,
            invoker,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Probe one target within the configured timeout. The outcome is
    /// recorded into target state either way.
    pub async fn check_target(
        &self,
        route_id: &str,
        target: &Target,
    ) -> Result<HealthResult, ConfigError> {
        let health = self.config.health_config()?;
        let timeout = Duration::from_secs(health.check_timeout_seconds);
        let policy =
            CooldownPolicy::with_floor(Duration::from_secs(health.default_cooldown_seconds as u64));

        let payload = json!({"health_check": true});
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.invoker
                .invoke(&target.credential_id, &target.model, &payload),
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(_)) => {
                self.states.record_success(&target.id);
                debug!(target_id = %target.id, latency_ms, "probe passed");
                HealthResult {
                    target_id: target.id.clone(),
                    credential_id: target.credential_id.clone(),
                    model: target.model.clone(),
                    status: ProbeStatus::Healthy,
                    latency_ms: Some(latency_ms),
                    message: None,
                    checked_at: now_millis(),
                }
            }
            Ok(Err(e)) => {
                self.record_probe_failure(route_id, target, e.reason, e.message, latency_ms, &policy)
            }
            Err(_) => self.record_probe_failure(
                route_id,
                target,
                FailureReason::Timeout,
                format!("probe timed out after {}s", timeout.as_secs()),
                latency_ms,
                &policy,
            ),
        };

        self.remember(result.clone());
        Ok(result)
    }

    fn record_probe_failure(
        &self,
        route_id: &str,
        target: &Target,
        reason: FailureReason,
        message: String,
        latency_ms: u64,
        policy: &CooldownPolicy,
    ) -> HealthResult {
        let applied = self.states.record_failure(&target.id, &reason, policy);
        warn!(target_id = %target.id, reason = %reason, %message, "probe failed");
        self.metrics.record_event(
            RoutingEventType::CooldownStarted,
            route_id,
            Some(&target.id),
            [
                ("reason".to_string(), json!(reason.label())),
                ("cooldown_seconds".to_string(), json!(applied.as_secs())),
                ("source".to_string(), json!("health_check")),
            ]
            .into(),
        );
        HealthResult {
            target_id: target.id.clone(),
            credential_id: target.credential_id.clone(),
            model: target.model.clone(),
            status: ProbeStatus::Unhealthy,
            latency_ms: Some(latency_ms),
            message: Some(message),
            checked_at: now_millis(),
        }
    }

    /// Probe every enabled target in a route's pipeline, sequentially.
    pub async fn check_route(&self, route_id: &str) -> Result<Vec<HealthResult>, ConfigError> {
        let pipeline = self.config.get_pipeline(route_id)?;
        let mut results = Vec::new();
        for layer in pipeline.layers_sorted() {
            for target in layer.targets.iter().filter(|t| t.enabled) {
                results.push(self.check_target(route_id, target).await?);
            }
        }
        Ok(results)
    }

    /// Probe every enabled target in every route.
    pub async fn check_all(&self) -> Result<Vec<HealthResult>, ConfigError> {
        let mut results = Vec::new();
        for route in self.config.list_routes()? {
            results.extend(self.check_route(&route.id).await?);
        }
        Ok(results)
    }

    /// Most recent probe results, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HealthResult> {
        let history = self.history.read().expect("history lock");
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent probe results for one target, newest first.
    pub fn recent_for_target(&self, target_id: &str, limit: usize) -> Vec<HealthResult> {
        let history = self.history.read().expect("history lock");
        history
            .iter()
            .rev()
            .filter(|r| r.target_id == target_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn remember(&self, result: HealthResult) {
        let mut history = self.history.write().expect("history lock");
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result);
    }
}

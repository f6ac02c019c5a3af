//! Background probe loop.
//!
//! Every interval (re-read from config each cycle, so changes apply
//! without a restart) the monitor probes all targets and flips expired
//! cooldowns back to healthy. The flip is display sugar only; target
//! eligibility never depends on this loop running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use shunt_config::ConfigService;
use shunt_engine::TargetStateManager;
use shunt_metrics::MetricsCollector;
use shunt_state::RoutingEventType;

use crate::checker::HealthChecker;

/// Owns the periodic health-check task.
pub struct HealthMonitor {
    config: ConfigService,
    states: Arc<TargetStateManager>,
    metrics: MetricsCollector,
    checker: Arc<HealthChecker>,
}

impl HealthMonitor {
    pub fn new(
        config: ConfigService,
        states: Arc<TargetStateManager>,
        metrics: MetricsCollector,
        checker: Arc<HealthChecker>,
    ) -> Self {
        Self {
            config,
            states,
            metrics,
            checker,
        }
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("health monitor started");
        loop {
            let interval = match self.config.health_config() {
                Ok(cfg) => Duration::from_secs(cfg.check_interval_seconds.max(1)),
                Err(e) => {
                    warn!(error = %e, "failed to load health config, using fallback interval");
                    Duration::from_secs(30)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender means no one can cancel us
                    // anymore; stop rather than spin.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("health monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One probe sweep plus expired-cooldown cleanup.
    pub async fn run_cycle(&self) {
        if let Err(e) = self.checker.check_all().await {
            warn!(error = %e, "health check sweep failed");
        }

        let flipped = self.states.cleanup_expired();
        if flipped.is_empty() {
            return;
        }
        let route_of_target = self.target_route_index();
        for target_id in flipped {
            let route_id = route_of_target
                .get(&target_id)
                .cloned()
                .unwrap_or_default();
            self.metrics.record_event(
                RoutingEventType::CooldownEnded,
                &route_id,
                Some(&target_id),
                HashMap::new(),
            );
        }
    }

    /// Map every configured target to the route whose pipeline holds it.
    fn target_route_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::new();
        let Ok(routes) = self.config.list_routes() else {
            return index;
        };
        for route in routes {
            let Ok(pipeline) = self.config.get_pipeline(&route.id) else {
                continue;
            };
            for layer in &pipeline.layers {
                for target in &layer.targets {
                    index.insert(target.id.clone(), route.id.clone());
                }
            }
        }
        index
    }
}

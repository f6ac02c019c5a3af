//! MetricsCollector — trace and event recording plus stats queries.
//!
//! Recording is best effort: a failed store write is logged and dropped,
//! never surfaced to the request path that produced the trace.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shunt_state::{
    AggregatedStats, EventFilter, RequestTrace, RoutingEvent, RoutingEventType, StateResult,
    StatsFilter, Store, TraceFilter, now_millis,
};

use crate::stats;

/// Records traces and events into the store and answers stats queries.
/// Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct MetricsCollector {
    store: Store,
}

impl MetricsCollector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // ── Recording ──────────────────────────────────────────────────

    /// Record a finished request trace. Fills in the trace id and
    /// timestamp when the producer left them empty.
    pub fn record_trace(&self, mut trace: RequestTrace) {
        if trace.trace_id.is_empty() {
            trace.trace_id = format!("trace-{}", short_id());
        }
        if trace.timestamp == 0 {
            trace.timestamp = now_millis();
        }
        if let Err(e) = self.store.record_trace(&trace) {
            warn!(trace_id = %trace.trace_id, error = %e, "failed to record trace");
        }
    }

    /// Record a discrete routing event.
    pub fn record_event(
        &self,
        event_type: RoutingEventType,
        route_id: &str,
        target_id: Option<&str>,
        details: HashMap<String, serde_json::Value>,
    ) {
        let event = RoutingEvent {
            id: format!("evt-{}", short_id()),
            event_type,
            timestamp: now_millis(),
            route_id: route_id.to_string(),
            target_id: target_id.map(str::to_string),
            details,
        };
        debug!(event_id = %event.id, ?event_type, %route_id, "routing event");
        if let Err(e) = self.store.record_event(&event) {
            warn!(event_id = %event.id, error = %e, "failed to record event");
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn traces(&self, filter: &TraceFilter) -> StateResult<Vec<RequestTrace>> {
        self.store.list_traces(filter)
    }

    pub fn trace(&self, trace_id: &str) -> StateResult<Option<RequestTrace>> {
        self.store.get_trace(trace_id)
    }

    pub fn events(&self, filter: &EventFilter) -> StateResult<Vec<RoutingEvent>> {
        self.store.list_events(filter)
    }

    /// Aggregate stats over all traces in the filter's window.
    pub fn stats(&self, filter: &StatsFilter) -> StateResult<AggregatedStats> {
        let traces = self.store.list_traces(&TraceFilter::default())?;
        Ok(stats::aggregate(&traces, filter, now_millis()))
    }

    /// Stats restricted to a single route.
    pub fn route_stats(&self, route_id: &str, filter: &StatsFilter) -> StateResult<AggregatedStats> {
        let traces = self.store.list_traces(&TraceFilter {
            route_id: Some(route_id.to_string()),
            ..Default::default()
        })?;
        Ok(stats::aggregate(&traces, filter, now_millis()))
    }

    /// Stats restricted to traces that attempted a single target. The
    /// target distribution in the result contains only that target.
    pub fn target_stats(
        &self,
        target_id: &str,
        filter: &StatsFilter,
    ) -> StateResult<AggregatedStats> {
        let mut traces = self.store.list_traces(&TraceFilter::default())?;
        traces.retain(|t| t.attempts.iter().any(|a| a.target_id == target_id));
        let mut aggregated = stats::aggregate(&traces, filter, now_millis());
        aggregated
            .target_distribution
            .retain(|d| d.target_id == target_id);
        Ok(aggregated)
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Periodically prune traces and events older than `max_age` until
    /// the shutdown signal flips.
    pub async fn run_retention(
        &self,
        max_age: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(max_age_secs = max_age.as_secs(), "retention loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = now_millis().saturating_sub(max_age.as_millis() as u64);
                    match self.store.prune_older_than(cutoff) {
                        Ok(removed) if removed > 0 => {
                            debug!(removed, "pruned stale traces and events");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "retention prune failed"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means no one can cancel us
                    // anymore; stop rather than spin.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("retention loop stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// 8-hex-char id fragment.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shunt_state::{AttemptStatus, AttemptTrace, TraceStatus};

    fn collector() -> MetricsCollector {
        MetricsCollector::new(Store::open_in_memory().unwrap())
    }

    fn trace(route_id: &str, target_id: &str, status: TraceStatus) -> RequestTrace {
        let attempt_status = match status {
            TraceStatus::Failed => AttemptStatus::Failed,
            _ => AttemptStatus::Success,
        };
        RequestTrace {
            trace_id: String::new(),
            route_id: route_id.to_string(),
            route_name: "fast".into(),
            timestamp: 0,
            status,
            total_latency_ms: 100,
            attempts: vec![AttemptTrace {
                attempt: 1,
                layer: 1,
                target_id: target_id.to_string(),
                credential_id: "cred-1".into(),
                model: "gpt-test".into(),
                status: attempt_status,
                latency_ms: 100,
                error: None,
            }],
        }
    }

    #[test]
    fn record_trace_fills_id_and_timestamp() {
        let collector = collector();
        collector.record_trace(trace("r1", "t1", TraceStatus::Success));

        let traces = collector.traces(&TraceFilter::default()).unwrap();
        assert_eq!(traces.len(), 1);
        assert!(traces[0].trace_id.starts_with("trace-"));
        assert!(traces[0].timestamp > 0);
    }

    #[test]
    fn record_event_assigns_id() {
        let collector = collector();
        collector.record_event(RoutingEventType::CooldownStarted, "r1", Some("t1"), HashMap::new());

        let events = collector.events(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].id.starts_with("evt-"));
        assert_eq!(events[0].target_id.as_deref(), Some("t1"));
    }

    #[test]
    fn stats_aggregate_recorded_traces() {
        let collector = collector();
        collector.record_trace(trace("r1", "t1", TraceStatus::Success));
        collector.record_trace(trace("r1", "t1", TraceStatus::Failed));
        collector.record_trace(trace("r2", "t2", TraceStatus::Success));

        let all = collector.stats(&StatsFilter::default()).unwrap();
        assert_eq!(all.total_requests, 3);
        assert_eq!(all.failed_requests, 1);

        let r1 = collector.route_stats("r1", &StatsFilter::default()).unwrap();
        assert_eq!(r1.total_requests, 2);
    }

    #[test]
    fn target_stats_narrow_to_one_target() {
        let collector = collector();
        collector.record_trace(trace("r1", "t1", TraceStatus::Success));
        collector.record_trace(trace("r1", "t2", TraceStatus::Success));

        let t1 = collector.target_stats("t1", &StatsFilter::default()).unwrap();
        assert_eq!(t1.total_requests, 1);
        assert_eq!(t1.target_distribution.len(), 1);
        assert_eq!(t1.target_distribution[0].target_id, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn retention_stops_on_shutdown() {
        let collector = collector();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let collector = collector.clone();
            async move {
                collector
                    .run_retention(Duration::from_secs(3600), Duration::from_secs(60), rx)
                    .await
            }
        });

        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retention_stops_when_sender_dropped() {
        let collector = collector();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let collector = collector.clone();
            async move {
                collector
                    .run_retention(Duration::from_secs(3600), Duration::from_secs(60), rx)
                    .await
            }
        });

        tokio::task::yield_now().await;
        drop(tx);
        handle.await.unwrap();
    }
}

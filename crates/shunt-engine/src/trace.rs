//! TraceBuilder — accumulates attempts for one logical request and
//! derives the terminal trace status.

use std::time::Instant;

use uuid::Uuid;

use shunt_state::{AttemptStatus, AttemptTrace, RequestTrace, Route, Target, TraceStatus, now_millis};

/// Builds the immutable [`RequestTrace`] for one `route()` call.
pub struct TraceBuilder {
    trace_id: String,
    route_id: String,
    route_name: String,
    timestamp: u64,
    started: Instant,
    attempts: Vec<AttemptTrace>,
}

impl TraceBuilder {
    pub fn new(route: &Route) -> Self {
        Self {
            trace_id: format!("trace-{}", short_id()),
            route_id: route.id.clone(),
            route_name: route.name.clone(),
            timestamp: now_millis(),
            started: Instant::now(),
            attempts: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Number of attempts recorded so far.
    pub fn attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Append one attempt outcome.
    pub fn record_attempt(
        &mut self,
        layer: i32,
        target: &Target,
        status: AttemptStatus,
        latency_ms: u64,
        error: Option<String>,
    ) {
        self.attempts.push(AttemptTrace {
            attempt: self.attempts.len() as u32 + 1,
            layer,
            target_id: target.id.clone(),
            credential_id: target.credential_id.clone(),
            model: target.model.clone(),
            status,
            latency_ms,
            error,
        });
    }

    /// Finalize the trace. The terminal status is derived from the
    /// attempt sequence:
    /// - one successful attempt → `success`
    /// - success after failures in the same layer → `retry`
    /// - success after failures in an earlier layer → `fallback`
    /// - no successful attempt → `failed`
    pub fn finish(self) -> RequestTrace {
        let status = match self.attempts.last() {
            Some(last) if last.status == AttemptStatus::Success => {
                if self.attempts.len() == 1 {
                    TraceStatus::Success
                } else if self.attempts[..self.attempts.len() - 1]
                    .iter()
                    .any(|a| a.layer != last.layer)
                {
                    TraceStatus::Fallback
                } else {
                    TraceStatus::Retry
                }
            }
            _ => TraceStatus::Failed,
        };

        RequestTrace {
            trace_id: self.trace_id,
            route_id: self.route_id,
            route_name: self.route_name,
            timestamp: self.timestamp,
            status,
            total_latency_ms: self.started.elapsed().as_millis() as u64,
            attempts: self.attempts,
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route {
            id: "r1".into(),
            name: "fast".into(),
            description: String::new(),
            enabled: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn target(id: &str) -> Target {
        Target {
            id: id.to_string(),
            credential_id: "cred-1".into(),
            model: "gpt-test".into(),
            weight: 1,
            enabled: true,
        }
    }

    #[test]
    fn first_attempt_success() {
        let mut builder = TraceBuilder::new(&route());
        builder.record_attempt(1, &target("a"), AttemptStatus::Success, 10, None);
        let trace = builder.finish();
        assert_eq!(trace.status, TraceStatus::Success);
        assert!(trace.trace_id.starts_with("trace-"));
        assert_eq!(trace.attempts[0].attempt, 1);
    }

    #[test]
    fn same_layer_recovery_is_retry() {
        let mut builder = TraceBuilder::new(&route());
        builder.record_attempt(1, &target("a"), AttemptStatus::Failed, 10, Some("boom".into()));
        builder.record_attempt(1, &target("b"), AttemptStatus::Success, 10, None);
        assert_eq!(builder.finish().status, TraceStatus::Retry);
    }

    #[test]
    fn cross_layer_recovery_is_fallback() {
        let mut builder = TraceBuilder::new(&route());
        builder.record_attempt(1, &target("a"), AttemptStatus::Failed, 10, Some("boom".into()));
        builder.record_attempt(2, &target("b"), AttemptStatus::Success, 10, None);
        assert_eq!(builder.finish().status, TraceStatus::Fallback);
    }

    #[test]
    fn no_success_is_failed() {
        let mut builder = TraceBuilder::new(&route());
        builder.record_attempt(1, &target("a"), AttemptStatus::Failed, 10, Some("boom".into()));
        builder.record_attempt(2, &target("b"), AttemptStatus::Failed, 10, Some("boom".into()));
        assert_eq!(builder.attempts(), 2);
        assert_eq!(builder.finish().status, TraceStatus::Failed);
    }

    #[test]
    fn empty_trace_is_failed() {
        let builder = TraceBuilder::new(&route());
        assert_eq!(builder.finish().status, TraceStatus::Failed);
    }

    #[test]
    fn trailing_skip_is_failed() {
        let mut builder = TraceBuilder::new(&route());
        builder.record_attempt(1, &target("a"), AttemptStatus::Skipped, 0, None);
        assert_eq!(builder.finish().status, TraceStatus::Failed);
    }
}

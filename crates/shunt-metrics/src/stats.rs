//! Read-side aggregation over request traces.
//!
//! Pure functions: traces in, `AggregatedStats` out. The caller decides
//! which traces to feed in (global, per route, per target).

use std::collections::HashMap;

use shunt_state::{
    AggregatedStats, AttemptStatus, AttemptsDistribution, LayerDistribution, RequestTrace,
    StatsFilter, TargetDistribution, TraceStatus,
};

/// Aggregate stats over traces newer than the filter's window.
///
/// `now_ms` is passed in so windows are reproducible in tests.
pub fn aggregate(traces: &[RequestTrace], filter: &StatsFilter, now_ms: u64) -> AggregatedStats {
    let since = now_ms.saturating_sub(filter.period.window_ms());

    let mut stats = AggregatedStats {
        period: filter.period,
        ..Default::default()
    };

    let mut latencies: Vec<u64> = Vec::new();
    let mut layer_counts: HashMap<i32, u64> = HashMap::new();
    let mut attempts_counts: HashMap<u32, u64> = HashMap::new();
    let mut per_target: HashMap<String, TargetAccumulator> = HashMap::new();

    for trace in traces {
        if trace.timestamp < since {
            continue;
        }

        stats.total_requests += 1;
        latencies.push(trace.total_latency_ms);

        match trace.status {
            TraceStatus::Success | TraceStatus::Retry | TraceStatus::Fallback => {
                stats.successful_requests += 1;
            }
            TraceStatus::Failed => stats.failed_requests += 1,
        }

        for attempt in &trace.attempts {
            let acc = per_target
                .entry(attempt.target_id.clone())
                .or_insert_with(|| TargetAccumulator::new(&attempt.credential_id));
            match attempt.status {
                AttemptStatus::Success => {
                    acc.requests += 1;
                    acc.successes += 1;
                    acc.latency_sum += attempt.latency_ms;
                }
                AttemptStatus::Failed => acc.requests += 1,
                AttemptStatus::Skipped => {}
            }
        }

        // Layer and attempts distributions count the attempt that served
        // the request.
        if let Some((idx, winning)) = trace
            .attempts
            .iter()
            .enumerate()
            .find(|(_, a)| a.status == AttemptStatus::Success)
        {
            *layer_counts.entry(winning.layer).or_default() += 1;
            *attempts_counts.entry(idx as u32 + 1).or_default() += 1;
        }
    }

    if stats.total_requests > 0 {
        stats.success_rate = stats.successful_requests as f64 / stats.total_requests as f64;
        stats.avg_latency_ms = latencies.iter().sum::<u64>() / stats.total_requests;
    }
    let (p95, p99) = percentiles(&mut latencies);
    stats.p95_latency_ms = p95;
    stats.p99_latency_ms = p99;

    let mut layer_distribution: Vec<LayerDistribution> = layer_counts
        .into_iter()
        .map(|(level, requests)| LayerDistribution {
            level,
            requests,
            percentage: percentage(requests, stats.total_requests),
        })
        .collect();
    layer_distribution.sort_by_key(|d| d.level);
    stats.layer_distribution = layer_distribution;

    let mut target_distribution: Vec<TargetDistribution> = per_target
        .into_iter()
        .map(|(target_id, acc)| TargetDistribution {
            target_id,
            credential_id: acc.credential_id,
            requests: acc.requests,
            success_rate: if acc.requests > 0 {
                acc.successes as f64 / acc.requests as f64
            } else {
                0.0
            },
            avg_latency_ms: if acc.successes > 0 {
                acc.latency_sum / acc.successes
            } else {
                0
            },
        })
        .collect();
    target_distribution.sort_by(|a, b| a.target_id.cmp(&b.target_id));
    stats.target_distribution = target_distribution;

    let mut attempts_distribution: Vec<AttemptsDistribution> = attempts_counts
        .into_iter()
        .map(|(attempts, count)| AttemptsDistribution {
            attempts,
            count,
            percentage: percentage(count, stats.successful_requests),
        })
        .collect();
    attempts_distribution.sort_by_key(|d| d.attempts);
    stats.attempts_distribution = attempts_distribution;

    stats
}

struct TargetAccumulator {
    credential_id: String,
    requests: u64,
    successes: u64,
    latency_sum: u64,
}

impl TargetAccumulator {
    fn new(credential_id: &str) -> Self {
        Self {
            credential_id: credential_id.to_string(),
            requests: 0,
            successes: 0,
            latency_sum: 0,
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Compute (p95, p99) from latency samples. Sorts in place.
fn percentiles(latencies: &mut [u64]) -> (u64, u64) {
    if latencies.is_empty() {
        return (0, 0);
    }
    latencies.sort_unstable();

    let p95_idx = (latencies.len() as f64 * 0.95) as usize;
    let p99_idx = (latencies.len() as f64 * 0.99) as usize;

    let p95 = latencies[p95_idx.min(latencies.len() - 1)];
    let p99 = latencies[p99_idx.min(latencies.len() - 1)];
    (p95, p99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shunt_state::AttemptTrace;

    fn attempt(n: u32, layer: i32, target: &str, status: AttemptStatus, latency: u64) -> AttemptTrace {
        AttemptTrace {
            attempt: n,
            layer,
            target_id: target.to_string(),
            credential_id: format!("cred-{target}"),
            model: "gpt-test".into(),
            status,
            latency_ms: latency,
            error: (status == AttemptStatus::Failed).then(|| "upstream error".into()),
        }
    }

    fn trace(
        id: &str,
        timestamp: u64,
        status: TraceStatus,
        latency: u64,
        attempts: Vec<AttemptTrace>,
    ) -> RequestTrace {
        RequestTrace {
            trace_id: id.to_string(),
            route_id: "r1".into(),
            route_name: "fast".into(),
            timestamp,
            status,
            total_latency_ms: latency,
            attempts,
        }
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let stats = aggregate(&[], &StatsFilter::default(), 1_000_000);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.layer_distribution.is_empty());
    }

    #[test]
    fn counts_and_success_rate() {
        let now = 10_000_000;
        let traces = vec![
            trace("a", now - 10, TraceStatus::Success, 100, vec![
                attempt(1, 1, "t1", AttemptStatus::Success, 100),
            ]),
            trace("b", now - 20, TraceStatus::Fallback, 300, vec![
                attempt(1, 1, "t1", AttemptStatus::Failed, 50),
                attempt(2, 2, "t2", AttemptStatus::Success, 250),
            ]),
            trace("c", now - 30, TraceStatus::Failed, 80, vec![
                attempt(1, 1, "t1", AttemptStatus::Failed, 80),
            ]),
        ];

        let stats = aggregate(&traces, &StatsFilter::default(), now);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_latency_ms, (100 + 300 + 80) / 3);
    }

    #[test]
    fn window_excludes_old_traces() {
        let now = 100_000_000;
        let traces = vec![
            trace("old", 1_000, TraceStatus::Success, 10, vec![]),
            trace("new", now - 10, TraceStatus::Success, 10, vec![]),
        ];
        let stats = aggregate(&traces, &StatsFilter::default(), now);
        assert_eq!(stats.total_requests, 1);
    }

    #[test]
    fn layer_distribution_counts_serving_layer() {
        let now = 10_000_000;
        let traces = vec![
            trace("a", now, TraceStatus::Success, 10, vec![
                attempt(1, 1, "t1", AttemptStatus::Success, 10),
            ]),
            trace("b", now, TraceStatus::Fallback, 10, vec![
                attempt(1, 1, "t1", AttemptStatus::Failed, 5),
                attempt(2, 2, "t2", AttemptStatus::Success, 5),
            ]),
        ];
        let stats = aggregate(&traces, &StatsFilter::default(), now);
        assert_eq!(stats.layer_distribution.len(), 2);
        assert_eq!(stats.layer_distribution[0].level, 1);
        assert_eq!(stats.layer_distribution[0].requests, 1);
        assert_eq!(stats.layer_distribution[1].level, 2);
        assert_eq!(stats.layer_distribution[0].percentage, 50.0);
    }

    #[test]
    fn attempts_distribution_over_successes() {
        let now = 10_000_000;
        let traces = vec![
            trace("a", now, TraceStatus::Success, 10, vec![
                attempt(1, 1, "t1", AttemptStatus::Success, 10),
            ]),
            trace("b", now, TraceStatus::Retry, 10, vec![
                attempt(1, 1, "t1", AttemptStatus::Failed, 5),
                attempt(2, 1, "t2", AttemptStatus::Success, 5),
            ]),
            trace("c", now, TraceStatus::Failed, 10, vec![
                attempt(1, 1, "t1", AttemptStatus::Failed, 10),
            ]),
        ];
        let stats = aggregate(&traces, &StatsFilter::default(), now);
        assert_eq!(stats.attempts_distribution.len(), 2);
        assert_eq!(stats.attempts_distribution[0].attempts, 1);
        assert_eq!(stats.attempts_distribution[0].count, 1);
        assert_eq!(stats.attempts_distribution[0].percentage, 50.0);
        assert_eq!(stats.attempts_distribution[1].attempts, 2);
    }

    #[test]
    fn target_distribution_tracks_success_rate() {
        let now = 10_000_000;
        let traces = vec![trace("a", now, TraceStatus::Retry, 10, vec![
            attempt(1, 1, "t1", AttemptStatus::Failed, 5),
            attempt(2, 1, "t2", AttemptStatus::Success, 5),
        ])];
        let stats = aggregate(&traces, &StatsFilter::default(), now);
        assert_eq!(stats.target_distribution.len(), 2);

        let t1 = &stats.target_distribution[0];
        assert_eq!(t1.target_id, "t1");
        assert_eq!(t1.requests, 1);
        assert_eq!(t1.success_rate, 0.0);

        let t2 = &stats.target_distribution[1];
        assert_eq!(t2.success_rate, 1.0);
        assert_eq!(t2.avg_latency_ms, 5);
    }

    #[test]
    fn skipped_attempts_not_counted_against_targets() {
        let now = 10_000_000;
        let traces = vec![trace("a", now, TraceStatus::Failed, 10, vec![
            attempt(1, 1, "t1", AttemptStatus::Skipped, 0),
        ])];
        let stats = aggregate(&traces, &StatsFilter::default(), now);
        let t1 = &stats.target_distribution[0];
        assert_eq!(t1.requests, 0);
    }

    #[test]
    fn percentile_distribution() {
        let mut samples: Vec<u64> = (1..=100).collect();
        let (p95, p99) = percentiles(&mut samples);
        assert_eq!(p95, 96);
        assert_eq!(p99, 100);
    }

    #[test]
    fn percentile_single_sample() {
        let mut samples = vec![42];
        assert_eq!(percentiles(&mut samples), (42, 42));
    }
}

//! shunt-metrics — observability for the routing engine.
//!
//! The collector records per-request traces and discrete routing events
//! into the store (best effort, never on the request's critical path),
//! and answers read-side stats queries by aggregating over the immutable
//! trace records. It holds no engine-affecting state.

pub mod collector;
pub mod stats;

pub use collector::MetricsCollector;
pub use stats::aggregate;

//! shunt-health — target probing.
//!
//! [`HealthChecker`] runs on-demand probes through the same invoker and
//! state path as live traffic; [`HealthMonitor`] drives it on a timer.

pub mod checker;
pub mod monitor;

pub use checker::HealthChecker;
pub use monitor::HealthMonitor;

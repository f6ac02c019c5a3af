//! Engine error types.

use thiserror::Error;

/// Errors surfaced by the routing engine. Per-target invocation
/// failures are absorbed by the failover loop and never appear here;
/// only terminal conditions do.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("routing is disabled")]
    RoutingDisabled,

    #[error("route {0} is disabled")]
    RouteDisabled(String),

    #[error("no target could serve route {route_id}: all layers exhausted after {attempts} attempts")]
    AllLayersExhausted { route_id: String, attempts: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] shunt_config::ConfigError),

    #[error(transparent)]
    State(#[from] shunt_state::StateError),
}

pub type EngineResult<T> = Result<T, EngineError>;

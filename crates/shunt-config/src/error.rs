//! Configuration service error types.

use thiserror::Error;

use crate::validate::ValidationIssue;

/// Result type alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by the configuration service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("route already exists: {0}")]
    RouteAlreadyExists(String),

    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("store error: {0}")]
    State(#[from] shunt_state::StateError),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

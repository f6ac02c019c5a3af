//! shunt-config — configuration service for the Shunt routing gateway.
//!
//! Wraps the store with validation, default values, lazy pipeline
//! creation, and change notification. Collaborators (the engine, the
//! health checker) subscribe to [`ConfigChange`] events and reload
//! their caches without a restart.

pub mod error;
pub mod service;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use service::{ConfigChange, ConfigService};
pub use validate::ValidationIssue;

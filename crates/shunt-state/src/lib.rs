//! shunt-state — embedded store for the Shunt routing gateway.
//!
//! Backed by [redb](https://docs.rs/redb), holds the durable half of the
//! system: routing configuration (settings, health-check config, routes,
//! pipelines) and observability records (request traces, routing events).
//! Target runtime state is deliberately *not* persisted here — it lives in
//! the engine's in-memory state table and is rebuilt from scratch on
//! restart.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Trace and event keys embed a zero-padded timestamp
//! (`{timestamp_ms}:{id}`) so iteration order is chronological and recent
//! records can be read by scanning from the tail.
//!
//! The `Store` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::Store;
pub use types::*;

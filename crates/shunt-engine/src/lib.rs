//! shunt-engine — the routing/failover core.
//!
//! A logical request enters through [`Engine::route`], which walks the
//! route's pipeline layer by layer: the [`Selector`] picks an eligible
//! target per the layer's strategy, the injected [`Invoker`] performs
//! the call, and the [`TargetStateManager`] absorbs the outcome —
//! success clears any cooldown, failure starts one computed by the
//! [`CooldownPolicy`]. Every attempt lands in a [`RequestTrace`]
//! recorded through the metrics collector.
//!
//! [`RequestTrace`]: shunt_state::RequestTrace

pub mod cooldown;
pub mod engine;
pub mod error;
pub mod selector;
pub mod state;
pub mod trace;

pub use cooldown::{CooldownPolicy, FailureReason};
pub use engine::{Engine, InvokeError, Invoker, RouteOutcome};
pub use error::{EngineError, EngineResult};
pub use selector::Selector;
pub use state::{ConnectionGuard, TargetStateManager};
pub use trace::TraceBuilder;

//! Cooldown policy — pure failure-context → duration computation.
//!
//! Two branches. A provider-supplied reset hint is trusted directly,
//! capped at a long ceiling to bound the worst case. Without a hint the
//! duration backs off exponentially from a floor to a short ceiling.

use std::time::Duration;

/// Floor for the exponential path when nothing overrides it.
pub const DEFAULT_SHORT_COOLDOWN: Duration = Duration::from_secs(60);
/// Ceiling for the exponential path.
pub const MAX_SHORT_COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Ceiling for hint-based cooldowns.
pub const LONG_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Why an invocation failed. The reason selects the policy branch and
/// is stored on the target state for operator display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Upstream rejected the call for quota/rate reasons, optionally
    /// telling us when the window resets.
    RateLimited { reset_hint: Option<Duration> },
    /// The account behind the credential is suspended; cools down for
    /// the long ceiling since retrying sooner cannot help.
    AccountSuspended,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Credential rejected by the upstream.
    Auth,
    /// Upstream returned an error response.
    Upstream,
    /// Connection-level failure before any response.
    Network,
}

impl FailureReason {
    /// Stable tag used for retry-count scoping and stored as the
    /// target's last failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::RateLimited { .. } => "rate_limited",
            FailureReason::AccountSuspended => "account_suspended",
            FailureReason::Timeout => "timeout",
            FailureReason::Auth => "auth",
            FailureReason::Upstream => "upstream",
            FailureReason::Network => "network",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Cooldown duration policy. `default_short` is the per-layer floor
/// (the layer's cooldown override or the health-check default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub default_short: Duration,
    pub max_short: Duration,
    pub long_ceiling: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            default_short: DEFAULT_SHORT_COOLDOWN,
            max_short: MAX_SHORT_COOLDOWN,
            long_ceiling: LONG_COOLDOWN,
        }
    }
}

impl CooldownPolicy {
    /// Policy with a layer-specific floor. The short ceiling never
    /// drops below the floor, so a large layer override applies as-is.
    pub fn with_floor(default_short: Duration) -> Self {
        Self {
            default_short,
            max_short: MAX_SHORT_COOLDOWN.max(default_short),
            long_ceiling: LONG_COOLDOWN,
        }
    }

    /// Cooldown for a failure. `retry_count` is the number of
    /// consecutive prior failures with the same reason.
    pub fn duration_for(&self, reason: &FailureReason, retry_count: u32) -> Duration {
        match reason {
            FailureReason::RateLimited {
                reset_hint: Some(hint),
            } if !hint.is_zero() => {
                return (*hint).min(self.long_ceiling);
            }
            FailureReason::AccountSuspended => return self.long_ceiling,
            _ => {}
        }

        // Shift capped well before u64 overflow; max_short clamps long
        // before that anyway.
        let factor = 1u64 << retry_count.min(32);
        let backed_off = Duration::from_secs(self.default_short.as_secs().saturating_mul(factor));
        backed_off.min(self.max_short)
    }
}

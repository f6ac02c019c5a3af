//! TargetStateManager — the single writer of per-target runtime state.
//!
//! State is keyed by target id globally, not per route: a target stands
//! for one real credential/backend, so a cooldown triggered through one
//! route makes it ineligible everywhere. Entries are created lazily on
//! first reference and never deleted; an unknown target id reads as
//! healthy with zero counters.
//!
//! Correctness never depends on a background sweep. Eligibility always
//! compares `now` against the cooldown deadline at selection time;
//! `cleanup_expired` only flips the stored status proactively for
//! display.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use shunt_state::{Target, TargetId, TargetState, TargetStatus, now_millis};

use crate::cooldown::{CooldownPolicy, FailureReason};

/// Shared runtime state for all targets. Constructor-created and passed
/// by handle to the engine, selector, and health checker.
pub struct TargetStateManager {
    states: RwLock<HashMap<TargetId, TargetState>>,
}

impl TargetStateManager {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    // ── Outcome recording ──────────────────────────────────────────

    /// Record a successful call. Success is an authoritative recovery
    /// signal: it clears any cooldown regardless of concurrent failures
    /// reported slightly earlier.
    pub fn record_success(&self, target_id: &str) {
        let now = now_millis();
        let mut states = self.states.write().expect("target state lock");
        let state = entry(&mut states, target_id);

        let was_cooling = state.status == TargetStatus::Cooling;
        state.status = TargetStatus::Healthy;
        state.cooldown_ends_at = None;
        state.consecutive_failures = 0;
        state.last_success_at = Some(now);
        state.total_requests += 1;
        state.successful_requests += 1;

        if was_cooling {
            info!(%target_id, "target recovered");
        }
    }

    /// Record a failed call and start a cooldown computed by the
    /// policy. Returns the applied duration so callers can report it.
    pub fn record_failure(
        &self,
        target_id: &str,
        reason: &FailureReason,
        policy: &CooldownPolicy,
    ) -> Duration {
        let now = now_millis();
        let mut states = self.states.write().expect("target state lock");
        let state = entry(&mut states, target_id);

        // Backoff retries are scoped to a run of failures with the same
        // reason; a different reason starts the backoff over.
        let retry_count = if state.last_failure_reason.as_deref() == Some(reason.label()) {
            state.consecutive_failures
        } else {
            0
        };
        let duration = policy.duration_for(reason, retry_count);

        state.consecutive_failures += 1;
        state.total_requests += 1;
        state.last_failure_at = Some(now);
        state.last_failure_reason = Some(reason.label().to_string());
        state.status = TargetStatus::Cooling;
        state.cooldown_ends_at = Some(now + duration.as_millis() as u64);

        warn!(
            %target_id,
            reason = %reason,
            consecutive_failures = state.consecutive_failures,
            cooldown_secs = duration.as_secs(),
            "target failed, cooling down"
        );
        duration
    }

    // ── Cooldown control ───────────────────────────────────────────

    /// Start a cooldown directly. Last writer wins: a fresh failure is
    /// allowed to shorten an existing longer cooldown.
    pub fn start_cooldown(&self, target_id: &str, duration: Duration) {
        let now = now_millis();
        let mut states = self.states.write().expect("target state lock");
        let state = entry(&mut states, target_id);
        state.status = TargetStatus::Cooling;
        state.cooldown_ends_at = Some(now + duration.as_millis() as u64);
    }

    /// Operator-triggered cooldown bypassing the policy.
    pub fn force_cooldown(&self, target_id: &str, duration: Duration) {
        info!(%target_id, cooldown_secs = duration.as_secs(), "cooldown forced");
        self.start_cooldown(target_id, duration);
    }

    /// Force a target healthy without touching counters.
    pub fn clear_cooldown(&self, target_id: &str) {
        let mut states = self.states.write().expect("target state lock");
        let state = entry(&mut states, target_id);
        state.status = TargetStatus::Healthy;
        state.cooldown_ends_at = None;
        info!(%target_id, "cooldown cleared");
    }

    /// Operator reset: healthy status and zeroed counters.
    pub fn reset_target(&self, target_id: &str) {
        let mut states = self.states.write().expect("target state lock");
        states.insert(target_id.to_string(), TargetState::new(target_id));
        info!(%target_id, "target state reset");
    }

    /// Proactively flip expired cooldowns back to healthy so displayed
    /// status matches eligibility. Returns the targets that flipped.
    pub fn cleanup_expired(&self) -> Vec<TargetId> {
        let now = now_millis();
        let mut flipped = Vec::new();
        let mut states = self.states.write().expect("target state lock");
        for state in states.values_mut() {
            if state.status == TargetStatus::Cooling
                && state.cooldown_ends_at.is_some_and(|ends| now >= ends)
            {
                state.status = TargetStatus::Healthy;
                state.cooldown_ends_at = None;
                flipped.push(state.target_id.clone());
            }
        }
        if !flipped.is_empty() {
            debug!(count = flipped.len(), "expired cooldowns cleaned up");
        }
        flipped
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Whether the target is currently cooling (lazy expiry applied).
    pub fn is_in_cooldown(&self, target_id: &str) -> bool {
        let states = self.states.read().expect("target state lock");
        match states.get(target_id) {
            Some(state) => state.cooldown_remaining_ms(now_millis()) > 0,
            None => false,
        }
    }

    /// Remaining cooldown; zero when healthy or expired.
    pub fn remaining_cooldown(&self, target_id: &str) -> Duration {
        let states = self.states.read().expect("target state lock");
        match states.get(target_id) {
            Some(state) => Duration::from_millis(state.cooldown_remaining_ms(now_millis())),
            None => Duration::ZERO,
        }
    }

    /// Reason recorded with the target's last failure.
    pub fn cooldown_reason(&self, target_id: &str) -> Option<String> {
        let states = self.states.read().expect("target state lock");
        states.get(target_id)?.last_failure_reason.clone()
    }

    /// Snapshot of one target's state (defaults for unknown targets).
    pub fn get(&self, target_id: &str) -> TargetState {
        let states = self.states.read().expect("target state lock");
        states
            .get(target_id)
            .cloned()
            .unwrap_or_else(|| TargetState::new(target_id))
    }

    /// Display snapshot with lazy expiry applied, so an expired cooldown
    /// reads as healthy even before cleanup runs.
    pub fn display_state(&self, target_id: &str) -> TargetState {
        let mut state = self.get(target_id);
        if state.status == TargetStatus::Cooling && state.cooldown_remaining_ms(now_millis()) == 0 {
            state.status = TargetStatus::Healthy;
            state.cooldown_ends_at = None;
        }
        state
    }

    /// Eligibility per the selection invariant: statically enabled and
    /// either healthy or past its cooldown deadline.
    pub fn is_eligible(&self, target: &Target, now_ms: u64) -> bool {
        if !target.enabled {
            return false;
        }
        let states = self.states.read().expect("target state lock");
        match states.get(&target.id) {
            Some(state) => match (state.status, state.cooldown_ends_at) {
                (TargetStatus::Cooling, Some(ends)) => now_ms >= ends,
                _ => true,
            },
            None => true,
        }
    }

    /// Current active connections for a target.
    pub fn active_connections(&self, target_id: &str) -> i64 {
        let states = self.states.read().expect("target state lock");
        states.get(target_id).map_or(0, |s| s.active_connections)
    }

    // ── Connection accounting ──────────────────────────────────────

    /// Increment the target's active-connection count, returning a
    /// guard that decrements on drop. Pairing survives early returns
    /// and cancellation.
    pub fn acquire_connection(self: &Arc<Self>, target_id: &str) -> ConnectionGuard {
        {
            let mut states = self.states.write().expect("target state lock");
            entry(&mut states, target_id).active_connections += 1;
        }
        ConnectionGuard {
            manager: Arc::clone(self),
            target_id: target_id.to_string(),
        }
    }
}

impl Default for TargetStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn entry<'a>(
    states: &'a mut HashMap<TargetId, TargetState>,
    target_id: &str,
) -> &'a mut TargetState {
    states
        .entry(target_id.to_string())
        .or_insert_with(|| TargetState::new(target_id))
}

/// Scoped active-connection count, released on drop.
pub struct ConnectionGuard {
    manager: Arc<TargetStateManager>,
    target_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut states = self.manager.states.write().expect("target state lock");
        let state = entry(&mut states, &self.target_id);
        state.active_connections = (state.active_connections - 1).max(0);
    }
}

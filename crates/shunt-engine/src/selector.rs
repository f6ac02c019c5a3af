//! Target selection strategies.
//!
//! The selector filters a layer's targets down to the eligible,
//! not-yet-tried ones and applies the layer's strategy. Cursors for the
//! rotating strategies live here, keyed by layer identity, so the Layer
//! config values stay immutable snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use rand::Rng;

use shunt_state::{Layer, LoadStrategy, Target, TargetId, now_millis};

use crate::state::TargetStateManager;

/// Picks one eligible target from a layer per its configured strategy.
pub struct Selector {
    cursors: RwLock<HashMap<String, u64>>,
}

impl Selector {
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Select a target from `layer`, skipping targets in `exclude`
    /// (already tried for the current request) and ineligible ones.
    /// Returns `None` when the layer is exhausted.
    ///
    /// `layer_key` identifies the layer across calls (route id + level)
    /// so rotating cursors persist between requests.
    pub fn select(
        &self,
        layer_key: &str,
        layer: &Layer,
        states: &TargetStateManager,
        exclude: &HashSet<TargetId>,
    ) -> Option<Target> {
        let now = now_millis();
        let eligible: Vec<&Target> = layer
            .targets
            .iter()
            .filter(|t| !exclude.contains(&t.id) && states.is_eligible(t, now))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let picked = match layer.strategy {
            LoadStrategy::FirstAvailable => eligible[0],
            LoadStrategy::RoundRobin => {
                // The cursor advances every selection, even when the
                // pick is narrowed by exclusions, so no target starves.
                let tick = self.advance(layer_key);
                eligible[(tick % eligible.len() as u64) as usize]
            }
            LoadStrategy::WeightedRoundRobin => {
                let total: u64 = eligible.iter().map(|t| t.effective_weight()).sum();
                let tick = self.advance(layer_key) % total;
                pick_by_cumulative_weight(&eligible, tick)
            }
            LoadStrategy::LeastConnections => {
                // min_by_key keeps the first minimum, which is the
                // configured-order tie break.
                eligible
                    .iter()
                    .min_by_key(|t| states.active_connections(&t.id))?
            }
            LoadStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..eligible.len());
                eligible[idx]
            }
        };
        Some(picked.clone())
    }

    fn advance(&self, layer_key: &str) -> u64 {
        let mut cursors = self.cursors.write().expect("cursor lock");
        let cursor = cursors.entry(layer_key.to_string()).or_insert(0);
        let tick = *cursor;
        *cursor = cursor.wrapping_add(1);
        tick
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the cumulative weights until the tick falls inside a bucket.
fn pick_by_cumulative_weight<'a>(eligible: &[&'a Target], tick: u64) -> &'a Target {
    let mut acc = 0u64;
    for target in eligible {
        acc += target.effective_weight();
        if tick < acc {
            return target;
        }
    }
    // tick is always < total weight.
    eligible[eligible.len() - 1]
}

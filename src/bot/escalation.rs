// src/bot/escalation.rs - Punishment escalation keyed on prior violations

use std::sync::Arc;
use std::time::Duration;

use crate::store::ExpiringStore;
use crate::types::Punishment;

/// Pick the tier for a user with `prior_count` recent violations, clamped to
/// the last tier. Returns `None` only for an empty tier list.
pub fn resolve(tiers: &[Punishment], prior_count: usize) -> Option<Punishment> {
    let last = tiers.len().checked_sub(1)?;
    tiers.get(prior_count.min(last)).copied()
}

/// Violation counter for one policy category.
///
/// Each firing leaves a marker that expires after the policy's reset window,
/// so the prior count is simply the number of live markers.
#[derive(Debug, Clone)]
pub struct ViolationTracker {
    markers: Arc<ExpiringStore<String, ()>>,
}

impl ViolationTracker {
    pub fn new(markers: Arc<ExpiringStore<String, ()>>) -> Self {
        Self { markers }
    }

    pub fn store(&self) -> &Arc<ExpiringStore<String, ()>> {
        &self.markers
    }

    pub fn prior_count(&self, key: &str) -> usize {
        self.markers.len(&key.to_string())
    }

    /// Resolve against the count read before recording, then record this firing.
    pub fn escalate(&self, key: &str, tiers: &[Punishment], reset_window: Duration) -> Option<Punishment> {
        self.markers.with_key(&key.to_string(), |entry| {
            let punishment = resolve(tiers, entry.len())?;
            entry.push((), reset_window);
            Some(punishment)
        })
    }
}

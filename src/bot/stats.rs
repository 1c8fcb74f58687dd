// src/bot/stats.rs - Per-stream moderation counters

use chrono::{DateTime, Utc};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::types::VerdictKind;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub messages: u64,
    pub automod_holds: u64,
    pub deletes: u64,
    pub timeouts: u64,
    pub bans: u64,
    pub moderator_actions: u64,
    pub window_started: Option<DateTime<Utc>>,
}

impl StatsSummary {
    pub fn actions(&self) -> u64 {
        self.deletes + self.timeouts + self.bans
    }
}

/// Counters updated by the reader and the workers. A window is opened when the
/// stream goes online and closed, with a logged summary, when it goes offline.
#[derive(Debug, Default)]
pub struct StreamStats {
    messages: AtomicU64,
    automod_holds: AtomicU64,
    deletes: AtomicU64,
    timeouts: AtomicU64,
    bans: AtomicU64,
    moderator_actions: AtomicU64,
    window_started: Mutex<Option<DateTime<Utc>>>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, from_automod: bool) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        if from_automod {
            self.automod_holds.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_verdict(&self, kind: VerdictKind) {
        let counter = match kind {
            VerdictKind::None => return,
            VerdictKind::Delete => &self.deletes,
            VerdictKind::Timeout => &self.timeouts,
            VerdictKind::Ban => &self.bans,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_moderator_action(&self) {
        self.moderator_actions.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicU64; 6] {
        [
            &self.messages,
            &self.automod_holds,
            &self.deletes,
            &self.timeouts,
            &self.bans,
            &self.moderator_actions,
        ]
    }

    /// Reset counters and start a new window
    pub fn start_window(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
        *self.window_started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        info!("Stream online, stats window opened");
    }

    /// Close the current window, returning and logging its summary
    pub fn end_window(&self) -> Option<StatsSummary> {
        let summary = self.summary();
        let started = self
            .window_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let minutes = (Utc::now() - started).num_minutes();
        info!(
            "Stream offline after {}m: {} messages ({} held by automod), {} deletes, {} timeouts, {} bans, {} moderator actions",
            minutes,
            summary.messages,
            summary.automod_holds,
            summary.deletes,
            summary.timeouts,
            summary.bans,
            summary.moderator_actions
        );
        Some(summary)
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            messages: self.messages.load(Ordering::Relaxed),
            automod_holds: self.automod_holds.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            bans: self.bans.load(Ordering::Relaxed),
            moderator_actions: self.moderator_actions.load(Ordering::Relaxed),
            window_started: *self.window_started.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

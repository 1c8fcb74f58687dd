// src/platforms/mod.rs - Collaborator ports consumed by the moderation core

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::config::ConfigSnapshot;

pub mod eventsub;
pub mod helix;
pub mod twitch;

/// Outbound moderation actions. Fire-and-forget: implementations log their
/// own failures and never report them back to the caller.
pub trait ModerationSink: Send + Sync {
    fn ban(&self, user_id: &str, reason: &str);

    fn timeout(&self, user_id: &str, duration_secs: u64, reason: &str);

    fn delete_message(&self, message_id: &str);
}

/// Bounded-latency check for whether a message is the sender's first in the channel
pub trait FirstMessageOracle: Send + Sync {
    /// `None` when no answer arrived within `timeout`
    fn is_first_message(&self, message_id: &str, timeout: Duration) -> Option<bool>;
}

/// Classification of tokens against a platform emote set
pub trait EmoteSet: Send + Sync {
    fn is_emote(&self, token: &str) -> bool;

    /// Returns the number of emote tokens and whether every token is an emote
    fn emote_stats(&self, tokens: &[&str]) -> (usize, bool) {
        count_emotes(tokens, |t| self.is_emote(t))
    }
}

/// Source of raw event-feed frames
#[async_trait]
pub trait EventFeed: Send {
    async fn connect(&mut self, url: &str) -> Result<()>;

    /// Next text frame; `None` once the connection is closed
    async fn next_frame(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates event subscriptions for a freshly welcomed session
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, session_id: &str) -> Result<()>;
}

/// Read-mostly view of the channel being moderated
#[derive(Debug)]
pub struct ChannelState {
    live: AtomicBool,
    name: String,
    info: RwLock<ChannelInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub category: String,
}

impl ChannelState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            live: AtomicBool::new(false),
            name: name.into().to_lowercase(),
            info: RwLock::new(ChannelInfo::default()),
        }
    }

    /// Channel login, lowercased
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn info(&self) -> ChannelInfo {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_info(&self, title: impl Into<String>, category: impl Into<String>) {
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        info.title = title.into();
        info.category = category.into();
    }
}

/// Emote count of `tokens` and whether all of them are emotes
pub fn count_emotes<F>(tokens: &[&str], is_emote: F) -> (usize, bool)
where
    F: Fn(&str) -> bool,
{
    let count = tokens.iter().filter(|t| is_emote(t)).count();
    (count, !tokens.is_empty() && count == tokens.len())
}

/// Fixed set of emote names
#[derive(Debug, Clone, Default)]
pub struct StaticEmoteSet {
    names: HashSet<String>,
}

impl StaticEmoteSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl EmoteSet for StaticEmoteSet {
    fn is_emote(&self, token: &str) -> bool {
        self.names.contains(token)
    }
}

/// The configured emote list of one snapshot
impl EmoteSet for ConfigSnapshot {
    fn is_emote(&self, token: &str) -> bool {
        self.emotes.contains(token)
    }
}

/// Oracle used when no side channel is configured. Always unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFirstMessageOracle;

impl FirstMessageOracle for NoFirstMessageOracle {
    fn is_first_message(&self, _message_id: &str, _timeout: Duration) -> Option<bool> {
        None
    }
}

/// Sink that only logs what it would do
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSink;

impl ModerationSink for DryRunSink {
    fn ban(&self, user_id: &str, reason: &str) {
        info!("[dry-run] Would ban {}: {}", user_id, reason);
    }

    fn timeout(&self, user_id: &str, duration_secs: u64, reason: &str) {
        info!("[dry-run] Would time out {} for {}s: {}", user_id, duration_secs, reason);
    }

    fn delete_message(&self, message_id: &str) {
        info!("[dry-run] Would delete message {}", message_id);
    }
}

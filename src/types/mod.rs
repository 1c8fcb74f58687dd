// src/types/mod.rs - Shared value types for the moderation engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::bot::fingerprint;

/// Role flags carried by a chatter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatterRoles {
    pub broadcaster: bool,
    pub moderator: bool,
    pub vip: bool,
    pub subscriber: bool,
}

impl ChatterRoles {
    /// Build role flags from platform badge set ids
    pub fn from_badges<'a, I>(badges: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut roles = ChatterRoles::default();
        for badge in badges {
            match badge {
                "broadcaster" => roles.broadcaster = true,
                "moderator" => roles.moderator = true,
                "vip" => roles.vip = true,
                "subscriber" | "founder" => roles.subscriber = true,
                _ => {}
            }
        }
        roles
    }

    /// Broadcaster and moderators are never moderated
    pub fn is_privileged(&self) -> bool {
        self.broadcaster || self.moderator
    }
}

/// Identity of the message a chat message replies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyParent {
    pub message_id: String,
    pub user_id: String,
    pub user_login: String,
}

/// A decoded chat message, immutable once constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub user_id: String,
    pub user_login: String,
    pub display_name: String,
    pub roles: ChatterRoles,
    /// Raw text as sent by the chatter
    pub text: String,
    /// Case-folded, punctuation-collapsed form of `text`
    pub normalized: String,
    /// Whitespace tokens of `normalized`
    pub tokens: Vec<String>,
    /// Set when every fragment of the message was an emote
    pub emote_only: bool,
    /// Emote fragments reported by the platform
    pub emote_count: usize,
    pub reply_parent: Option<ReplyParent>,
    /// Message is held by automod rather than visible in chat
    pub from_automod: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        user_login: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let user_login = user_login.into();
        let text = text.into();
        let normalized = fingerprint::normalize(&text);
        let tokens = fingerprint::tokenize(&normalized);

        Self {
            message_id: message_id.into(),
            user_id: user_id.into(),
            display_name: user_login.clone(),
            user_login,
            roles: ChatterRoles::default(),
            text,
            normalized,
            tokens,
            emote_only: false,
            emote_count: 0,
            reply_parent: None,
            from_automod: false,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_roles(mut self, roles: ChatterRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_emotes(mut self, emote_count: usize, emote_only: bool) -> Self {
        self.emote_count = emote_count;
        self.emote_only = emote_only;
        self
    }

    pub fn with_reply_parent(mut self, parent: Option<ReplyParent>) -> Self {
        self.reply_parent = parent;
        self
    }

    pub fn held_by_automod(mut self) -> Self {
        self.from_automod = true;
        self
    }

    /// Whitespace tokens of the raw text, case preserved
    pub fn raw_tokens(&self) -> Vec<&str> {
        self.text.split_whitespace().collect()
    }
}

/// Severity of a verdict, ordered from harmless to permanent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    None,
    Delete,
    Timeout,
    Ban,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerdictKind::None => "none",
            VerdictKind::Delete => "delete",
            VerdictKind::Timeout => "timeout",
            VerdictKind::Ban => "ban",
        };
        f.write_str(name)
    }
}

/// Punishment kinds a policy may configure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    Delete,
    Timeout,
    Ban,
}

impl From<PunishmentKind> for VerdictKind {
    fn from(kind: PunishmentKind) -> Self {
        match kind {
            PunishmentKind::Delete => VerdictKind::Delete,
            PunishmentKind::Timeout => VerdictKind::Timeout,
            PunishmentKind::Ban => VerdictKind::Ban,
        }
    }
}

/// One escalation tier: `{ action: timeout, duration: 600 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub action: PunishmentKind,
    /// Timeout length in seconds, ignored for other actions
    #[serde(default)]
    pub duration: u64,
}

impl Punishment {
    pub fn delete() -> Self {
        Self { action: PunishmentKind::Delete, duration: 0 }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self { action: PunishmentKind::Timeout, duration: seconds }
    }

    pub fn ban() -> Self {
        Self { action: PunishmentKind::Ban, duration: 0 }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self.action {
            PunishmentKind::Timeout => Some(Duration::from_secs(self.duration)),
            _ => None,
        }
    }
}

/// Outcome of classifying one message. Never mutated after return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub reason: String,
    pub duration: Option<Duration>,
}

impl Verdict {
    pub fn none() -> Self {
        Self {
            kind: VerdictKind::None,
            reason: String::new(),
            duration: None,
        }
    }

    pub fn ban(reason: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Ban,
            reason: reason.into(),
            duration: None,
        }
    }

    pub fn from_punishment(punishment: Punishment, reason: impl Into<String>) -> Self {
        Self {
            kind: punishment.action.into(),
            reason: reason.into(),
            duration: punishment.duration(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == VerdictKind::None
    }
}

/// Events decoded from the platform event feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    SessionWelcome { session_id: String },
    Keepalive,
    Reconnect { url: Option<String> },
    Revocation { subscription_type: String, status: String },
    ChatMessage(ChatMessage),
    AutomodHold(ChatMessage),
    StreamOnline,
    StreamOffline,
    ChannelUpdate { title: String, category: String },
    ModeratorAction { action: String, moderator: String },
    Unknown { message_type: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_from_badges() {
        let roles = ChatterRoles::from_badges(["vip", "founder", "sub-gifter"]);
        assert!(roles.vip);
        assert!(roles.subscriber);
        assert!(!roles.is_privileged());

        let roles = ChatterRoles::from_badges(["moderator"]);
        assert!(roles.is_privileged());
    }

    #[test]
    fn test_message_is_normalized_on_construction() {
        let message = ChatMessage::new("m1", "u1", "someone", "Hello,   WORLD!!");
        assert_eq!(message.normalized, "hello world");
        assert_eq!(message.tokens, vec!["hello", "world"]);
        assert_eq!(message.raw_tokens(), vec!["Hello,", "WORLD!!"]);
    }

    #[test]
    fn test_verdict_from_punishment() {
        let verdict = Verdict::from_punishment(Punishment::timeout(60), "spam");
        assert_eq!(verdict.kind, VerdictKind::Timeout);
        assert_eq!(verdict.duration, Some(Duration::from_secs(60)));

        let verdict = Verdict::from_punishment(Punishment::delete(), "spam");
        assert_eq!(verdict.kind, VerdictKind::Delete);
        assert_eq!(verdict.duration, None);
    }

    #[test]
    fn test_punishment_yaml_shape() {
        let tiers: Vec<Punishment> = serde_yaml::from_str(
            "- action: delete\n- action: timeout\n  duration: 600\n- action: ban\n",
        )
        .unwrap();
        assert_eq!(tiers, vec![Punishment::delete(), Punishment::timeout(600), Punishment::ban()]);
    }
}

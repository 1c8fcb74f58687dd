// src/bot/advertising.rs - Cross-promotion link heuristic

use anyhow::Result;
use regex::Regex;

use crate::types::ChatMessage;

/// Detects chatters linking another channel while promoting themselves
#[derive(Debug, Clone)]
pub struct AdvertisingDetector {
    channel_link: Regex,
}

impl AdvertisingDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            channel_link: Regex::new(r"(?i)(?:https?://)?(?:www\.|m\.)?twitch\.tv/([a-z0-9_]{3,25})")?,
        })
    }

    /// Returns the advertised channel when the message is cross-promotion.
    ///
    /// A link to a channel other than `current_channel` only counts when the
    /// message also names the sender's own channel or carries one of the
    /// normalized `promo_phrases`.
    pub fn detect(&self, message: &ChatMessage, current_channel: &str, promo_phrases: &[String]) -> Option<String> {
        let sender = message.user_login.to_lowercase();
        let padded = format!(" {} ", message.normalized);
        let has_promo = promo_phrases
            .iter()
            .any(|phrase| padded.contains(&format!(" {} ", phrase)));

        let mut linked_own_channel = false;
        let mut foreign = None;
        for capture in self.channel_link.captures_iter(&message.text) {
            let Some(linked) = capture.get(1).map(|m| m.as_str().to_lowercase()) else {
                continue;
            };
            if linked == current_channel {
                continue;
            }
            if linked == sender {
                linked_own_channel = true;
            }
            foreign.get_or_insert(linked);
        }

        let foreign = foreign?;
        let mentions_self = linked_own_channel || message.tokens.iter().any(|t| *t == sender);
        if mentions_self || has_promo {
            Some(foreign)
        } else {
            None
        }
    }
}

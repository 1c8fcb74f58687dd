// src/bot/pattern_matching.rs - Rule matchers shared by word rules, groups and spam exceptions

use log::debug;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bot::fingerprint;
use crate::config::ConfigError;
use crate::types::{ChatMessage, ChatterRoles, Punishment};

/// Option flags shared by every rule kind. Each flag is an independent filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOptions {
    /// VIPs are never matched
    pub exempt_vip: bool,
    /// Subscribers are never matched
    pub exempt_subscriber: bool,
    /// Only match a chatter's first message in the channel
    pub first_message_only: bool,
    /// The whole message must equal the word or pattern
    pub exact: bool,
    /// Only match messages consisting of a single token
    pub one_word: bool,
    /// Literal words match anywhere, not only as whole tokens
    pub substring: bool,
    /// Match the raw text instead of the normalized text
    pub case_sensitive: bool,
}

impl RuleOptions {
    /// Role-based exemptions. The first-message filter needs the oracle and is
    /// checked by the classifier.
    pub fn exempts(&self, roles: &ChatterRoles) -> bool {
        (self.exempt_vip && roles.vip) || (self.exempt_subscriber && roles.subscriber)
    }
}

/// One way of matching message text
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Literal words or phrases, stored in the form they are compared in
    Literal(Vec<String>),
    /// Compiled regular expression
    Pattern(Regex),
    /// A pattern that failed to compile; never matches
    Invalid { source: String, error: String },
}

impl Matcher {
    /// Literal matcher. Words are normalized unless the rule is case-sensitive.
    pub fn literal<I, S>(words: I, options: &RuleOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| {
                if options.case_sensitive {
                    w.as_ref().trim().to_string()
                } else {
                    fingerprint::normalize(w.as_ref())
                }
            })
            .filter(|w| !w.is_empty())
            .collect();
        Matcher::Literal(words)
    }

    /// Compile either a bare regex or the `~/pattern/flags` form (flags: i, m, s, x).
    pub fn compile_pattern(source: &str, options: &RuleOptions) -> Result<Self, ConfigError> {
        let (pattern, flags) = match source.strip_prefix("~/") {
            Some(content) => {
                let last_slash = content.rfind('/').ok_or_else(|| ConfigError::InvalidPattern {
                    pattern: source.to_string(),
                    reason: "pattern must end with '/'".to_string(),
                })?;
                (&content[..last_slash], &content[last_slash + 1..])
            }
            None => (source, ""),
        };

        let mut builder = RegexBuilder::new(pattern);
        builder.case_insensitive(!options.case_sensitive);

        for flag in flags.chars() {
            match flag {
                'i' => { builder.case_insensitive(true); }
                'm' => { builder.multi_line(true); }
                's' => { builder.dot_matches_new_line(true); }
                'x' => { builder.ignore_whitespace(true); }
                _ => {
                    return Err(ConfigError::InvalidPattern {
                        pattern: source.to_string(),
                        reason: format!("unknown regex flag '{}'", flag),
                    })
                }
            }
        }

        builder
            .build()
            .map(Matcher::Pattern)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })
    }

    /// Compile a pattern, degrading to a non-matching matcher on error.
    pub fn pattern_or_invalid(source: &str, options: &RuleOptions) -> (Self, Option<ConfigError>) {
        match Self::compile_pattern(source, options) {
            Ok(matcher) => (matcher, None),
            Err(e) => (
                Matcher::Invalid {
                    source: source.to_string(),
                    error: e.to_string(),
                },
                Some(e),
            ),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Matcher::Invalid { .. })
    }

    /// Check the matcher against a message under the given option flags
    pub fn matches(&self, message: &ChatMessage, options: &RuleOptions) -> bool {
        let (text, tokens): (&str, Vec<&str>) = if options.case_sensitive {
            (message.text.trim(), message.raw_tokens())
        } else {
            (message.normalized.as_str(), message.tokens.iter().map(String::as_str).collect())
        };

        if options.one_word && tokens.len() != 1 {
            return false;
        }

        match self {
            Matcher::Literal(words) => words
                .iter()
                .any(|word| Self::literal_match(text, &tokens, word, options)),
            Matcher::Pattern(regex) => {
                if options.exact {
                    regex
                        .find(text)
                        .map_or(false, |m| m.start() == 0 && m.end() == text.len())
                } else {
                    regex.is_match(text)
                }
            }
            Matcher::Invalid { .. } => false,
        }
    }

    fn literal_match(text: &str, tokens: &[&str], word: &str, options: &RuleOptions) -> bool {
        if options.exact {
            return text == word;
        }
        if options.substring {
            return text.contains(word);
        }
        if word.contains(char::is_whitespace) {
            // Phrases must line up with token boundaries
            return format!(" {} ", tokens.join(" ")).contains(&format!(" {} ", word));
        }
        tokens.iter().any(|token| *token == word)
    }
}

/// A word rule or a word group: ordered matchers under one option set, with
/// its own punishment tiers and violation reset window.
#[derive(Debug, Clone)]
pub struct ModerationRule {
    pub name: String,
    pub options: RuleOptions,
    pub matchers: Vec<Matcher>,
    pub punishments: Vec<Punishment>,
    pub reset_window: Duration,
}

impl ModerationRule {
    /// Index of the first matcher that matches, ignoring role filters
    pub fn first_match(&self, message: &ChatMessage) -> Option<usize> {
        let index = self
            .matchers
            .iter()
            .position(|m| m.matches(message, &self.options))?;
        debug!("Rule '{}' matcher #{} matched message {}", self.name, index, message.message_id);
        Some(index)
    }

    /// Key for this rule's violation counter
    pub fn violation_key(&self, user_id: &str) -> String {
        format!("{}:{}", self.name, user_id)
    }
}

/// Spam exception: overrides the generic message-count threshold for
/// messages it matches.
#[derive(Debug, Clone)]
pub struct SpamException {
    pub rule: ModerationRule,
    pub message_limit: usize,
}

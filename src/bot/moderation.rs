// src/bot/moderation.rs - Message classifier: bypass, banned content, advertising, rules, spam

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bot::advertising::AdvertisingDetector;
use crate::bot::escalation::ViolationTracker;
use crate::bot::fingerprint::Fingerprint;
use crate::bot::pattern_matching::{ModerationRule, SpamException};
use crate::config::{CompiledSpamProfile, ConfigSnapshot, ModerationMode, SnapshotCell, StoreConfig};
use crate::platforms::{count_emotes, ChannelState, EmoteSet, FirstMessageOracle, ModerationSink};
use crate::store::{Clock, ExpiringStore, KeyEntry, SystemClock};
use crate::types::{ChatMessage, Verdict, VerdictKind};

/// Message history plus one violation store per policy category
#[derive(Debug, Clone)]
pub struct ClassifierStores {
    pub history: Arc<ExpiringStore<String, Fingerprint>>,
    pub spam_violations: Arc<ExpiringStore<String, ()>>,
    pub emote_violations: Arc<ExpiringStore<String, ()>>,
    pub exception_violations: Arc<ExpiringStore<String, ()>>,
    pub rule_violations: Arc<ExpiringStore<String, ()>>,
}

impl ClassifierStores {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let interval = config.reclaim_interval();
        let markers = |name: &str| {
            Arc::new(ExpiringStore::with_clock(name, config.shards, interval, clock.clone()))
        };

        Self {
            history: Arc::new(ExpiringStore::with_clock("message-history", config.shards, interval, clock.clone())),
            spam_violations: markers("spam-violations"),
            emote_violations: markers("emote-violations"),
            exception_violations: markers("exception-violations"),
            rule_violations: markers("rule-violations"),
        }
    }

    /// Start one reclamation task per store
    pub fn spawn_reclaimers(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.history.spawn_reclaimer(shutdown.clone()),
            self.spam_violations.spawn_reclaimer(shutdown.clone()),
            self.emote_violations.spawn_reclaimer(shutdown.clone()),
            self.exception_violations.spawn_reclaimer(shutdown.clone()),
            self.rule_violations.spawn_reclaimer(shutdown.clone()),
        ]
    }
}

/// Counts near-duplicates of the current message across a user's history,
/// oldest first. A repeat only counts while fewer than `min_gap` dissimilar
/// messages separate it from the previous one; `min_gap == 0` counts every
/// repeat.
#[derive(Debug)]
struct RepeatCounter<'a> {
    current: &'a Fingerprint,
    threshold: f64,
    min_gap: usize,
    gap: usize,
    count: usize,
}

impl<'a> RepeatCounter<'a> {
    fn new(current: &'a Fingerprint, threshold: f64, min_gap: usize) -> Self {
        Self {
            current,
            threshold,
            min_gap,
            gap: 0,
            count: 0,
        }
    }

    fn observe(&mut self, previous: &Fingerprint) {
        if self.current.similarity(previous) >= self.threshold {
            if self.min_gap == 0 || self.gap < self.min_gap {
                self.count += 1;
            }
            self.gap = 0;
        } else {
            self.gap += 1;
        }
    }
}

/// Spam outcome computed under the history lock
struct SpamOutcome {
    verdict: Verdict,
    clear_history: bool,
}

/// Turns one chat message into a verdict. Shared by every worker thread.
pub struct Classifier {
    config: Arc<SnapshotCell>,
    channel: Arc<ChannelState>,
    emotes: Arc<dyn EmoteSet>,
    oracle: Arc<dyn FirstMessageOracle>,
    history: Arc<ExpiringStore<String, Fingerprint>>,
    spam: ViolationTracker,
    emote_spam: ViolationTracker,
    exceptions: ViolationTracker,
    rules: ViolationTracker,
    advertising: AdvertisingDetector,
}

impl Classifier {
    pub fn new(
        config: Arc<SnapshotCell>,
        channel: Arc<ChannelState>,
        emotes: Arc<dyn EmoteSet>,
        oracle: Arc<dyn FirstMessageOracle>,
        stores: &ClassifierStores,
    ) -> Result<Self> {
        Ok(Self {
            config,
            channel,
            emotes,
            oracle,
            history: stores.history.clone(),
            spam: ViolationTracker::new(stores.spam_violations.clone()),
            emote_spam: ViolationTracker::new(stores.emote_violations.clone()),
            exceptions: ViolationTracker::new(stores.exception_violations.clone()),
            rules: ViolationTracker::new(stores.rule_violations.clone()),
            advertising: AdvertisingDetector::new()?,
        })
    }

    pub fn history(&self) -> &Arc<ExpiringStore<String, Fingerprint>> {
        &self.history
    }

    /// Classify one message. Reads a single config snapshot for the whole call.
    pub fn check(&self, message: &ChatMessage) -> Verdict {
        let snapshot = self.config.load();

        if let Some(reason) = self.bypass_reason(&snapshot, message) {
            debug!("Skipping {} ({})", message.user_login, reason);
            return Verdict::none();
        }

        if let Some(word) = snapshot.contains_banned(&message.tokens, &message.normalized) {
            debug!("Banned word '{}' from {}", word, message.user_login);
            return Verdict::ban("banned word");
        }

        if snapshot.config.advertising.enabled {
            if let Some(channel) = self.advertising.detect(message, self.channel.name(), &snapshot.promo_phrases) {
                debug!("{} advertised twitch.tv/{}", message.user_login, channel);
                return Verdict::ban("advertising");
            }
        }

        let oracle_timeout = snapshot.config.pipeline.first_message_timeout();

        if let Some(verdict) = self.check_rules(&snapshot, message, oracle_timeout) {
            return verdict;
        }

        if let Some(verdict) = self.check_word_length(&snapshot, message) {
            return verdict;
        }

        if let Some(verdict) = self.check_spam(&snapshot, message, oracle_timeout) {
            return verdict;
        }

        Verdict::none()
    }

    fn bypass_reason(&self, snapshot: &ConfigSnapshot, message: &ChatMessage) -> Option<&'static str> {
        if !snapshot.config.enabled {
            Some("moderation disabled")
        } else if message.roles.is_privileged() {
            Some("broadcaster or moderator")
        } else if snapshot.config.mode == ModerationMode::OnlineOnly && !self.channel.is_live() {
            Some("stream offline")
        } else if snapshot.whitelist.contains(&message.user_login.to_lowercase()) {
            Some("whitelisted")
        } else {
            None
        }
    }

    /// Every filter must pass: role exemptions, then the matcher, then the
    /// first-message oracle, which is the only one that can block.
    fn rule_applies(&self, rule: &ModerationRule, message: &ChatMessage, oracle_timeout: Duration) -> bool {
        if rule.options.exempts(&message.roles) {
            return false;
        }
        if rule.first_match(message).is_none() {
            return false;
        }
        if rule.options.first_message_only {
            // Unknown counts as "not first"
            return self.oracle.is_first_message(&message.message_id, oracle_timeout) == Some(true);
        }
        true
    }

    fn check_rules(&self, snapshot: &ConfigSnapshot, message: &ChatMessage, oracle_timeout: Duration) -> Option<Verdict> {
        for rule in &snapshot.rules {
            if !self.rule_applies(rule, message, oracle_timeout) {
                continue;
            }
            let key = rule.violation_key(&message.user_id);
            if let Some(punishment) = self.rules.escalate(&key, &rule.punishments, rule.reset_window) {
                return Some(Verdict::from_punishment(punishment, format!("matched rule '{}'", rule.name)));
            }
        }
        None
    }

    fn check_word_length(&self, snapshot: &ConfigSnapshot, message: &ChatMessage) -> Option<Verdict> {
        let policy = &snapshot.config.word_length;
        if !policy.enabled || policy.max_length == 0 {
            return None;
        }
        message
            .tokens
            .iter()
            .any(|token| token.chars().count() >= policy.max_length)
            .then(|| Verdict::from_punishment(policy.punishment, "word too long"))
    }

    fn check_spam(&self, snapshot: &ConfigSnapshot, message: &ChatMessage, oracle_timeout: Duration) -> Option<Verdict> {
        let profile = if message.roles.vip {
            &snapshot.vip_profile
        } else {
            &snapshot.default_profile
        };
        let settings = &profile.settings;
        if !settings.enabled {
            return None;
        }

        let raw_tokens = message.raw_tokens();
        // Configured emotes come from the snapshot already loaded for this check
        let (emote_tokens, all_emotes) =
            count_emotes(&raw_tokens, |t| snapshot.is_emote(t) || self.emotes.is_emote(t));
        let emote_only = settings.emote.enabled && (message.emote_only || all_emotes);
        let emote_count = message.emote_count.max(emote_tokens);

        // Resolved before taking the history lock, the oracle may block
        let exceptions = if emote_only {
            &profile.emote_exceptions
        } else {
            &profile.exceptions
        };
        let exception = exceptions
            .iter()
            .find(|exception| self.rule_applies(&exception.rule, message, oracle_timeout));

        let fingerprint = Fingerprint::from_tokens(&message.tokens);
        let user = &message.user_id;

        self.history.with_key(user, |entry| {
            let spam_count = Self::count_repeats(entry, &fingerprint, profile);
            entry.push(fingerprint.clone(), settings.history_ttl());
            debug!("{} has {} similar recent messages", message.user_login, spam_count);

            let outcome = if emote_only {
                self.emote_outcome(profile, exception, user, spam_count, emote_count)
            } else {
                self.text_outcome(profile, exception, user, spam_count)
            }?;

            if outcome.clear_history {
                entry.clear();
            }
            Some(outcome.verdict)
        })
    }

    /// Repeats in the stored history plus the current message itself
    fn count_repeats(
        entry: &KeyEntry<'_, String, Fingerprint>,
        fingerprint: &Fingerprint,
        profile: &CompiledSpamProfile,
    ) -> usize {
        let settings = &profile.settings;
        let mut counter = RepeatCounter::new(fingerprint, settings.similarity_threshold, settings.min_gap);
        entry.for_each(|item| counter.observe(item.payload()));
        counter.observe(fingerprint);
        counter.count
    }

    fn exception_outcome(&self, exception: &SpamException, user: &str, spam_count: usize) -> Option<SpamOutcome> {
        if spam_count < exception.message_limit {
            return None;
        }
        let rule = &exception.rule;
        let punishment = self
            .exceptions
            .escalate(&rule.violation_key(user), &rule.punishments, rule.reset_window)?;
        Some(SpamOutcome {
            verdict: Verdict::from_punishment(punishment, format!("spam exception '{}'", rule.name)),
            clear_history: true,
        })
    }

    fn emote_outcome(
        &self,
        profile: &CompiledSpamProfile,
        exception: Option<&SpamException>,
        user: &str,
        spam_count: usize,
        emote_count: usize,
    ) -> Option<SpamOutcome> {
        if let Some(exception) = exception {
            return self.exception_outcome(exception, user, spam_count);
        }

        let policy = &profile.settings.emote;
        let window = Duration::from_secs(policy.reset_secs);

        if policy.max_emotes > 0 && emote_count > policy.max_emotes {
            let punishment = self.emote_spam.escalate(user, &policy.punishments, window)?;
            return Some(SpamOutcome {
                verdict: Verdict::from_punishment(punishment, "too many emotes"),
                clear_history: false,
            });
        }

        if spam_count >= policy.message_limit {
            let punishment = self.emote_spam.escalate(user, &policy.punishments, window)?;
            return Some(SpamOutcome {
                verdict: Verdict::from_punishment(punishment, "emote spam"),
                clear_history: true,
            });
        }

        None
    }

    fn text_outcome(
        &self,
        profile: &CompiledSpamProfile,
        exception: Option<&SpamException>,
        user: &str,
        spam_count: usize,
    ) -> Option<SpamOutcome> {
        if let Some(exception) = exception {
            return self.exception_outcome(exception, user, spam_count);
        }

        let settings = &profile.settings;
        if spam_count < settings.message_limit {
            return None;
        }
        let punishment = self
            .spam
            .escalate(user, &settings.punishments, settings.reset_window())?;
        Some(SpamOutcome {
            verdict: Verdict::from_punishment(punishment, "repeated messages"),
            clear_history: true,
        })
    }
}

/// Apply a verdict through the sink. Deleting a message held by automod is a
/// no-op since it never reached chat.
pub fn execute_verdict(verdict: &Verdict, message: &ChatMessage, sink: &dyn ModerationSink) {
    if verdict.is_none() {
        return;
    }

    info!(
        "{} {} ({}): {}{}",
        verdict.kind,
        message.user_login,
        message.user_id,
        verdict.reason,
        verdict
            .duration
            .map(|d| format!(" for {}s", d.as_secs()))
            .unwrap_or_default()
    );

    match verdict.kind {
        VerdictKind::None => {}
        VerdictKind::Delete => {
            if message.from_automod {
                debug!("Message {} is held by automod, nothing to delete", message.message_id);
            } else {
                sink.delete_message(&message.message_id);
            }
        }
        VerdictKind::Timeout => {
            let seconds = verdict.duration.map_or(0, |d| d.as_secs());
            sink.timeout(&message.user_id, seconds, &verdict.reason);
        }
        VerdictKind::Ban => sink.ban(&message.user_id, &verdict.reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExceptionConfig, GroupConfig, ModerationConfig, RuleConfig};
    use crate::platforms::StaticEmoteSet;
    use crate::bot::pattern_matching::RuleOptions;
    use crate::store::MockClock;
    use crate::types::{ChatterRoles, Punishment};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FixedOracle {
        answer: Option<bool>,
        calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(answer: Option<bool>) -> Arc<Self> {
            Arc::new(Self { answer, calls: AtomicUsize::new(0) })
        }
    }

    impl FirstMessageOracle for FixedOracle {
        fn is_first_message(&self, _message_id: &str, _timeout: Duration) -> Option<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        actions: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn actions(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }
    }

    impl ModerationSink for RecordingSink {
        fn ban(&self, user_id: &str, reason: &str) {
            self.actions.lock().unwrap().push(format!("ban {} {}", user_id, reason));
        }

        fn timeout(&self, user_id: &str, duration_secs: u64, reason: &str) {
            self.actions.lock().unwrap().push(format!("timeout {} {} {}", user_id, duration_secs, reason));
        }

        fn delete_message(&self, message_id: &str) {
            self.actions.lock().unwrap().push(format!("delete {}", message_id));
        }
    }

    struct Fixture {
        classifier: Classifier,
        channel: Arc<ChannelState>,
        stores: ClassifierStores,
        clock: MockClock,
        oracle: Arc<FixedOracle>,
    }

    fn base_config() -> ModerationConfig {
        let mut config = ModerationConfig {
            moderation_rules: Vec::new(),
            ..ModerationConfig::default()
        };
        config.spam.default.similarity_threshold = 0.9;
        config.spam.default.message_limit = 3;
        config.spam.default.min_gap = 1;
        config.spam.default.emote.message_limit = 4;
        config.spam.default.emote.max_emotes = 5;
        config
    }

    fn fixture_with_oracle(config: ModerationConfig, answer: Option<bool>) -> Fixture {
        let clock = MockClock::default();
        let stores = ClassifierStores::with_clock(&config.store, Arc::new(clock.clone()));
        let channel = Arc::new(ChannelState::new("streamer"));
        let oracle = FixedOracle::new(answer);
        let cell = Arc::new(SnapshotCell::new(ConfigSnapshot::compile(config).0));
        let emotes = Arc::new(StaticEmoteSet::new(["Kappa", "LUL"]));

        let classifier = Classifier::new(cell, channel.clone(), emotes, oracle.clone(), &stores).unwrap();
        Fixture { classifier, channel, stores, clock, oracle }
    }

    fn fixture(config: ModerationConfig) -> Fixture {
        fixture_with_oracle(config, None)
    }

    fn msg(user: &str, text: &str) -> ChatMessage {
        ChatMessage::new(format!("{}-{}", user, text.len()), user, user, text)
    }

    fn words(last: &str) -> String {
        let mut text: Vec<String> = (0..19).map(|i| format!("word{}", i)).collect();
        text.push(last.to_string());
        text.join(" ")
    }

    #[test]
    fn test_bypass_precedence_over_banned_words() {
        let config = ModerationConfig {
            banned_words: vec!["forbidden".to_string()],
            ..base_config()
        };
        let f = fixture(config);

        let broadcaster = msg("streamer", "forbidden").with_roles(ChatterRoles { broadcaster: true, ..ChatterRoles::default() });
        assert!(f.classifier.check(&broadcaster).is_none());

        let moderator = msg("mod", "forbidden").with_roles(ChatterRoles { moderator: true, ..ChatterRoles::default() });
        assert!(f.classifier.check(&moderator).is_none());

        let viewer = msg("viewer", "this is FORBIDDEN!");
        let verdict = f.classifier.check(&viewer);
        assert_eq!(verdict.kind, VerdictKind::Ban);
        assert_eq!(verdict.reason, "banned word");
    }

    #[test]
    fn test_bypass_whitelist_disabled_and_offline() {
        let config = ModerationConfig {
            banned_words: vec!["forbidden".to_string()],
            whitelist: vec!["FriendlyBot".to_string()],
            ..base_config()
        };
        let f = fixture(config.clone());
        assert!(f.classifier.check(&msg("friendlybot", "forbidden")).is_none());

        let disabled = fixture(ModerationConfig { enabled: false, ..config.clone() });
        assert!(disabled.classifier.check(&msg("viewer", "forbidden")).is_none());

        let online_only = fixture(ModerationConfig { mode: ModerationMode::OnlineOnly, ..config });
        assert!(online_only.classifier.check(&msg("viewer", "forbidden")).is_none());
        online_only.channel.set_live(true);
        assert_eq!(online_only.classifier.check(&msg("viewer", "forbidden")).kind, VerdictKind::Ban);
    }

    #[test]
    fn test_advertising_is_banned() {
        let f = fixture(base_config());
        let verdict = f.classifier.check(&msg("promo", "follow me at twitch.tv/promo"));
        assert_eq!(verdict, Verdict::ban("advertising"));

        assert!(f.classifier.check(&msg("viewer", "we are on twitch.tv/streamer")).is_none());
    }

    #[test]
    fn test_rules_escalate_per_rule() {
        let mut config = base_config();
        config.moderation_rules = vec![
            RuleConfig {
                name: "links".to_string(),
                options: RuleOptions { substring: true, ..RuleOptions::default() },
                words: vec!["bit.ly".to_string()],
                pattern: None,
                punishments: vec![Punishment::delete(), Punishment::timeout(60)],
                reset_secs: 600,
            },
            RuleConfig {
                name: "caps".to_string(),
                options: RuleOptions::default(),
                words: Vec::new(),
                pattern: Some("~/^shout+$/".to_string()),
                punishments: vec![Punishment::timeout(5)],
                reset_secs: 600,
            },
        ];
        let f = fixture(config);

        assert_eq!(f.classifier.check(&msg("u1", "see bit.ly/xyz")).kind, VerdictKind::Delete);
        let second = f.classifier.check(&msg("u1", "again bit.ly/abc"));
        assert_eq!(second.kind, VerdictKind::Timeout);
        assert_eq!(second.duration, Some(Duration::from_secs(60)));
        assert_eq!(second.reason, "matched rule 'links'");

        // Separate counter per rule
        assert_eq!(f.classifier.check(&msg("u1", "SHOUTTT")).duration, Some(Duration::from_secs(5)));
        assert_eq!(f.stores.rule_violations.len(&"links:u1".to_string()), 2);
        assert_eq!(f.stores.rule_violations.len(&"caps:u1".to_string()), 1);

        f.clock.advance(Duration::from_secs(600));
        f.stores.rule_violations.reclaim_expired();
        assert_eq!(f.classifier.check(&msg("u1", "bit.ly again")).kind, VerdictKind::Delete);
    }

    #[test]
    fn test_failing_filter_moves_to_next_rule() {
        let mut config = base_config();
        config.moderation_groups = vec![
            GroupConfig {
                name: "strict".to_string(),
                options: RuleOptions { exempt_vip: true, ..RuleOptions::default() },
                words: vec!["heck".to_string()],
                patterns: Vec::new(),
                punishments: vec![Punishment::ban()],
                reset_secs: 60,
            },
            GroupConfig {
                name: "mild".to_string(),
                options: RuleOptions::default(),
                words: vec!["darn".to_string()],
                patterns: vec!["h[e3]ck".to_string()],
                punishments: vec![Punishment::delete()],
                reset_secs: 60,
            },
        ];
        let f = fixture(config);

        assert_eq!(f.classifier.check(&msg("viewer", "oh heck")).kind, VerdictKind::Ban);

        let vip = msg("vip", "oh heck").with_roles(ChatterRoles { vip: true, ..ChatterRoles::default() });
        let verdict = f.classifier.check(&vip);
        assert_eq!(verdict.kind, VerdictKind::Delete);
        assert_eq!(verdict.reason, "matched rule 'mild'");
    }

    #[test]
    fn test_first_message_rule_consults_oracle() {
        let mut config = base_config();
        config.moderation_rules = vec![RuleConfig {
            name: "first-links".to_string(),
            options: RuleOptions { first_message_only: true, substring: true, ..RuleOptions::default() },
            words: vec!["http".to_string()],
            pattern: None,
            punishments: vec![Punishment::timeout(300)],
            reset_secs: 600,
        }];

        let unknown = fixture_with_oracle(config.clone(), None);
        assert!(unknown.classifier.check(&msg("new", "http spam")).is_none());
        assert_eq!(unknown.oracle.calls.load(Ordering::SeqCst), 1);
        // Non-matching messages never reach the oracle
        unknown.classifier.check(&msg("new", "hello"));
        assert_eq!(unknown.oracle.calls.load(Ordering::SeqCst), 1);

        let first = fixture_with_oracle(config.clone(), Some(true));
        assert_eq!(first.classifier.check(&msg("new", "http spam")).kind, VerdictKind::Timeout);

        let returning = fixture_with_oracle(config, Some(false));
        assert!(returning.classifier.check(&msg("old", "http spam")).is_none());
    }

    #[test]
    fn test_invalid_pattern_rule_never_matches() {
        let mut config = base_config();
        config.moderation_rules = vec![RuleConfig {
            name: "broken".to_string(),
            options: RuleOptions::default(),
            words: Vec::new(),
            pattern: Some("([a-z".to_string()),
            punishments: vec![Punishment::ban()],
            reset_secs: 60,
        }];
        let f = fixture(config);
        assert!(f.classifier.check(&msg("viewer", "anything at all")).is_none());
    }

    #[test]
    fn test_word_length_guard() {
        let mut config = base_config();
        config.word_length.max_length = 10;
        config.word_length.punishment = Punishment::timeout(15);
        let f = fixture(config);

        let verdict = f.classifier.check(&msg("viewer", "aaaaaaaaaa"));
        assert_eq!(verdict.reason, "word too long");
        assert_eq!(verdict.duration, Some(Duration::from_secs(15)));
        // Not escalated
        assert_eq!(f.classifier.check(&msg("viewer", "bbbbbbbbbbbbb")).duration, Some(Duration::from_secs(15)));
        assert!(f.classifier.check(&msg("viewer", "short words")).is_none());
    }

    #[test]
    fn test_consecutive_duplicates_trigger_on_limit() {
        let f = fixture(base_config());

        assert!(f.classifier.check(&msg("u1", "aaa")).is_none());
        assert!(f.classifier.check(&msg("u1", "aaa")).is_none());
        let verdict = f.classifier.check(&msg("u1", "aaa"));
        assert_eq!(verdict.kind, VerdictKind::Delete);
        assert_eq!(verdict.reason, "repeated messages");
    }

    #[test]
    fn test_gap_tolerates_interleaved_messages() {
        let f = fixture(base_config());

        for text in ["aaa", "bbb", "aaa", "bbb", "aaa", "bbb", "aaa"] {
            assert!(f.classifier.check(&msg("u1", text)).is_none(), "fired on {}", text);
        }
        assert_eq!(f.classifier.history().len(&"u1".to_string()), 7);
    }

    #[test]
    fn test_spam_end_to_end_clears_history() {
        let mut config = base_config();
        config.spam.default.similarity_threshold = 0.8;
        config.spam.default.message_limit = 3;
        config.spam.default.min_gap = 0;
        let f = fixture(config);
        let user = "u1".to_string();

        assert!(f.classifier.check(&msg("u1", &words("alpha"))).is_none());
        assert!(f.classifier.check(&msg("u1", &words("beta"))).is_none());
        let verdict = f.classifier.check(&msg("u1", &words("gamma")));

        assert_eq!(verdict.kind, VerdictKind::Delete);
        assert_eq!(f.classifier.history().len(&user), 0);
        assert_eq!(f.stores.spam_violations.len(&user), 1);

        // Next burst escalates to the second tier
        for last in ["delta", "epsilon"] {
            assert!(f.classifier.check(&msg("u1", &words(last))).is_none());
        }
        let verdict = f.classifier.check(&msg("u1", &words("zeta")));
        assert_eq!(verdict.kind, VerdictKind::Timeout);
        assert_eq!(verdict.duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_history_expires_between_messages() {
        let f = fixture(base_config());

        f.classifier.check(&msg("u1", "aaa"));
        f.classifier.check(&msg("u1", "aaa"));
        f.clock.advance(Duration::from_secs(31));
        f.stores.history.reclaim_expired();
        assert!(f.classifier.check(&msg("u1", "aaa")).is_none());
    }

    #[test]
    fn test_vip_profile_is_used_for_vips() {
        let mut config = base_config();
        config.spam.vip.message_limit = 5;
        config.spam.vip.min_gap = 0;
        let f = fixture(config);
        let vip = ChatterRoles { vip: true, ..ChatterRoles::default() };

        for _ in 0..4 {
            assert!(f.classifier.check(&msg("v1", "hype").with_roles(vip)).is_none());
        }
        assert!(!f.classifier.check(&msg("v1", "hype").with_roles(vip)).is_none());
    }

    #[test]
    fn test_disabled_spam_profile_keeps_no_history() {
        let mut config = base_config();
        config.spam.default.enabled = false;
        let f = fixture(config);

        for _ in 0..5 {
            assert!(f.classifier.check(&msg("u1", "aaa")).is_none());
        }
        assert_eq!(f.classifier.history().len(&"u1".to_string()), 0);
    }

    #[test]
    fn test_emote_ceiling_and_message_limit() {
        let f = fixture(base_config());

        let flood = msg("u1", "Kappa Kappa LUL Kappa LUL Kappa");
        let verdict = f.classifier.check(&flood);
        assert_eq!(verdict.reason, "too many emotes");
        assert_eq!(f.stores.emote_violations.len(&"u1".to_string()), 1);

        // Emote-only repeats use the emote limit (4), not the text limit (3)
        let f = fixture(base_config());
        for _ in 0..3 {
            assert!(f.classifier.check(&msg("u2", "LUL LUL")).is_none());
        }
        let verdict = f.classifier.check(&msg("u2", "LUL LUL"));
        assert_eq!(verdict.reason, "emote spam");
        assert_eq!(f.classifier.history().len(&"u2".to_string()), 0);
    }

    #[test]
    fn test_configured_emotes_follow_the_checked_snapshot() {
        let mut config = base_config();
        config.emotes = vec!["PogU".to_string()];
        let stores = ClassifierStores::with_clock(&config.store, Arc::new(MockClock::default()));
        let cell = Arc::new(SnapshotCell::new(ConfigSnapshot::compile(config).0));
        let classifier = Classifier::new(
            cell.clone(),
            Arc::new(ChannelState::new("streamer")),
            Arc::new(StaticEmoteSet::default()),
            FixedOracle::new(None),
            &stores,
        )
        .unwrap();

        let flood = "PogU PogU PogU PogU PogU PogU";
        assert_eq!(classifier.check(&msg("u1", flood)).reason, "too many emotes");

        // Once the emote leaves the config the same text is plain chat
        cell.store(ConfigSnapshot::compile(base_config()).0);
        assert!(classifier.check(&msg("u2", flood)).is_none());
        assert_eq!(stores.emote_violations.len(&"u2".to_string()), 0);
    }

    #[test]
    fn test_platform_emote_flag_marks_emote_only() {
        let f = fixture(base_config());
        let flagged = msg("u1", "customEmote").with_emotes(1, true);
        for _ in 0..3 {
            assert!(f.classifier.check(&flagged).is_none());
        }
        assert_eq!(f.classifier.check(&flagged).reason, "emote spam");
    }

    #[test]
    fn test_exceptions_override_limits() {
        let mut config = base_config();
        config.spam.default.exceptions = vec![ExceptionConfig {
            name: "gg".to_string(),
            options: RuleOptions::default(),
            words: vec!["gg".to_string()],
            pattern: None,
            message_limit: 5,
            punishments: vec![Punishment::timeout(10)],
            reset_secs: 60,
        }];
        config.spam.default.emote.exceptions = vec![ExceptionConfig {
            name: "kappa".to_string(),
            options: RuleOptions { exact: true, ..RuleOptions::default() },
            words: vec!["kappa".to_string()],
            pattern: None,
            message_limit: 2,
            punishments: vec![Punishment::delete()],
            reset_secs: 60,
        }];
        let f = fixture(config);

        for _ in 0..4 {
            assert!(f.classifier.check(&msg("u1", "gg")).is_none());
        }
        let verdict = f.classifier.check(&msg("u1", "gg"));
        assert_eq!(verdict.reason, "spam exception 'gg'");
        assert_eq!(f.stores.exception_violations.len(&"gg:u1".to_string()), 1);
        assert_eq!(f.stores.spam_violations.len(&"u1".to_string()), 0);

        assert!(f.classifier.check(&msg("u2", "Kappa")).is_none());
        assert_eq!(f.classifier.check(&msg("u2", "Kappa")).reason, "spam exception 'kappa'");
    }

    #[test]
    fn test_concurrent_checks_never_double_punish() {
        let mut config = base_config();
        config.spam.default.min_gap = 0;
        config.spam.default.message_limit = 2;
        let f = Arc::new(fixture(config));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| !f.classifier.check(&msg("u1", "same text")).is_none())
                        .count()
                })
            })
            .collect();
        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Every 2 messages fire exactly once: 400 messages, 200 verdicts
        assert_eq!(fired, 200);
    }

    #[test]
    fn test_execute_verdict() {
        let sink = RecordingSink::default();
        let message = msg("u1", "text");

        execute_verdict(&Verdict::none(), &message, &sink);
        execute_verdict(&Verdict::from_punishment(Punishment::delete(), "spam"), &message, &sink);
        execute_verdict(&Verdict::from_punishment(Punishment::timeout(60), "spam"), &message, &sink);
        execute_verdict(&Verdict::ban("advertising"), &message, &sink);
        execute_verdict(
            &Verdict::from_punishment(Punishment::delete(), "spam"),
            &message.clone().held_by_automod(),
            &sink,
        );

        assert_eq!(
            sink.actions(),
            vec![
                format!("delete {}", message.message_id),
                "timeout u1 60 spam".to_string(),
                "ban u1 advertising".to_string(),
            ]
        );
    }
}

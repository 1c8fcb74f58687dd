// src/config/mod.rs - Moderation configuration: YAML schema, validation, compiled snapshots and hot reload

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};

use crate::bot::fingerprint;
use crate::bot::pattern_matching::{Matcher, ModerationRule, RuleOptions, SpamException};
use crate::types::Punishment;

/// File name of the moderation configuration inside the config directory
pub const CONFIG_FILE: &str = "moderation.yaml";

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Configuration problems detected at load time
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("{field} must be between 0.0 and 1.0, got {value}")]
    InvalidThreshold { field: String, value: f64 },
    #[error("{0} must have at least one punishment")]
    EmptyPunishments(String),
    #[error("{0} must have a name")]
    MissingName(String),
    #[error("{0} must be greater than zero")]
    ZeroValue(String),
    #[error("rule '{0}' has no words or patterns")]
    EmptyRule(String),
}

/// When moderation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationMode {
    Always,
    OnlineOnly,
}

/// Root of `moderation.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub enabled: bool,
    pub mode: ModerationMode,
    /// Logins that are never moderated
    pub whitelist: Vec<String>,
    /// Words or phrases that result in an immediate ban
    pub banned_words: Vec<String>,
    pub advertising: AdvertisingConfig,
    pub word_length: WordLengthConfig,
    /// Evaluated in declared order, before groups
    pub moderation_rules: Vec<RuleConfig>,
    pub moderation_groups: Vec<GroupConfig>,
    pub spam: SpamConfig,
    /// Known emote names
    pub emotes: Vec<String>,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    pub enabled: bool,
    pub promo_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordLengthConfig {
    pub enabled: bool,
    /// Tokens at or above this many characters trigger the punishment
    pub max_length: usize,
    pub punishment: Punishment,
}

/// A single moderation rule: literal words, or one pattern in their place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: RuleOptions,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub punishments: Vec<Punishment>,
    #[serde(default = "default_reset_secs")]
    pub reset_secs: u64,
}

/// A word group: literal words and patterns sharing one option set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: RuleOptions,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub punishments: Vec<Punishment>,
    #[serde(default = "default_reset_secs")]
    pub reset_secs: u64,
}

/// Spam exception: a rule with its own message limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: RuleOptions,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub message_limit: usize,
    pub punishments: Vec<Punishment>,
    #[serde(default = "default_reset_secs")]
    pub reset_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    pub default: SpamProfile,
    pub vip: SpamProfile,
}

/// Duplicate-message policy for one class of chatter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamProfile {
    pub enabled: bool,
    /// Jaccard similarity at which two messages count as the same
    pub similarity_threshold: f64,
    pub message_limit: usize,
    /// Dissimilar messages needed between repeats before a repeat is tolerated
    pub min_gap: usize,
    /// How long each message stays in the user's history
    pub history_secs: u64,
    pub punishments: Vec<Punishment>,
    pub reset_secs: u64,
    pub emote: EmoteSpamConfig,
    pub exceptions: Vec<ExceptionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmoteSpamConfig {
    pub enabled: bool,
    /// Emote-only messages with more emotes than this are punished
    pub max_emotes: usize,
    pub message_limit: usize,
    pub punishments: Vec<Punishment>,
    pub reset_secs: u64,
    pub exceptions: Vec<ExceptionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub shards: usize,
    pub reclaim_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Zero means one worker per available CPU
    pub workers: usize,
    pub reconnect_backoff_ms: u64,
    pub first_message_timeout_ms: u64,
}

fn default_reset_secs() -> u64 {
    600
}

fn default_tiers() -> Vec<Punishment> {
    vec![
        Punishment::delete(),
        Punishment::timeout(60),
        Punishment::timeout(600),
        Punishment::ban(),
    ]
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ModerationMode::Always,
            whitelist: Vec::new(),
            banned_words: Vec::new(),
            advertising: AdvertisingConfig::default(),
            word_length: WordLengthConfig::default(),
            moderation_rules: vec![RuleConfig {
                name: "viewbots".to_string(),
                options: RuleOptions::default(),
                words: Vec::new(),
                pattern: Some(r"(cheap|free)\s+(viewers|followers|primes)".to_string()),
                punishments: vec![Punishment::timeout(600), Punishment::ban()],
                reset_secs: 3600,
            }],
            moderation_groups: Vec::new(),
            spam: SpamConfig::default(),
            emotes: Vec::new(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            promo_phrases: vec![
                "follow me".to_string(),
                "check out my stream".to_string(),
                "come watch".to_string(),
                "i'm live".to_string(),
                "live now".to_string(),
            ],
        }
    }
}

impl Default for WordLengthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 60,
            punishment: Punishment::delete(),
        }
    }
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            default: SpamProfile::default(),
            vip: SpamProfile {
                similarity_threshold: 0.9,
                message_limit: 6,
                ..SpamProfile::default()
            },
        }
    }
}

impl Default for SpamProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.8,
            message_limit: 4,
            min_gap: 2,
            history_secs: 30,
            punishments: default_tiers(),
            reset_secs: default_reset_secs(),
            emote: EmoteSpamConfig::default(),
            exceptions: Vec::new(),
        }
    }
}

impl Default for EmoteSpamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_emotes: 15,
            message_limit: 5,
            punishments: vec![Punishment::delete(), Punishment::timeout(30)],
            reset_secs: 300,
            exceptions: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            reclaim_interval_ms: 1000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 0,
            reconnect_backoff_ms: 5000,
            first_message_timeout_ms: 300,
        }
    }
}

impl SpamProfile {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_secs)
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_secs)
    }
}

impl StoreConfig {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

impl PipelineConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn first_message_timeout(&self) -> Duration {
        Duration::from_millis(self.first_message_timeout_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// Structural validation of a parsed configuration. Pattern compilation is
/// handled separately by [`ConfigSnapshot::compile`] and never rejects a file.
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &ModerationConfig) -> Result<(), ConfigError> {
        for rule in &config.moderation_rules {
            self.validate_named("moderation rule", &rule.name)?;
            if rule.words.is_empty() && rule.pattern.is_none() {
                return Err(ConfigError::EmptyRule(rule.name.clone()));
            }
            self.validate_punishments(&format!("rule '{}'", rule.name), &rule.punishments)?;
        }

        for group in &config.moderation_groups {
            self.validate_named("moderation group", &group.name)?;
            if group.words.is_empty() && group.patterns.is_empty() {
                return Err(ConfigError::EmptyRule(group.name.clone()));
            }
            self.validate_punishments(&format!("group '{}'", group.name), &group.punishments)?;
        }

        self.validate_profile("spam.default", &config.spam.default)?;
        self.validate_profile("spam.vip", &config.spam.vip)?;

        if config.store.shards == 0 {
            return Err(ConfigError::ZeroValue("store.shards".to_string()));
        }
        if config.store.reclaim_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("store.reclaim_interval_ms".to_string()));
        }
        if config.pipeline.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("pipeline.queue_capacity".to_string()));
        }
        if config.word_length.enabled && config.word_length.max_length == 0 {
            return Err(ConfigError::ZeroValue("word_length.max_length".to_string()));
        }

        Ok(())
    }

    fn validate_profile(&self, field: &str, profile: &SpamProfile) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&profile.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold {
                field: format!("{}.similarity_threshold", field),
                value: profile.similarity_threshold,
            });
        }
        if profile.message_limit == 0 {
            return Err(ConfigError::ZeroValue(format!("{}.message_limit", field)));
        }
        self.validate_punishments(field, &profile.punishments)?;

        if profile.emote.enabled {
            if profile.emote.message_limit == 0 {
                return Err(ConfigError::ZeroValue(format!("{}.emote.message_limit", field)));
            }
            self.validate_punishments(&format!("{}.emote", field), &profile.emote.punishments)?;
        }

        for exception in profile.exceptions.iter().chain(&profile.emote.exceptions) {
            self.validate_named("spam exception", &exception.name)?;
            if exception.message_limit == 0 {
                return Err(ConfigError::ZeroValue(format!(
                    "{} exception '{}' message_limit",
                    field, exception.name
                )));
            }
            self.validate_punishments(&format!("exception '{}'", exception.name), &exception.punishments)?;
        }

        Ok(())
    }

    fn validate_named(&self, what: &str, name: &str) -> Result<(), ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::MissingName(what.to_string()));
        }
        Ok(())
    }

    fn validate_punishments(&self, what: &str, tiers: &[Punishment]) -> Result<(), ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::EmptyPunishments(what.to_string()));
        }
        Ok(())
    }
}

/// Spam profile with its exceptions compiled
#[derive(Debug, Clone)]
pub struct CompiledSpamProfile {
    pub settings: SpamProfile,
    pub exceptions: Vec<SpamException>,
    pub emote_exceptions: Vec<SpamException>,
}

/// Immutable view of the configuration read by the classifier. Replaced
/// wholesale on reload, never mutated.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: ModerationConfig,
    /// Lowercased whitelist logins
    pub whitelist: HashSet<String>,
    /// Normalized single-token banned words
    pub banned_tokens: HashSet<String>,
    /// Normalized multi-token banned phrases
    pub banned_phrases: Vec<String>,
    /// Normalized promotional phrases
    pub promo_phrases: Vec<String>,
    /// Rules followed by groups, in declared order
    pub rules: Vec<ModerationRule>,
    pub default_profile: CompiledSpamProfile,
    pub vip_profile: CompiledSpamProfile,
    /// Known emote names, case preserved
    pub emotes: HashSet<String>,
}

impl ConfigSnapshot {
    /// Compile a validated configuration. Invalid patterns become
    /// non-matching and are returned alongside the snapshot.
    pub fn compile(config: ModerationConfig) -> (Self, Vec<ConfigError>) {
        let mut errors = Vec::new();

        let whitelist = config
            .whitelist
            .iter()
            .map(|login| login.trim().to_lowercase())
            .filter(|login| !login.is_empty())
            .collect();

        let mut banned_tokens = HashSet::new();
        let mut banned_phrases = Vec::new();
        for word in &config.banned_words {
            let normalized = fingerprint::normalize(word);
            if normalized.is_empty() {
                continue;
            }
            if normalized.contains(' ') {
                banned_phrases.push(normalized);
            } else {
                banned_tokens.insert(normalized);
            }
        }

        let promo_phrases = config
            .advertising
            .promo_phrases
            .iter()
            .map(|phrase| fingerprint::normalize(phrase))
            .filter(|phrase| !phrase.is_empty())
            .collect();

        let mut rules = Vec::new();
        for rule in &config.moderation_rules {
            let matcher = match &rule.pattern {
                Some(pattern) => Self::pattern(pattern, &rule.options, &mut errors),
                None => Matcher::literal(&rule.words, &rule.options),
            };
            rules.push(ModerationRule {
                name: rule.name.clone(),
                options: rule.options,
                matchers: vec![matcher],
                punishments: rule.punishments.clone(),
                reset_window: Duration::from_secs(rule.reset_secs),
            });
        }
        for group in &config.moderation_groups {
            let mut matchers: Vec<Matcher> = group
                .words
                .iter()
                .map(|word| Matcher::literal([word], &group.options))
                .collect();
            for pattern in &group.patterns {
                matchers.push(Self::pattern(pattern, &group.options, &mut errors));
            }
            rules.push(ModerationRule {
                name: group.name.clone(),
                options: group.options,
                matchers,
                punishments: group.punishments.clone(),
                reset_window: Duration::from_secs(group.reset_secs),
            });
        }

        let default_profile = Self::profile(&config.spam.default, &mut errors);
        let vip_profile = Self::profile(&config.spam.vip, &mut errors);
        let emotes = config.emotes.iter().cloned().collect();

        let snapshot = Self {
            whitelist,
            banned_tokens,
            banned_phrases,
            promo_phrases,
            rules,
            default_profile,
            vip_profile,
            emotes,
            config,
        };
        (snapshot, errors)
    }

    fn pattern(source: &str, options: &RuleOptions, errors: &mut Vec<ConfigError>) -> Matcher {
        let (matcher, error) = Matcher::pattern_or_invalid(source, options);
        if let Some(e) = error {
            errors.push(e);
        }
        matcher
    }

    fn profile(profile: &SpamProfile, errors: &mut Vec<ConfigError>) -> CompiledSpamProfile {
        CompiledSpamProfile {
            settings: profile.clone(),
            exceptions: Self::exceptions(&profile.exceptions, errors),
            emote_exceptions: Self::exceptions(&profile.emote.exceptions, errors),
        }
    }

    fn exceptions(configs: &[ExceptionConfig], errors: &mut Vec<ConfigError>) -> Vec<SpamException> {
        let mut exceptions = Vec::with_capacity(configs.len());
        for exception in configs {
            let matcher = match &exception.pattern {
                Some(pattern) => Self::pattern(pattern, &exception.options, errors),
                None => Matcher::literal(&exception.words, &exception.options),
            };
            exceptions.push(SpamException {
                rule: ModerationRule {
                    name: exception.name.clone(),
                    options: exception.options,
                    matchers: vec![matcher],
                    punishments: exception.punishments.clone(),
                    reset_window: Duration::from_secs(exception.reset_secs),
                },
                message_limit: exception.message_limit,
            });
        }
        exceptions
    }

    /// Whether `normalized` text contains a banned word or phrase
    pub fn contains_banned(&self, tokens: &[String], normalized: &str) -> Option<String> {
        if let Some(token) = tokens.iter().find(|t| self.banned_tokens.contains(t.as_str())) {
            return Some(token.clone());
        }
        let padded = format!(" {} ", normalized);
        self.banned_phrases
            .iter()
            .find(|phrase| padded.contains(&format!(" {} ", phrase)))
            .cloned()
    }
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self::compile(ModerationConfig::default()).0
    }
}

/// Process-wide slot holding the current snapshot. Readers take one `Arc` per
/// logical operation; writers swap the whole snapshot.
#[derive(Debug)]
pub struct SnapshotCell {
    current: StdRwLock<Arc<ConfigSnapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: StdRwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, snapshot: ConfigSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone)]
pub enum ConfigChangeEvent {
    ModerationUpdated { file: String, pattern_errors: usize },
    ValidationError { file: String, error: String },
    ReloadComplete { files_updated: Vec<String> },
}

/// Loads `moderation.yaml`, keeps the snapshot cell current and watches the
/// directory for edits.
#[derive(Clone)]
pub struct ConfigurationManager {
    config_dir: PathBuf,
    snapshot: Arc<SnapshotCell>,
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,
    change_notifier: broadcast::Sender<ConfigChangeEvent>,
    validator: Arc<ConfigValidator>,
    last_reload: Arc<RwLock<Instant>>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            snapshot: Arc::new(SnapshotCell::default()),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
            validator: Arc::new(ConfigValidator::new()),
            last_reload: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Create the directory, load or create the config file and start watching
    pub async fn initialize(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir)
                .await
                .with_context(|| format!("creating {}", self.config_dir.display()))?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        self.load_or_create().await?;
        self.setup_file_watcher().await?;

        info!("Configuration manager initialized successfully");
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    async fn load_or_create(&self) -> Result<()> {
        let path = self.config_path();
        let file = if path.exists() {
            let config = Self::load_config(&path, &self.validator).await?;
            Self::apply(&self.snapshot, config, CONFIG_FILE, &self.change_notifier);
            CONFIG_FILE.to_string()
        } else {
            warn!("{} not found, writing defaults", path.display());
            self.write_config(&ModerationConfig::default()).await?;
            Self::apply(&self.snapshot, ModerationConfig::default(), CONFIG_FILE, &self.change_notifier);
            format!("{} (created default)", CONFIG_FILE)
        };

        let _ = self
            .change_notifier
            .send(ConfigChangeEvent::ReloadComplete { files_updated: vec![file] });
        Ok(())
    }

    /// Read, parse and validate one configuration file
    pub async fn load_config(path: &Path, validator: &ConfigValidator) -> Result<ModerationConfig> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ModerationConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        validator.validate(&config)?;
        debug!("Loaded moderation configuration from {}", path.display());
        Ok(config)
    }

    /// Compile and publish a configuration, logging pattern errors
    fn apply(
        cell: &SnapshotCell,
        config: ModerationConfig,
        file: &str,
        notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) {
        let (snapshot, errors) = ConfigSnapshot::compile(config);
        for e in &errors {
            error!("{}: {} (rule disabled)", file, e);
        }
        info!(
            "Moderation config active: {} rules, {} banned words, {} emotes",
            snapshot.rules.len(),
            snapshot.banned_tokens.len() + snapshot.banned_phrases.len(),
            snapshot.emotes.len()
        );
        cell.store(snapshot);
        let _ = notifier.send(ConfigChangeEvent::ModerationUpdated {
            file: file.to_string(),
            pattern_errors: errors.len(),
        });
    }

    async fn write_config(&self, config: &ModerationConfig) -> Result<()> {
        let path = self.config_path();
        let content = serde_yaml::to_string(config).context("serializing moderation config")?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    async fn setup_file_watcher(&self) -> Result<()> {
        let snapshot = self.snapshot.clone();
        let change_notifier = self.change_notifier.clone();
        let validator = self.validator.clone();
        let last_reload = self.last_reload.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&self.config_dir, RecursiveMode::NonRecursive)?;
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_)) {
                    continue;
                }

                {
                    let now = Instant::now();
                    let last = *last_reload.read().await;
                    if now.duration_since(last) < RELOAD_DEBOUNCE {
                        continue;
                    }
                    *last_reload.write().await = now;
                }

                for path in event.paths {
                    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if filename != CONFIG_FILE && filename != "moderation.yml" {
                        debug!("Ignoring change to non-config file: {}", filename);
                        continue;
                    }

                    info!("Moderation configuration changed, reloading...");
                    match Self::load_config(&path, &validator).await {
                        Ok(config) => Self::apply(&snapshot, config, filename, &change_notifier),
                        Err(e) => {
                            error!("Failed to reload {}: {:#}", filename, e);
                            let _ = change_notifier.send(ConfigChangeEvent::ValidationError {
                                file: filename.to_string(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        });

        info!("File watcher setup for hot-reloading");
        Ok(())
    }

    /// Shared snapshot cell read by the classifier
    pub fn snapshot(&self) -> Arc<SnapshotCell> {
        self.snapshot.clone()
    }

    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    /// Validate, persist and publish a new configuration
    pub async fn save_config(&self, config: ModerationConfig) -> Result<()> {
        self.validator.validate(&config)?;
        *self.last_reload.write().await = Instant::now();
        self.write_config(&config).await?;
        Self::apply(&self.snapshot, config, CONFIG_FILE, &self.change_notifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModerationConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());

        let (snapshot, errors) = ConfigSnapshot::compile(config);
        assert!(errors.is_empty());
        assert_eq!(snapshot.rules.len(), 1);
    }

    #[test]
    fn test_yaml_with_partial_sections() {
        let yaml = r#"
enabled: true
mode: online_only
whitelist: [SomeBot]
banned_words: ["badword", "two words"]
moderation_rules:
  - name: links
    words: ["bit.ly"]
    substring: true
    exempt_subscriber: true
    punishments:
      - action: timeout
        duration: 30
spam:
  default:
    similarity_threshold: 0.75
    message_limit: 3
    min_gap: 0
"#;
        let config: ModerationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, ModerationMode::OnlineOnly);
        assert!(config.moderation_rules[0].options.substring);
        assert!(config.moderation_rules[0].options.exempt_subscriber);
        assert_eq!(config.moderation_rules[0].reset_secs, 600);
        assert_eq!(config.spam.default.history_secs, 30);
        assert_eq!(config.store.shards, 16);

        let (snapshot, errors) = ConfigSnapshot::compile(config);
        assert!(errors.is_empty());
        assert!(snapshot.whitelist.contains("somebot"));
        assert!(snapshot.banned_tokens.contains("badword"));
        assert_eq!(snapshot.banned_phrases, vec!["two words".to_string()]);
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = ModerationConfig::default();
        config.spam.default.similarity_threshold = 1.5;
        assert!(matches!(
            validator.validate(&config),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let mut config = ModerationConfig::default();
        config.spam.vip.punishments.clear();
        assert_eq!(
            validator.validate(&config),
            Err(ConfigError::EmptyPunishments("spam.vip".to_string()))
        );

        let mut config = ModerationConfig::default();
        config.store.shards = 0;
        assert!(matches!(validator.validate(&config), Err(ConfigError::ZeroValue(_))));

        let mut config = ModerationConfig::default();
        config.spam.vip.emote.exceptions = vec![ExceptionConfig {
            name: "hype".to_string(),
            options: RuleOptions::default(),
            words: vec!["hype".to_string()],
            pattern: None,
            message_limit: 0,
            punishments: vec![Punishment::timeout(10)],
            reset_secs: 60,
        }];
        assert_eq!(
            validator.validate(&config),
            Err(ConfigError::ZeroValue("spam.vip exception 'hype' message_limit".to_string()))
        );
    }

    #[test]
    fn test_invalid_pattern_is_soft_error() {
        let mut config = ModerationConfig::default();
        config.moderation_groups.push(GroupConfig {
            name: "broken".to_string(),
            options: RuleOptions::default(),
            words: vec!["fine".to_string()],
            patterns: vec!["(unclosed".to_string()],
            punishments: vec![Punishment::delete()],
            reset_secs: 60,
        });
        assert!(ConfigValidator::new().validate(&config).is_ok());

        let (snapshot, errors) = ConfigSnapshot::compile(config);
        assert_eq!(errors.len(), 1);
        let group = &snapshot.rules[1];
        assert!(!group.matchers[1].is_valid());
        assert_eq!(group.first_match(&ChatMessage::new("m", "u", "l", "(unclosed")), None);
        assert_eq!(group.first_match(&ChatMessage::new("m", "u", "l", "this is fine")), Some(0));
    }

    #[test]
    fn test_banned_phrases_match_on_token_boundaries() {
        let config = ModerationConfig {
            banned_words: vec!["Bad Phrase".to_string(), "slur".to_string()],
            ..ModerationConfig::default()
        };
        let (snapshot, _) = ConfigSnapshot::compile(config);

        let hit = ChatMessage::new("m", "u", "l", "what a BAD... phrase");
        assert_eq!(snapshot.contains_banned(&hit.tokens, &hit.normalized), Some("bad phrase".to_string()));

        let miss = ChatMessage::new("m", "u", "l", "badphrase slurp");
        assert_eq!(snapshot.contains_banned(&miss.tokens, &miss.normalized), None);
    }

    #[test]
    fn test_snapshot_cell_swaps_wholesale() {
        let cell = SnapshotCell::default();
        let before = cell.load();

        let mut config = ModerationConfig::default();
        config.enabled = false;
        cell.store(ConfigSnapshot::compile(config).0);

        // A reader holding the old snapshot keeps a consistent view
        assert!(before.config.enabled);
        assert!(!cell.load().config.enabled);
    }

    #[tokio::test]
    async fn test_initialize_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigurationManager::new(dir.path().join("config"));
        manager.initialize().await.unwrap();

        assert!(manager.config_path().exists());
        let loaded = ConfigurationManager::load_config(&manager.config_path(), &ConfigValidator::new())
            .await
            .unwrap();
        assert_eq!(loaded.store.shards, 16);
    }

    #[tokio::test]
    async fn test_save_config_publishes_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigurationManager::new(dir.path());
        manager.initialize().await.unwrap();
        let mut changes = manager.subscribe_to_changes();

        let mut config = ModerationConfig::default();
        config.whitelist = vec!["Nightbot".to_string()];
        manager.save_config(config).await.unwrap();

        assert!(manager.current().whitelist.contains("nightbot"));
        assert!(matches!(
            changes.recv().await.unwrap(),
            ConfigChangeEvent::ModerationUpdated { pattern_errors: 0, .. }
        ));

        let mut invalid = ModerationConfig::default();
        invalid.pipeline.queue_capacity = 0;
        assert!(manager.save_config(invalid).await.is_err());
        assert!(manager.current().whitelist.contains("nightbot"));
    }
}

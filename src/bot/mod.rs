use anyhow::Result;
use log::{error, info};
use std::sync::Arc;

use crate::config::SnapshotCell;
use crate::platforms::eventsub::WebSocketFeed;
use crate::platforms::helix::HelixClient;
use crate::platforms::twitch::{FirstMessageWatcher, TwitchConfig};
use crate::platforms::{
    ChannelState, DryRunSink, EmoteSet, FirstMessageOracle, ModerationSink, NoFirstMessageOracle, StaticEmoteSet,
    Subscriber,
};
use crate::store::ExpiringStore;
use crate::types::ChatMessage;

pub mod advertising;
pub mod escalation;
pub mod fingerprint;
pub mod moderation;
pub mod pattern_matching;
pub mod pipeline;
pub mod shutdown;
pub mod stats;
pub mod workers;

use moderation::{execute_verdict, Classifier, ClassifierStores};
use pipeline::IngestionPipeline;
use shutdown::{GracefulShutdown, TaskComponent};
use stats::StreamStats;
use workers::MessageHandler;

/// Wires the moderation core to Twitch and runs it until shutdown
pub struct ModBot {
    twitch: TwitchConfig,
    config: Arc<SnapshotCell>,
    channel: Arc<ChannelState>,
    stats: Arc<StreamStats>,
    dry_run: bool,
}

impl ModBot {
    pub fn new(twitch: TwitchConfig, config: Arc<SnapshotCell>) -> Self {
        let channel = Arc::new(ChannelState::new(twitch.channel.clone()));
        Self {
            twitch,
            config,
            channel,
            stats: Arc::new(StreamStats::new()),
            dry_run: false,
        }
    }

    /// Log verdicts instead of sending them to Twitch
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn channel(&self) -> &Arc<ChannelState> {
        &self.channel
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Classify, count and enforce one message
    pub fn message_handler(
        classifier: Arc<Classifier>,
        sink: Arc<dyn ModerationSink>,
        stats: Arc<StreamStats>,
    ) -> MessageHandler {
        Arc::new(move |message: ChatMessage| {
            let verdict = classifier.check(&message);
            stats.record_verdict(verdict.kind);
            execute_verdict(&verdict, &message, sink.as_ref());
        })
    }

    /// Spawn every long-running task and register it with `shutdown`
    pub async fn start(&self, shutdown: &GracefulShutdown) -> Result<()> {
        let token = shutdown.token();
        let snapshot = self.config.load();

        let stores = ClassifierStores::new(&snapshot.config.store);
        shutdown
            .register_component(Box::new(TaskComponent::new(
                "store-reclaimers",
                stores.spawn_reclaimers(&token),
            )))
            .await;

        let oracle: Arc<dyn FirstMessageOracle> = match self.twitch.irc_username.clone() {
            Some(username) => {
                let seen = Arc::new(ExpiringStore::new(
                    "first-messages",
                    snapshot.config.store.shards,
                    snapshot.config.store.reclaim_interval(),
                ));
                let watcher = Arc::new(FirstMessageWatcher::new(seen.clone()));
                let handles = vec![
                    seen.spawn_reclaimer(token.clone()),
                    tokio::spawn(watcher.clone().run(self.twitch.clone(), username, token.clone())),
                ];
                shutdown
                    .register_component(Box::new(TaskComponent::new("irc-side-channel", handles)))
                    .await;
                watcher
            }
            None => {
                info!("TWITCH_IRC_USERNAME not set, first-message rules will never match");
                Arc::new(NoFirstMessageOracle)
            }
        };

        let helix = Arc::new(HelixClient::new(&self.twitch)?);
        let sink: Arc<dyn ModerationSink> = if self.dry_run {
            info!("Dry run: verdicts are logged, not enforced");
            Arc::new(DryRunSink)
        } else {
            helix.clone()
        };
        let subscriber: Arc<dyn Subscriber> = helix;

        // Configured emotes are read from each check's snapshot
        let emotes: Arc<dyn EmoteSet> = Arc::new(StaticEmoteSet::default());
        let classifier = Arc::new(Classifier::new(
            self.config.clone(),
            self.channel.clone(),
            emotes,
            oracle,
            &stores,
        )?);

        let mut pipeline = IngestionPipeline::new(
            WebSocketFeed::new(),
            subscriber,
            Self::message_handler(classifier, sink, self.stats.clone()),
            self.channel.clone(),
            self.stats.clone(),
            self.config.clone(),
            self.twitch.eventsub_url.clone(),
        );

        let pipeline_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = pipeline.run(pipeline_token).await {
                error!("Ingestion pipeline failed: {:#}", e);
            }
        });
        shutdown
            .register_component(Box::new(TaskComponent::new("ingestion-pipeline", vec![handle])))
            .await;

        info!("Moderating #{}", self.channel.name());
        Ok(())
    }
}

// src/bot/pipeline.rs - Event feed reader, routing and per-generation worker fan-out

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::bot::stats::StreamStats;
use crate::bot::workers::{MessageHandler, WorkerPool};
use crate::config::SnapshotCell;
use crate::platforms::eventsub::decode_frame;
use crate::platforms::{ChannelState, EventFeed, Subscriber};
use crate::types::FeedEvent;

/// Connection state of the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Subscribing,
    Streaming,
    ReconnectRequested,
    Error,
    Closed,
}

/// Why a generation ended
#[derive(Debug, PartialEq, Eq)]
enum GenerationEnd {
    Reconnect(Option<String>),
    Closed,
    Shutdown,
}

/// Reads the event feed, keeps channel state and stats current and hands chat
/// messages to a worker pool scoped to one connection generation.
pub struct IngestionPipeline<F: EventFeed> {
    feed: F,
    subscriber: Arc<dyn Subscriber>,
    handler: MessageHandler,
    channel: Arc<ChannelState>,
    stats: Arc<StreamStats>,
    config: Arc<SnapshotCell>,
    default_url: String,
    generation: u64,
    state: watch::Sender<ConnectionState>,
}

impl<F: EventFeed> IngestionPipeline<F> {
    pub fn new(
        feed: F,
        subscriber: Arc<dyn Subscriber>,
        handler: MessageHandler,
        channel: Arc<ChannelState>,
        stats: Arc<StreamStats>,
        config: Arc<SnapshotCell>,
        default_url: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            feed,
            subscriber,
            handler,
            channel,
            stats,
            config,
            default_url: default_url.into(),
            generation: 0,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Connection state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Connect, stream and reconnect with a fixed backoff until `shutdown` fires
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut next_url: Option<String> = None;

        while !shutdown.is_cancelled() {
            self.generation += 1;
            let url = next_url.take().unwrap_or_else(|| self.default_url.clone());

            match self.run_generation(&url, &shutdown).await {
                Ok(GenerationEnd::Shutdown) => break,
                Ok(GenerationEnd::Reconnect(url)) => {
                    info!("Reconnect requested by the event feed");
                    next_url = url;
                }
                Ok(GenerationEnd::Closed) => warn!("Event feed closed the connection"),
                Err(e) => {
                    self.set_state(ConnectionState::Error);
                    error!("Generation {} failed: {:#}", self.generation, e);
                }
            }

            let backoff = self.config.load().config.pipeline.reconnect_backoff();
            info!("Reconnecting in {:?}", backoff);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Ingestion pipeline stopped after {} generations", self.generation);
        Ok(())
    }

    async fn run_generation(&mut self, url: &str, shutdown: &CancellationToken) -> Result<GenerationEnd> {
        self.set_state(ConnectionState::Connecting);
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(GenerationEnd::Shutdown),
            connected = self.feed.connect(url) => connected?,
        }

        let pipeline = self.config.load().config.pipeline.clone();
        let pool = match WorkerPool::start(
            self.generation,
            pipeline.worker_count(),
            pipeline.queue_capacity,
            shutdown.child_token(),
            self.handler.clone(),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                self.close_feed().await;
                return Err(e);
            }
        };

        let outcome = self.stream(&pool, shutdown).await;
        self.close_feed().await;

        // Every worker of this generation is gone before the next connect
        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .context("Worker pool shutdown panicked")?;

        outcome
    }

    async fn close_feed(&mut self) {
        if let Err(e) = self.feed.close().await {
            warn!("Failed to close event feed: {:#}", e);
        }
    }

    async fn stream(&mut self, pool: &WorkerPool, shutdown: &CancellationToken) -> Result<GenerationEnd> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return Ok(GenerationEnd::Shutdown),
                frame = self.feed.next_frame() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e),
                None => return Ok(GenerationEnd::Closed),
            };

            let event = match decode_frame(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                    continue;
                }
            };

            match self.route(event, pool).await {
                Ok(Some(end)) => return Ok(end),
                Ok(None) => {}
                // A dispatch abandoned by cancellation is a shutdown, not a failure
                Err(_) if shutdown.is_cancelled() => return Ok(GenerationEnd::Shutdown),
                Err(e) => return Err(e),
            }
        }
    }

    async fn route(&mut self, event: FeedEvent, pool: &WorkerPool) -> Result<Option<GenerationEnd>> {
        match event {
            FeedEvent::SessionWelcome { session_id } => {
                info!("EventSub session {} established", session_id);
                self.set_state(ConnectionState::Subscribing);
                // Subscription failures never end the session
                if let Err(e) = self.subscriber.subscribe(&session_id).await {
                    error!("Failed to create EventSub subscriptions: {:#}", e);
                }
                self.set_state(ConnectionState::Streaming);
            }
            FeedEvent::Keepalive => debug!("Keepalive"),
            FeedEvent::Reconnect { url } => {
                self.set_state(ConnectionState::ReconnectRequested);
                return Ok(Some(GenerationEnd::Reconnect(url)));
            }
            FeedEvent::Revocation { subscription_type, status } => {
                warn!("Subscription {} revoked: {}", subscription_type, status);
            }
            FeedEvent::ChatMessage(message) | FeedEvent::AutomodHold(message) => {
                self.stats.record_message(message.from_automod);
                pool.dispatch(message)?;
            }
            FeedEvent::StreamOnline => {
                self.channel.set_live(true);
                self.stats.start_window();
            }
            FeedEvent::StreamOffline => {
                self.channel.set_live(false);
                self.stats.end_window();
            }
            FeedEvent::ChannelUpdate { title, category } => {
                info!("Channel updated: '{}' in {}", title, category);
                self.channel.set_info(title, category);
            }
            FeedEvent::ModeratorAction { action, moderator } => {
                debug!("{} performed {}", moderator, action);
                self.stats.record_moderator_action();
            }
            FeedEvent::Unknown { message_type } => debug!("Ignoring {} frame", message_type),
        }
        Ok(None)
    }
}

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::platforms::eventsub::DEFAULT_EVENTSUB_URL;
use crate::platforms::FirstMessageOracle;
use crate::store::ExpiringStore;

const IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const FIRST_MESSAGE_RETENTION: Duration = Duration::from_secs(60);
const ORACLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const IRC_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Credentials and identity of the moderated channel
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub access_token: String,
    pub broadcaster_id: String,
    pub moderator_id: String,
    pub channel: String,
    /// Enables the IRC first-message side channel when set
    pub irc_username: Option<String>,
    pub eventsub_url: String,
}

impl TwitchConfig {
    /// Load Twitch configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("TWITCH_CLIENT_ID")
            .context("TWITCH_CLIENT_ID environment variable not set")?;

        let access_token = env::var("TWITCH_ACCESS_TOKEN")
            .context("TWITCH_ACCESS_TOKEN environment variable not set")?;

        let broadcaster_id = env::var("TWITCH_BROADCASTER_ID")
            .context("TWITCH_BROADCASTER_ID environment variable not set")?;

        // Acting as the broadcaster when no separate moderator account is given
        let moderator_id = env::var("TWITCH_MODERATOR_ID").unwrap_or_else(|_| broadcaster_id.clone());

        let channel = env::var("TWITCH_CHANNEL")
            .context("TWITCH_CHANNEL environment variable not set")?
            .trim()
            .trim_start_matches('#')
            .to_lowercase();

        if channel.is_empty() {
            return Err(anyhow::anyhow!("TWITCH_CHANNEL is empty"));
        }

        // The API wants the bare token, IRC wants the oauth: prefix
        let access_token = access_token.trim_start_matches("oauth:").to_string();

        let irc_username = env::var("TWITCH_IRC_USERNAME").ok().filter(|s| !s.is_empty());
        let eventsub_url = env::var("EVENTSUB_URL").unwrap_or_else(|_| DEFAULT_EVENTSUB_URL.to_string());

        info!("Loaded Twitch config for channel '{}'", channel);
        debug!("Broadcaster {}, moderator {}", broadcaster_id, moderator_id);

        Ok(Self {
            client_id,
            access_token,
            broadcaster_id,
            moderator_id,
            channel,
            irc_username,
            eventsub_url,
        })
    }
}

/// Extract the message id from a PRIVMSG line tagged `first-msg=1`
pub fn parse_first_message(line: &str) -> Option<String> {
    // Format: @badges=...;first-msg=1;id=...;... :user!user@user.tmi.twitch.tv PRIVMSG #channel :message
    let tags_part = line.strip_prefix('@')?;
    let space_pos = tags_part.find(' ')?;
    let (tags, rest) = tags_part.split_at(space_pos);
    if !rest.contains(" PRIVMSG ") {
        return None;
    }

    let mut first = false;
    let mut id = None;
    for tag in tags.split(';') {
        match tag.split_once('=') {
            Some(("first-msg", value)) => first = value == "1",
            Some(("id", value)) if !value.is_empty() => id = Some(value.to_string()),
            _ => {}
        }
    }

    if first {
        id
    } else {
        None
    }
}

/// Watches IRC for first-message tags and answers the oracle from what it saw.
#[derive(Debug)]
pub struct FirstMessageWatcher {
    seen: Arc<ExpiringStore<String, ()>>,
}

impl FirstMessageWatcher {
    pub fn new(seen: Arc<ExpiringStore<String, ()>>) -> Self {
        Self { seen }
    }

    pub fn store(&self) -> &Arc<ExpiringStore<String, ()>> {
        &self.seen
    }

    /// Record every first message in a websocket frame
    pub fn handle_frame(&self, frame: &str) {
        for line in frame.lines() {
            if let Some(id) = parse_first_message(line.trim()) {
                debug!("First message seen: {}", id);
                self.seen.push(id, (), FIRST_MESSAGE_RETENTION);
            }
        }
    }

    /// Keep an IRC connection open until `shutdown` fires
    pub async fn run(self: Arc<Self>, config: TwitchConfig, username: String, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            if let Err(e) = self.run_connection(&config, &username, &shutdown).await {
                error!("IRC side channel error: {:#}", e);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(IRC_RECONNECT_DELAY) => {}
            }
        }
        info!("IRC side channel stopped");
    }

    async fn run_connection(&self, config: &TwitchConfig, username: &str, shutdown: &CancellationToken) -> Result<()> {
        let url = Url::parse(IRC_URL).context("Failed to parse Twitch WebSocket URL")?;
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(format!("PASS oauth:{}\r\n", config.access_token))).await
            .context("Failed to send PASS command")?;
        write.send(Message::Text(format!("NICK {}\r\n", username))).await
            .context("Failed to send NICK command")?;
        write.send(Message::Text("CAP REQ :twitch.tv/tags twitch.tv/commands\r\n".to_string())).await
            .context("Failed to request capabilities")?;
        write.send(Message::Text(format!("JOIN #{}\r\n", config.channel))).await
            .with_context(|| format!("Failed to join channel: {}", config.channel))?;
        info!("IRC side channel joined #{}", config.channel);

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    if text.starts_with("PING") {
                        debug!("Responding to PING");
                        write.send(Message::Text(text.replace("PING", "PONG"))).await
                            .context("Failed to send PONG")?;
                        continue;
                    }
                    self.handle_frame(&text);
                }
                Some(Ok(Message::Ping(payload))) => {
                    write.send(Message::Pong(payload)).await.context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(close_frame))) => {
                    info!("IRC connection closed: {:?}", close_frame);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("IRC read failed"),
                None => {
                    warn!("IRC stream ended");
                    return Ok(());
                }
            }
        }
    }
}

impl FirstMessageOracle for FirstMessageWatcher {
    fn is_first_message(&self, message_id: &str, timeout: Duration) -> Option<bool> {
        let key = message_id.to_string();
        let deadline = Instant::now() + timeout;

        loop {
            if self.seen.len(&key) > 0 {
                return Some(true);
            }
            if Instant::now() >= deadline {
                debug!("First-message lookup for {} timed out", message_id);
                return None;
            }
            std::thread::sleep(ORACLE_POLL_INTERVAL);
        }
    }
}

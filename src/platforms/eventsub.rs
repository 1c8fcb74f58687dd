// src/platforms/eventsub.rs - EventSub websocket feed and frame decoding

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::platforms::EventFeed;
use crate::types::{ChatMessage, ChatterRoles, FeedEvent, ReplyParent};

pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Why a frame could not be turned into a [`FeedEvent`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct Frame {
    metadata: Metadata,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    message_type: String,
    #[serde(default)]
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    id: String,
    #[serde(default)]
    reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    subscription: Subscription,
    #[serde(default)]
    event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    text: String,
    #[serde(default)]
    fragments: Vec<Fragment>,
}

#[derive(Debug, Deserialize)]
struct Fragment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Badge {
    set_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatMessageEvent {
    message_id: String,
    chatter_user_id: String,
    chatter_user_login: String,
    #[serde(default)]
    chatter_user_name: String,
    message: MessageBody,
    #[serde(default)]
    badges: Vec<Badge>,
    #[serde(default)]
    reply: Option<ReplyEvent>,
}

#[derive(Debug, Deserialize)]
struct ReplyEvent {
    parent_message_id: String,
    parent_user_id: String,
    parent_user_login: String,
}

#[derive(Debug, Deserialize)]
struct AutomodHoldEvent {
    message_id: String,
    user_id: String,
    user_login: String,
    #[serde(default)]
    user_name: String,
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct ChannelUpdateEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    category_name: String,
}

#[derive(Debug, Deserialize)]
struct ModerateEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    moderator_user_login: String,
}

/// Count emote fragments and whether the visible text is emotes only
fn emote_fragments(fragments: &[Fragment]) -> (usize, bool) {
    let emotes = fragments.iter().filter(|f| f.kind == "emote").count();
    let others = fragments
        .iter()
        .filter(|f| f.kind != "emote" && !f.text.trim().is_empty())
        .count();
    (emotes, emotes > 0 && others == 0)
}

fn display_or_login(name: String, login: &str) -> String {
    if name.is_empty() {
        login.to_string()
    } else {
        name
    }
}

/// Decode one text frame from the feed
pub fn decode_frame(text: &str) -> Result<FeedEvent, DecodeError> {
    let frame: Frame = serde_json::from_str(text)?;

    match frame.metadata.message_type.as_str() {
        "session_welcome" => {
            let payload: SessionPayload = serde_json::from_value(frame.payload)?;
            Ok(FeedEvent::SessionWelcome {
                session_id: payload.session.id,
            })
        }
        "session_keepalive" => Ok(FeedEvent::Keepalive),
        "session_reconnect" => {
            let payload: SessionPayload = serde_json::from_value(frame.payload)?;
            Ok(FeedEvent::Reconnect {
                url: payload.session.reconnect_url,
            })
        }
        "revocation" => {
            let payload: NotificationPayload = serde_json::from_value(frame.payload)?;
            Ok(FeedEvent::Revocation {
                subscription_type: payload.subscription.kind,
                status: payload.subscription.status,
            })
        }
        "notification" => {
            let payload: NotificationPayload = serde_json::from_value(frame.payload)?;
            let subscription_type = frame
                .metadata
                .subscription_type
                .unwrap_or_else(|| payload.subscription.kind.clone());
            decode_notification(&subscription_type, payload.event)
        }
        other => Ok(FeedEvent::Unknown {
            message_type: other.to_string(),
        }),
    }
}

fn decode_notification(subscription_type: &str, event: serde_json::Value) -> Result<FeedEvent, DecodeError> {
    if event.is_null() {
        return Err(DecodeError::MissingField("payload.event"));
    }

    match subscription_type {
        "channel.chat.message" => {
            let event: ChatMessageEvent = serde_json::from_value(event)?;
            let (emote_count, emote_only) = emote_fragments(&event.message.fragments);
            let roles = ChatterRoles::from_badges(event.badges.iter().map(|b| b.set_id.as_str()));
            let reply = event.reply.map(|r| ReplyParent {
                message_id: r.parent_message_id,
                user_id: r.parent_user_id,
                user_login: r.parent_user_login,
            });
            let display_name = display_or_login(event.chatter_user_name, &event.chatter_user_login);

            Ok(FeedEvent::ChatMessage(
                ChatMessage::new(
                    event.message_id,
                    event.chatter_user_id,
                    event.chatter_user_login,
                    event.message.text,
                )
                .with_display_name(display_name)
                .with_roles(roles)
                .with_emotes(emote_count, emote_only)
                .with_reply_parent(reply),
            ))
        }
        "automod.message.hold" => {
            let event: AutomodHoldEvent = serde_json::from_value(event)?;
            let (emote_count, emote_only) = emote_fragments(&event.message.fragments);
            let display_name = display_or_login(event.user_name, &event.user_login);

            Ok(FeedEvent::AutomodHold(
                ChatMessage::new(event.message_id, event.user_id, event.user_login, event.message.text)
                    .with_display_name(display_name)
                    .with_emotes(emote_count, emote_only)
                    .held_by_automod(),
            ))
        }
        "stream.online" => Ok(FeedEvent::StreamOnline),
        "stream.offline" => Ok(FeedEvent::StreamOffline),
        "channel.update" => {
            let event: ChannelUpdateEvent = serde_json::from_value(event)?;
            Ok(FeedEvent::ChannelUpdate {
                title: event.title,
                category: event.category_name,
            })
        }
        "channel.moderate" => {
            let event: ModerateEvent = serde_json::from_value(event)?;
            Ok(FeedEvent::ModeratorAction {
                action: event.action,
                moderator: event.moderator_user_login,
            })
        }
        other => Ok(FeedEvent::Unknown {
            message_type: format!("notification:{}", other),
        }),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// EventSub websocket connection
#[derive(Default)]
pub struct WebSocketFeed {
    stream: Option<WsStream>,
}

impl WebSocketFeed {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventFeed for WebSocketFeed {
    async fn connect(&mut self, url: &str) -> Result<()> {
        let url = Url::parse(url).with_context(|| format!("Invalid EventSub URL: {}", url))?;
        info!("Connecting to EventSub at {}", url);

        let (stream, _) = connect_async(url)
            .await
            .context("Failed to connect to EventSub WebSocket")?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String>> {
        let stream = self.stream.as_mut()?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Ping(payload))) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = stream.send(Message::Pong(payload)).await {
                        return Some(Err(e).context("Failed to send pong"));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("EventSub connection closed: {:?}", frame);
                    return None;
                }
                Some(Ok(_)) => debug!("Ignoring non-text frame"),
                Some(Err(e)) => return Some(Err(e).context("EventSub read failed")),
                None => {
                    warn!("EventSub stream ended");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.close(None).await.context("Failed to close EventSub WebSocket")?;
        }
        Ok(())
    }
}

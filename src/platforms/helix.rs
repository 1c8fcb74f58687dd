// src/platforms/helix.rs - Helix API client: moderation actions and EventSub subscriptions

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::platforms::twitch::TwitchConfig;
use crate::platforms::{ModerationSink, Subscriber};

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Event types subscribed for every session, with their versions
const SUBSCRIPTIONS: &[(&str, &str)] = &[
    ("channel.chat.message", "1"),
    ("automod.message.hold", "1"),
    ("stream.online", "1"),
    ("stream.offline", "1"),
    ("channel.update", "2"),
    ("channel.moderate", "1"),
];

#[derive(Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
    broadcaster_id: String,
    moderator_id: String,
    runtime: Handle,
}

impl HelixClient {
    /// Must be called from within a tokio runtime; actions are spawned onto it.
    pub fn new(config: &TwitchConfig) -> Result<Self> {
        let runtime = Handle::try_current().context("HelixClient requires a tokio runtime")?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("streamguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: HELIX_BASE_URL.to_string(),
            client_id: config.client_id.clone(),
            access_token: config.access_token.clone(),
            broadcaster_id: config.broadcaster_id.clone(),
            moderator_id: config.moderator_id.clone(),
            runtime,
        })
    }

    fn moderation_query(&self) -> [(&'static str, String); 2] {
        [
            ("broadcaster_id", self.broadcaster_id.clone()),
            ("moderator_id", self.moderator_id.clone()),
        ]
    }

    /// Request body for a ban; a duration turns it into a timeout
    pub fn ban_body(user_id: &str, reason: &str, duration_secs: Option<u64>) -> Value {
        let mut data = json!({ "user_id": user_id, "reason": reason });
        if let Some(duration) = duration_secs {
            data["duration"] = json!(duration);
        }
        json!({ "data": data })
    }

    /// One request body per subscribed event type
    pub fn subscription_bodies(&self, session_id: &str) -> Vec<Value> {
        SUBSCRIPTIONS
            .iter()
            .map(|(kind, version)| {
                let condition = match *kind {
                    "channel.chat.message" => json!({
                        "broadcaster_user_id": self.broadcaster_id,
                        "user_id": self.moderator_id,
                    }),
                    "automod.message.hold" | "channel.moderate" => json!({
                        "broadcaster_user_id": self.broadcaster_id,
                        "moderator_user_id": self.moderator_id,
                    }),
                    _ => json!({ "broadcaster_user_id": self.broadcaster_id }),
                };
                json!({
                    "type": kind,
                    "version": version,
                    "condition": condition,
                    "transport": { "method": "websocket", "session_id": session_id },
                })
            })
            .collect()
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
    }

    fn spawn_ban(&self, user_id: &str, reason: &str, duration_secs: Option<u64>) {
        let request = self
            .authorized(self.http.post(format!("{}/moderation/bans", self.base_url)))
            .query(&self.moderation_query())
            .json(&Self::ban_body(user_id, reason, duration_secs));
        let user_id = user_id.to_string();

        self.runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Moderation action applied to {}", user_id);
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("Ban/timeout for {} rejected ({}): {}", user_id, status, body);
                }
                Err(e) => error!("Ban/timeout request for {} failed: {}", user_id, e),
            }
        });
    }
}

impl ModerationSink for HelixClient {
    fn ban(&self, user_id: &str, reason: &str) {
        self.spawn_ban(user_id, reason, None);
    }

    fn timeout(&self, user_id: &str, duration_secs: u64, reason: &str) {
        self.spawn_ban(user_id, reason, Some(duration_secs));
    }

    fn delete_message(&self, message_id: &str) {
        let mut query = self.moderation_query().to_vec();
        query.push(("message_id", message_id.to_string()));
        let request = self
            .authorized(self.http.delete(format!("{}/moderation/chat", self.base_url)))
            .query(&query);
        let message_id = message_id.to_string();

        self.runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Deleted message {}", message_id);
                }
                Ok(response) => warn!("Delete of {} rejected ({})", message_id, response.status()),
                Err(e) => error!("Delete request for {} failed: {}", message_id, e),
            }
        });
    }
}

/// How Helix answered one subscription request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionStatus {
    Created,
    AlreadyExists,
    Rejected,
}

impl SubscriptionStatus {
    fn from_status(status: reqwest::StatusCode) -> Self {
        if status.is_success() {
            SubscriptionStatus::Created
        } else if status == reqwest::StatusCode::CONFLICT {
            SubscriptionStatus::AlreadyExists
        } else {
            SubscriptionStatus::Rejected
        }
    }
}

#[async_trait]
impl Subscriber for HelixClient {
    /// Request every subscription for the session. A rejected or failed
    /// request is logged and skipped; the call errors only when none of
    /// them is active afterwards.
    async fn subscribe(&self, session_id: &str) -> Result<()> {
        let mut active = 0;
        for body in self.subscription_bodies(session_id) {
            let kind = body["type"].as_str().unwrap_or_default().to_string();
            let response = match self
                .authorized(self.http.post(format!("{}/eventsub/subscriptions", self.base_url)))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("Subscription request for {} failed: {}", kind, e);
                    continue;
                }
            };

            let status = response.status();
            match SubscriptionStatus::from_status(status) {
                SubscriptionStatus::Created => {
                    debug!("Subscribed to {}", kind);
                    active += 1;
                }
                SubscriptionStatus::AlreadyExists => {
                    debug!("Already subscribed to {}", kind);
                    active += 1;
                }
                SubscriptionStatus::Rejected => {
                    let text = response.text().await.unwrap_or_default();
                    warn!("Subscription to {} rejected ({}): {}", kind, status, text);
                }
            }
        }

        if active == 0 {
            return Err(anyhow::anyhow!("No EventSub subscription accepted for session {}", session_id));
        }
        info!(
            "{} of {} EventSub subscriptions active for session {}",
            active,
            SUBSCRIPTIONS.len(),
            session_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwitchConfig {
        TwitchConfig {
            client_id: "cid".to_string(),
            access_token: "token".to_string(),
            broadcaster_id: "100".to_string(),
            moderator_id: "200".to_string(),
            channel: "streamer".to_string(),
            irc_username: None,
            eventsub_url: crate::platforms::eventsub::DEFAULT_EVENTSUB_URL.to_string(),
        }
    }

    #[test]
    fn test_ban_body_shapes() {
        let ban = HelixClient::ban_body("42", "spam", None);
        assert_eq!(ban, json!({ "data": { "user_id": "42", "reason": "spam" } }));

        let timeout = HelixClient::ban_body("42", "spam", Some(600));
        assert_eq!(timeout["data"]["duration"], json!(600));
    }

    #[tokio::test]
    async fn test_subscription_bodies() {
        let client = HelixClient::new(&config()).unwrap();
        let bodies = client.subscription_bodies("session-1");
        assert_eq!(bodies.len(), 6);

        let chat = &bodies[0];
        assert_eq!(chat["type"], "channel.chat.message");
        assert_eq!(chat["condition"]["user_id"], "200");
        assert_eq!(chat["transport"]["session_id"], "session-1");

        let automod = &bodies[1];
        assert_eq!(automod["condition"]["moderator_user_id"], "200");

        let update = &bodies[4];
        assert_eq!(update["version"], "2");
        assert_eq!(update["condition"], json!({ "broadcaster_user_id": "100" }));
    }

    #[test]
    fn test_subscription_status_classification() {
        use reqwest::StatusCode;
        assert_eq!(SubscriptionStatus::from_status(StatusCode::ACCEPTED), SubscriptionStatus::Created);
        assert_eq!(SubscriptionStatus::from_status(StatusCode::CONFLICT), SubscriptionStatus::AlreadyExists);
        assert_eq!(SubscriptionStatus::from_status(StatusCode::FORBIDDEN), SubscriptionStatus::Rejected);
        assert_eq!(SubscriptionStatus::from_status(StatusCode::TOO_MANY_REQUESTS), SubscriptionStatus::Rejected);
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(HelixClient::new(&config()).is_err());
    }
}

//! # StreamGuard
//!
//! Real-time chat moderation engine for Twitch channels. Chat events arrive
//! over EventSub, fan out to a pool of classifier workers and come back as
//! deletes, timeouts or bans through the Helix API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ConfigurationManager::new("config"));
//!     config.initialize().await?;
//!
//!     let shutdown = GracefulShutdown::with_default_config();
//!     shutdown.start_signal_handlers();
//!
//!     let bot = ModBot::new(TwitchConfig::from_env()?, config.snapshot());
//!     bot.start(&shutdown).await?;
//!
//!     shutdown.wait_for_shutdown().await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod store;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::moderation::{Classifier, ClassifierStores};
    pub use crate::bot::shutdown::GracefulShutdown;
    pub use crate::bot::ModBot;
    pub use crate::config::{ConfigurationManager, ModerationConfig, SnapshotCell};
    pub use crate::platforms::{twitch::TwitchConfig, ModerationSink};
    pub use crate::store::ExpiringStore;
    pub use crate::types::{ChatMessage, Verdict, VerdictKind};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

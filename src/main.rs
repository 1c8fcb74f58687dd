use anyhow::Result;
use log::{error, info};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use streamguard::bot::shutdown::GracefulShutdown;
use streamguard::bot::ModBot;
use streamguard::config::{ConfigChangeEvent, ConfigurationManager};
use streamguard::platforms::twitch::TwitchConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting StreamGuard v{}", streamguard::VERSION);

    let config_dir = env::var("STREAMGUARD_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));
    let config_manager = Arc::new(ConfigurationManager::new(&config_dir));

    if let Err(e) = config_manager.initialize().await {
        error!("Failed to initialize configuration system: {}", e);
        return Err(e);
    }
    info!("Configuration loaded from {} with hot reload", config_dir.display());

    let mut changes = config_manager.subscribe_to_changes();
    tokio::spawn(async move {
        while let Ok(event) = changes.recv().await {
            if let ConfigChangeEvent::ValidationError { file, error } = event {
                error!("Rejected edit to {}: {}", file, error);
            }
        }
    });

    let twitch = TwitchConfig::from_env()?;
    let dry_run = env::var("STREAMGUARD_DRY_RUN")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let shutdown = GracefulShutdown::with_default_config();
    shutdown.start_signal_handlers();

    let bot = ModBot::new(twitch, config_manager.snapshot()).with_dry_run(dry_run);
    bot.start(&shutdown).await?;

    shutdown.wait_for_shutdown().await?;

    let summary = bot.stats().summary();
    info!(
        "StreamGuard stopped: {} messages seen, {} actions taken",
        summary.messages,
        summary.actions()
    );
    Ok(())
}

// src/bot/shutdown.rs - Graceful shutdown management

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Shutdown phases for orderly termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Shutdown requested, components are stopping
    Draining,
    /// Waiting on components that missed their deadline
    Terminating,
    /// Shutdown complete
    Stopped,
}

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for each component to stop
    pub component_timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            component_timeout_seconds: 10,
        }
    }
}

/// Statistics about the shutdown process
#[derive(Debug, Clone, Default)]
pub struct ShutdownStats {
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub components_shutdown: Vec<String>,
    pub failed_components: Vec<(String, String)>, // (component, error)
    pub forced_termination: bool,
}

/// Component that can be gracefully shut down
#[async_trait::async_trait]
pub trait ShutdownComponent: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    /// Wait for the component to stop. The shutdown token is already cancelled.
    async fn shutdown(&self) -> Result<()>;
}

/// A spawned task that exits on its own once the shutdown token fires
pub struct TaskComponent {
    name: String,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskComponent {
    pub fn new(name: impl Into<String>, handles: Vec<JoinHandle<()>>) -> Self {
        Self {
            name: name.into(),
            handles: Mutex::new(handles),
        }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for TaskComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) -> Result<()> {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}

/// Main graceful shutdown manager. Owns the root cancellation token that every
/// long-running task observes.
pub struct GracefulShutdown {
    config: ShutdownConfig,
    token: CancellationToken,
    phase: Arc<RwLock<ShutdownPhase>>,
    stats: Arc<RwLock<ShutdownStats>>,
    shutdown_notifier: broadcast::Sender<ShutdownPhase>,
    components: Arc<RwLock<Vec<Box<dyn ShutdownComponent>>>>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);

        Self {
            config,
            token: CancellationToken::new(),
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            stats: Arc::new(RwLock::new(ShutdownStats::default())),
            shutdown_notifier: shutdown_tx,
            components: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Token cancelled when shutdown is requested
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a component for graceful shutdown
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent>) {
        let name = component.name().to_string();
        self.components.write().await.push(component);
        debug!("Registered shutdown component: {}", name);
    }

    /// Start listening for shutdown signals
    pub fn start_signal_handlers(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, initiating graceful shutdown...");
                    token.cancel();
                }
                Err(err) => {
                    error!("Failed to listen for Ctrl+C signal: {}", err);
                }
            }
        });

        // Handle SIGTERM (systemd, docker stop, etc.)
        #[cfg(unix)]
        {
            let token = self.token.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM signal, initiating graceful shutdown...");
                        token.cancel();
                    }
                    Err(err) => error!("Failed to register SIGTERM handler: {}", err),
                }
            });
        }

        info!("Shutdown signal handlers started");
    }

    /// Wait for a shutdown request, then stop every registered component
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        info!("Waiting for shutdown signal...");
        self.token.cancelled().await;

        info!("Shutdown requested, beginning graceful shutdown process...");
        self.perform_shutdown().await
    }

    async fn set_phase(&self, phase: ShutdownPhase) {
        *self.phase.write().await = phase;
        let _ = self.shutdown_notifier.send(phase);
    }

    async fn perform_shutdown(&self) -> Result<()> {
        let start_time = chrono::Utc::now();
        self.stats.write().await.started_at = Some(start_time);
        self.set_phase(ShutdownPhase::Draining).await;

        let components = self.components.read().await;
        let component_timeout = Duration::from_secs(self.config.component_timeout_seconds);
        info!("Shutting down {} components...", components.len());

        for component in components.iter() {
            let name = component.name().to_string();
            match timeout(component_timeout, component.shutdown()).await {
                Ok(Ok(())) => {
                    info!("Component '{}' stopped", name);
                    self.stats.write().await.components_shutdown.push(name);
                }
                Ok(Err(e)) => {
                    error!("Component '{}' failed to stop cleanly: {}", name, e);
                    self.stats.write().await.failed_components.push((name, e.to_string()));
                }
                Err(_) => {
                    warn!("Component '{}' did not stop within {:?}", name, component_timeout);
                    self.set_phase(ShutdownPhase::Terminating).await;
                    let mut stats = self.stats.write().await;
                    stats.forced_termination = true;
                    stats.failed_components.push((name, "timed out".to_string()));
                }
            }
        }

        let end_time = chrono::Utc::now();
        self.stats.write().await.completed_at = Some(end_time);
        self.set_phase(ShutdownPhase::Stopped).await;

        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        info!("Graceful shutdown completed in {:.2} seconds", duration);
        Ok(())
    }

    pub async fn get_phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub async fn get_stats(&self) -> ShutdownStats {
        self.stats.read().await.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Subscribe to shutdown phase changes
    pub fn subscribe_to_shutdown(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.shutdown_notifier.subscribe()
    }

    /// Manually trigger shutdown (for testing or programmatic shutdown)
    pub fn trigger_shutdown(&self) {
        info!("Shutdown manually triggered");
        self.token.cancel();
    }
}

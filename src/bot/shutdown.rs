// src/bot/shutdown.rs - Graceful shutdown on Ctrl+C / SIGTERM

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;

use super::ChatBot;

/// Component that can be stopped when the process is asked to exit.
#[async_trait]
pub trait ShutdownComponent: Send + Sync {
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;
}

/// Waits for a termination signal and stops registered components in order.
pub struct GracefulShutdown {
    component_timeout: Duration,
    components: RwLock<Vec<Box<dyn ShutdownComponent>>>,
    requested: watch::Sender<bool>,
}

impl GracefulShutdown {
    pub fn new(component_timeout: Duration) -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            component_timeout,
            components: RwLock::new(Vec::new()),
            requested,
        }
    }

    pub async fn register_component(&self, component: Box<dyn ShutdownComponent>) {
        info!("Registered shutdown component: {}", component.name());
        self.components.write().await.push(component);
    }

    /// Spawn listeners for Ctrl+C and, on unix, SIGTERM.
    pub fn start_signal_handlers(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, initiating graceful shutdown...");
                    this.trigger_shutdown();
                }
                Err(e) => error!("Failed to listen for Ctrl+C signal: {}", e),
            }
        });

        #[cfg(unix)]
        {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM signal, initiating graceful shutdown...");
                        this.trigger_shutdown();
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }
    }

    pub fn trigger_shutdown(&self) {
        self.requested.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.requested.borrow()
    }

    /// Block until shutdown is requested, then stop every component.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut rx = self.requested.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.shutdown_all_components().await;
        Ok(())
    }

    async fn shutdown_all_components(&self) {
        let components = self.components.read().await;
        info!("Shutting down {} components...", components.len());

        for component in components.iter() {
            match timeout(self.component_timeout, component.shutdown()).await {
                Ok(Ok(())) => info!("Component '{}' shut down gracefully", component.name()),
                Ok(Err(e)) => error!("Component '{}' failed to shut down: {}", component.name(), e),
                Err(_) => warn!("Component '{}' shutdown timed out", component.name()),
            }
        }
    }
}

/// Stops the poller and disconnects the platform.
pub struct ChatBotShutdownComponent {
    bot: Arc<ChatBot>,
}

impl ChatBotShutdownComponent {
    pub fn new(bot: Arc<ChatBot>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ShutdownComponent for ChatBotShutdownComponent {
    fn name(&self) -> &str {
        "ChatBot"
    }

    async fn shutdown(&self) -> Result<()> {
        self.bot.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probe {
        name: &'static str,
        called: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl ShutdownComponent for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn shutdown(&self) -> Result<()> {
            self.called.store(true, Ordering::Relaxed);
            if self.fail {
                Err(anyhow::anyhow!("refusing to stop"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_trigger_stops_all_components() {
        let shutdown = Arc::new(GracefulShutdown::new(Duration::from_secs(1)));
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        shutdown
            .register_component(Box::new(Probe { name: "failing", called: first.clone(), fail: true }))
            .await;
        shutdown
            .register_component(Box::new(Probe { name: "ok", called: second.clone(), fail: false }))
            .await;

        assert!(!shutdown.is_shutdown_requested());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait_for_shutdown().await })
        };
        shutdown.trigger_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(first.load(Ordering::Relaxed));
        assert!(second.load(Ordering::Relaxed));
    }
}

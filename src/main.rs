use anyhow::Result;
use log::{error, info};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stellarch::bot::shutdown::{ChatBotShutdownComponent, GracefulShutdown};
use stellarch::config::load_fun_responses;
use stellarch::prelude::*;

const COMPONENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve a path from the environment, falling back to a file in the data directory.
fn data_path(var: &str, data_dir: &Path, default_name: &str) -> PathBuf {
    env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(default_name))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Stellarch v{}", stellarch::VERSION);

    let data_dir = PathBuf::from(env::var("STELLARCH_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    let settings_path = data_path("STELLARCH_SETTINGS", &data_dir, "settings.yaml");
    let database_path = data_path("STELLARCH_DATABASE", &data_dir, "stellarch.db");
    let responses_path = data_path("STELLARCH_RESPONSES", &data_dir, "responses.yaml");

    let settings = SettingsStore::load_or_create(&settings_path).await?;
    let db = Database::open(&database_path)?;
    let fun_responses = match load_fun_responses(&responses_path).await {
        Ok(responses) => responses,
        Err(e) => {
            error!("Failed to load fun responses, continuing without them: {:#}", e);
            Vec::new()
        }
    };

    let platform = Arc::new(DiscordConnection::new(DiscordConfig::from_env()?));
    let bot = Arc::new(ChatBot::new(platform, settings, db, &fun_responses).await?);

    let shutdown = Arc::new(GracefulShutdown::new(COMPONENT_SHUTDOWN_TIMEOUT));
    shutdown
        .register_component(Box::new(ChatBotShutdownComponent::new(Arc::clone(&bot))))
        .await;
    shutdown.start_signal_handlers();

    bot.start().await?;
    info!("Bot is running. Press Ctrl+C to stop.");

    shutdown.wait_for_shutdown().await?;
    info!("Goodbye");
    Ok(())
}

use anyhow::Result;
use log::debug;
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::types::{ChatUser, OutgoingMessage, Snowflake};

use super::responses::apply_template;

/// Posts the configured join and leave messages.
pub struct WelcomeSystem {
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

impl WelcomeSystem {
    pub fn new(platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self { platform, settings }
    }

    pub async fn handle_member_added(&self, user: &ChatUser) -> Result<()> {
        let welcome = self.settings.get().await.welcome;
        self.post(welcome.channel_id, &welcome.welcome_template, user).await
    }

    pub async fn handle_member_removed(&self, user: &ChatUser) -> Result<()> {
        let welcome = self.settings.get().await.welcome;
        self.post(welcome.channel_id, &welcome.leave_template, user).await
    }

    async fn post(&self, channel_id: Snowflake, template: &str, user: &ChatUser) -> Result<()> {
        if channel_id == 0 || template.is_empty() {
            return Ok(());
        }
        debug!("Posting member notice for {} in {}", user.id, channel_id);
        self.platform
            .send_message(channel_id, &OutgoingMessage::text(apply_template(template, &user.mention())))
            .await?;
        Ok(())
    }
}

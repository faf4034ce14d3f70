// src/config/mod.rs - Runtime settings with atomic persistence

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::types::{EmojiData, Snowflake};

/// Every tunable the bot reads at runtime. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub command_prefix: String,

    // Filter
    pub excluded_channels: Vec<Snowflake>,
    /// 0 disables filter notifications entirely.
    pub filter_channel_id: Snowflake,

    // Mutes and reminders
    pub max_mute_time_days: u32,
    pub max_reminder_time_months: u32,
    /// Mute role per guild.
    pub mute_role_ids: HashMap<Snowflake, Snowflake>,

    // Mention auditor
    pub action_channel_id: Snowflake,
    pub max_action_age_months: u32,
    pub auto_warn_snoop_enabled: bool,

    // Highlight board
    pub rimboard_enabled: bool,
    pub rimboard_channel_id: Snowflake,
    pub rimboard_webhook_id: Snowflake,
    pub rimboard_emoticon: EmojiData,
    pub rimboard_reactions_needed: u32,
    pub rimboard_pin_reactions_needed: u32,
    pub rimboard_excluded_channels: Vec<Snowflake>,

    pub fun_allowed: bool,

    pub role_map: RoleMap,
    pub admission: AdmissionSettings,
    pub welcome: WelcomeSettings,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            command_prefix: "~".to_string(),
            excluded_channels: Vec::new(),
            filter_channel_id: 0,
            max_mute_time_days: 60,
            max_reminder_time_months: 12,
            mute_role_ids: HashMap::new(),
            action_channel_id: 0,
            max_action_age_months: 6,
            auto_warn_snoop_enabled: false,
            rimboard_enabled: false,
            rimboard_channel_id: 0,
            rimboard_webhook_id: 0,
            rimboard_emoticon: EmojiData::unicode("⭐"),
            rimboard_reactions_needed: 5,
            rimboard_pin_reactions_needed: 10,
            rimboard_excluded_channels: Vec::new(),
            fun_allowed: false,
            role_map: RoleMap::default(),
            admission: AdmissionSettings::default(),
            welcome: WelcomeSettings::default(),
        }
    }
}

/// Guild role ids recognised for each privilege tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleMap {
    pub colonist: Vec<Snowflake>,
    pub troubleshooter: Vec<Snowflake>,
    pub community_support: Vec<Snowflake>,
    pub moderator: Vec<Snowflake>,
    pub senior_moderator: Vec<Snowflake>,
    pub bot_manager: Vec<Snowflake>,
    pub admin: Vec<Snowflake>,
    pub muted: Vec<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// 0 disables admission handling.
    pub channel_id: Snowflake,
    pub new_account_role_id: Snowflake,
    pub colonist_role_id: Snowflake,
    pub level_role_id: Snowflake,
    pub account_age_cutoff_days: i64,
    pub cache_capacity: usize,
    pub cache_ttl_hours: i64,
    pub rejection_message: String,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            channel_id: 0,
            new_account_role_id: 0,
            colonist_role_id: 0,
            level_role_id: 0,
            account_age_cutoff_days: 30,
            cache_capacity: 4096,
            cache_ttl_hours: 24,
            rejection_message: "{0} your display name or message is in violation of the rules, please message a member of staff for assistance".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WelcomeSettings {
    /// 0 disables welcome and leave messages.
    pub channel_id: Snowflake,
    pub welcome_template: String,
    pub leave_template: String,
}

impl Default for WelcomeSettings {
    fn default() -> Self {
        Self {
            channel_id: 0,
            welcome_template: "{0}, welcome to the server!\n\nPlease read the rules channel to make sure that you understand how to behave here, then introduce yourself so our staff can give you the speaking role!\n\nHave fun!".to_string(),
            leave_template: "{0} just left. Another one bites the dust.".to_string(),
        }
    }
}

/// Shared settings handle: snapshot reads, persisted writes.
#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Arc<RwLock<BotSettings>>,
}

impl SettingsStore {
    /// Load the settings file, writing defaults when it does not exist yet.
    /// A present but unreadable file is a fatal error.
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let settings = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read settings: {}", path.display()))?;
            let settings: BotSettings = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
            info!("Loaded settings from {}", path.display());
            settings
        } else {
            warn!("Settings file not found, creating default: {}", path.display());
            let settings = BotSettings::default();
            write_atomic(&path, &settings).await?;
            settings
        };

        Ok(Self {
            path,
            settings: Arc::new(RwLock::new(settings)),
        })
    }

    /// In-memory store that still persists to `path` on update.
    pub fn with_settings<P: AsRef<Path>>(path: P, settings: BotSettings) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub async fn get(&self) -> BotSettings {
        self.settings.read().await.clone()
    }

    /// Apply a mutation and persist the result before releasing the lock.
    pub async fn update<F>(&self, mutate: F) -> Result<BotSettings>
    where
        F: FnOnce(&mut BotSettings),
    {
        let mut guard = self.settings.write().await;
        let mut next = guard.clone();
        mutate(&mut next);
        write_atomic(&self.path, &next).await?;
        *guard = next.clone();
        debug!("Settings updated and saved to {}", self.path.display());
        Ok(next)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write to a sibling temp file, fsync it, then rename over the target.
async fn write_atomic(path: &Path, settings: &BotSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
    }

    let content = serde_yaml::to_string(settings).context("Failed to serialize settings")?;
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut file = fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to replace settings file: {}", path.display()))?;
    Ok(())
}

/// One regex-triggered reply of the fun responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunResponseConfig {
    pub regex: String,
    /// `{0}` is replaced with the author mention.
    pub response: String,
    #[serde(default)]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub bot_state: Option<String>,
    #[serde(default)]
    pub requires_bot_state: Option<String>,
}

/// Load fun responses; a missing file yields an empty list.
pub async fn load_fun_responses<P: AsRef<Path>>(path: P) -> Result<Vec<FunResponseConfig>> {
    let path = path.as_ref();
    if !fs::try_exists(path).await.unwrap_or(false) {
        info!("No fun responses file at {}", path.display());
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fun responses: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let responses: Vec<FunResponseConfig> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse fun responses: {}", path.display()))?;
    info!("Loaded {} fun responses", responses.len());
    Ok(responses)
}

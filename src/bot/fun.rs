// src/bot/fun.rs - Regex triggered replies and the rotating activity status

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::Rng;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{FunResponseConfig, SettingsStore};
use crate::platforms::PlatformConnection;
use crate::types::{ChatMessage, OutgoingMessage};

use super::responses::apply_template;

struct Activity {
    emoji: &'static str,
    text: &'static str,
    min_minutes: i64,
    max_minutes: i64,
}

const fn activity(emoji: &'static str, text: &'static str, min_minutes: i64, max_minutes: i64) -> Activity {
    Activity {
        emoji,
        text,
        min_minutes,
        max_minutes,
    }
}

// Cleaning is listed twice to double its weight
const ACTIVITIES: &[Activity] = &[
    activity("🧹", "Cleaning up the grounds.", 1, 3),
    activity("🧹", "Cleaning up the grounds.", 1, 3),
    activity("🐇", "Doing bunny things", 2, 4),
    activity("🗡️", "Taking care of raiders.", 2, 4),
    activity("🎯", "Spending time in the rec room...", 2, 4),
    activity("☁️", "Cloudwatching...", 2, 4),
    activity("🕒", "Wandering...", 2, 4),
    activity("💀", "Disposing of raider bodies.", 2, 4),
    activity("🥗", "Eating some vegetable medley.", 2, 4),
    activity("💓", "Healing after a raid.", 2, 4),
    activity("🩺", "Healing a colonist.", 2, 4),
    activity("👺", "Having a mental break!", 2, 4),
    activity("🔬", "....Researching....", 5, 7),
    activity("🦾", "Installing bionics", 1, 2),
    activity("😀", "Repopulating...", 1, 2),
];

struct FunResponse {
    regex: Regex,
    response: String,
    cooldown: Duration,
    bot_state: Option<String>,
    requires_bot_state: Option<String>,
}

impl FunResponse {
    fn compile(config: &FunResponseConfig) -> Result<Self> {
        let regex = RegexBuilder::new(&config.regex)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            regex,
            response: config.response.clone(),
            cooldown: Duration::milliseconds(config.cooldown_ms as i64),
            bot_state: config.bot_state.clone().filter(|s| !s.is_empty()),
            requires_bot_state: config.requires_bot_state.clone().filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Default)]
struct FunState {
    bot_states: HashSet<String>,
    last_triggers: Vec<Option<DateTime<Utc>>>,
    next_activity_change: Option<DateTime<Utc>>,
}

pub struct FunResponder {
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    responses: Vec<FunResponse>,
    state: Mutex<FunState>,
}

impl FunResponder {
    /// Compile the configured responses, skipping malformed patterns.
    pub fn new(platform: Arc<dyn PlatformConnection>, settings: SettingsStore, configs: &[FunResponseConfig]) -> Self {
        let responses: Vec<FunResponse> = configs
            .iter()
            .filter_map(|config| match FunResponse::compile(config) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!("Skipping fun response '{}': {}", config.regex, e);
                    None
                }
            })
            .collect();
        info!("Fun responder ready with {} responses", responses.len());

        let state = FunState {
            last_triggers: vec![None; responses.len()],
            ..Default::default()
        };
        Self {
            platform,
            settings,
            responses,
            state: Mutex::new(state),
        }
    }

    /// Reply with the first response that matches and is allowed to fire.
    pub async fn handle_message_created(&self, message: &ChatMessage, now: DateTime<Utc>) -> Result<bool> {
        if !self.settings.get().await.fun_allowed || message.is_private() || message.author.is_bot {
            return Ok(false);
        }

        let reply = {
            let mut state = self.state.lock().await;
            let found = self.responses.iter().enumerate().find(|(i, response)| {
                let cooled_down = match state.last_triggers[*i] {
                    Some(last) => response.cooldown.is_zero() || now >= last + response.cooldown,
                    None => true,
                };
                let state_ok = response
                    .requires_bot_state
                    .as_ref()
                    .map_or(true, |required| state.bot_states.contains(required));
                cooled_down && state_ok && response.regex.is_match(&message.content)
            });
            let Some((index, response)) = found else {
                return Ok(false);
            };

            state.last_triggers[index] = Some(now);
            if let Some(set) = &response.bot_state {
                state.bot_states.insert(set.clone());
            }
            if let Some(required) = &response.requires_bot_state {
                state.bot_states.remove(required);
            }
            apply_template(&response.response, &message.author.mention())
        };

        self.platform
            .send_message(message.channel_id, &OutgoingMessage::text(reply))
            .await?;
        Ok(true)
    }

    /// Rotate the activity status once the current one has run its course.
    pub async fn handle_heartbeat(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.settings.get().await.fun_allowed {
            return Ok(());
        }

        let status = {
            let mut state = self.state.lock().await;
            let due = state.next_activity_change.map_or(true, |next| now >= next);
            if !due {
                return Ok(());
            }

            let mut rng = rand::rng();
            let picked = &ACTIVITIES[rng.random_range(0..ACTIVITIES.len())];
            let extra_ms = (rng.random::<f64>() * (picked.max_minutes * 60_000) as f64) as i64;
            state.next_activity_change =
                Some(now + Duration::minutes(picked.min_minutes) + Duration::milliseconds(extra_ms));
            format!("{} {}", picked.emoji, picked.text)
        };

        debug!("Changing activity to '{}'", status);
        if let Err(e) = self.platform.set_activity(&status).await {
            warn!("Failed to update activity: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotSettings;
    use crate::platforms::testing::{test_bot, test_message, test_user, FakePlatform};

    fn config(regex: &str, response: &str, cooldown_ms: u64, set: Option<&str>, requires: Option<&str>) -> FunResponseConfig {
        FunResponseConfig {
            regex: regex.to_string(),
            response: response.to_string(),
            cooldown_ms,
            bot_state: set.map(str::to_string),
            requires_bot_state: requires.map(str::to_string),
        }
    }

    fn responder(platform: Arc<FakePlatform>, dir: &tempfile::TempDir, configs: &[FunResponseConfig]) -> FunResponder {
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                fun_allowed: true,
                ..Default::default()
            },
        );
        FunResponder::new(platform, settings, configs)
    }

    #[tokio::test]
    async fn test_cooldown_and_states() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let fun = responder(
            platform.clone(),
            &dir,
            &[
                config("who's there", "{0} nobody", 0, None, Some("joke")),
                config("knock knock", "who's there?", 0, Some("joke"), None),
                config("good bot", "thanks {0}", 60_000, None, None),
                config("([", "broken", 0, None, None),
            ],
        );
        let now = Utc::now();
        let say = |id, text: &str| test_message(id, 9, test_user(4), text);

        assert!(!fun.handle_message_created(&say(1, "who's there"), now).await.unwrap());
        assert!(fun.handle_message_created(&say(2, "Knock knock"), now).await.unwrap());
        assert!(fun.handle_message_created(&say(3, "who's there"), now).await.unwrap());
        assert!(!fun.handle_message_created(&say(4, "who's there"), now).await.unwrap());

        assert!(fun.handle_message_created(&say(5, "good bot"), now).await.unwrap());
        assert!(!fun.handle_message_created(&say(6, "good bot"), now + Duration::seconds(30)).await.unwrap());
        assert!(fun.handle_message_created(&say(7, "good bot"), now + Duration::minutes(1)).await.unwrap());

        let bot_message = test_message(8, 9, test_bot(3), "good bot");
        assert!(!fun.handle_message_created(&bot_message, now + Duration::hours(1)).await.unwrap());

        let replies: Vec<_> = platform.sent_to(9).await.into_iter().filter_map(|m| m.content).collect();
        assert_eq!(replies, vec!["who's there?", "<@4> nobody", "thanks <@4>", "thanks <@4>"]);
    }

    #[tokio::test]
    async fn test_activity_rotation() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let fun = responder(platform.clone(), &dir, &[]);
        let now = Utc::now();

        fun.handle_heartbeat(now).await.unwrap();
        let first = platform.state.lock().await.activity.clone().unwrap();
        assert!(ACTIVITIES.iter().any(|a| first.ends_with(a.text)));

        platform.state.lock().await.activity = None;
        fun.handle_heartbeat(now + Duration::seconds(30)).await.unwrap();
        assert!(platform.state.lock().await.activity.is_none());

        fun.handle_heartbeat(now + Duration::minutes(15)).await.unwrap();
        assert!(platform.state.lock().await.activity.is_some());
    }
}

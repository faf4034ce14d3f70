// src/bot/settings_commands.rs - Runtime tuning of BotSettings through chat commands

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{BotSettings, SettingsStore};
use crate::platforms::PlatformConnection;
use crate::types::{channel_mention, role_mention, BotError, EmojiData, Embed, Snowflake};

use super::commands::{parse_mention_id, CommandContext, CommandHandler};
use super::permissions::PrivilegeTier;
use super::responses;

/// How a single-valued setting is read, written and displayed.
enum Accessor {
    Channel(fn(&BotSettings) -> Snowflake, fn(&mut BotSettings, Snowflake)),
    Id(fn(&BotSettings) -> Snowflake, fn(&mut BotSettings, Snowflake)),
    Count(fn(&BotSettings) -> u32, fn(&mut BotSettings, u32)),
    Flag(fn(&BotSettings) -> bool, fn(&mut BotSettings, bool)),
    Emoji(fn(&BotSettings) -> EmojiData, fn(&mut BotSettings, EmojiData)),
}

struct ScalarSetting {
    command: &'static str,
    label: &'static str,
    accessor: Accessor,
}

const SCALAR_SETTINGS: &[ScalarSetting] = &[
    ScalarSetting {
        command: "filter-channel",
        label: "filter channel",
        accessor: Accessor::Channel(|s| s.filter_channel_id, |s, v| s.filter_channel_id = v),
    },
    ScalarSetting {
        command: "reminder-limit",
        label: "max reminder duration (months)",
        accessor: Accessor::Count(|s| s.max_reminder_time_months, |s, v| s.max_reminder_time_months = v),
    },
    ScalarSetting {
        command: "mute-limit",
        label: "max mute duration (days)",
        accessor: Accessor::Count(|s| s.max_mute_time_days, |s, v| s.max_mute_time_days = v),
    },
    ScalarSetting {
        command: "warn-month-limit",
        label: "warn month limit",
        accessor: Accessor::Count(|s| s.max_action_age_months, |s, v| s.max_action_age_months = v),
    },
    ScalarSetting {
        command: "action-channel",
        label: "action channel",
        accessor: Accessor::Channel(|s| s.action_channel_id, |s, v| s.action_channel_id = v),
    },
    ScalarSetting {
        command: "snoop-enabled",
        label: "warn snooper",
        accessor: Accessor::Flag(|s| s.auto_warn_snoop_enabled, |s, v| s.auto_warn_snoop_enabled = v),
    },
    ScalarSetting {
        command: "rimboard-enabled",
        label: "Rimboard",
        accessor: Accessor::Flag(|s| s.rimboard_enabled, |s, v| s.rimboard_enabled = v),
    },
    ScalarSetting {
        command: "rimboard-channel",
        label: "Rimboard channel",
        accessor: Accessor::Channel(|s| s.rimboard_channel_id, |s, v| s.rimboard_channel_id = v),
    },
    ScalarSetting {
        command: "rimboard-webhook",
        label: "Rimboard webhook id",
        accessor: Accessor::Id(|s| s.rimboard_webhook_id, |s, v| s.rimboard_webhook_id = v),
    },
    ScalarSetting {
        command: "rimboard-emote",
        label: "Rimboard emoji",
        accessor: Accessor::Emoji(|s| s.rimboard_emoticon.clone(), |s, v| s.rimboard_emoticon = v),
    },
    ScalarSetting {
        command: "rimboard-reaction-count",
        label: "Rimboard reaction requirement",
        accessor: Accessor::Count(|s| s.rimboard_reactions_needed, |s, v| s.rimboard_reactions_needed = v),
    },
    ScalarSetting {
        command: "rimboard-pin-reaction-count",
        label: "Rimboard reaction to pin requirement",
        accessor: Accessor::Count(
            |s| s.rimboard_pin_reactions_needed,
            |s, v| s.rimboard_pin_reactions_needed = v,
        ),
    },
    ScalarSetting {
        command: "fun-allowed",
        label: "fun allowed",
        accessor: Accessor::Flag(|s| s.fun_allowed, |s, v| s.fun_allowed = v),
    },
];

struct ChannelListSetting {
    command: &'static str,
    title: &'static str,
    list: fn(&mut BotSettings) -> &mut Vec<Snowflake>,
}

const CHANNEL_LISTS: &[ChannelListSetting] = &[
    ChannelListSetting {
        command: "excluded-channels",
        title: "Excluded channels",
        list: |s| &mut s.excluded_channels,
    },
    ChannelListSetting {
        command: "rimboard-excluded-channels",
        title: "Rimboard excluded channels",
        list: |s| &mut s.rimboard_excluded_channels,
    },
];

fn enabled_disabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn parse_flag(arg: &str) -> Option<bool> {
    match arg.to_lowercase().as_str() {
        "true" | "on" | "yes" | "enable" | "enabled" | "1" => Some(true),
        "false" | "off" | "no" | "disable" | "disabled" | "0" => Some(false),
        _ => None,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Accessor {
    fn render(&self, settings: &BotSettings) -> String {
        match self {
            Accessor::Channel(get, _) => match get(settings) {
                0 => "not set".to_string(),
                id => channel_mention(id),
            },
            Accessor::Id(get, _) => get(settings).to_string(),
            Accessor::Count(get, _) => get(settings).to_string(),
            Accessor::Flag(get, _) => enabled_disabled(get(settings)).to_string(),
            Accessor::Emoji(get, _) => get(settings).to_string(),
        }
    }

    /// Parse `arg` into a mutation, or `None` when it has the wrong shape.
    fn parse(&self, arg: &str) -> Option<Box<dyn FnOnce(&mut BotSettings) + Send>> {
        match *self {
            Accessor::Channel(_, set) | Accessor::Id(_, set) => {
                let id = parse_mention_id(arg)?;
                Some(Box::new(move |s| set(s, id)))
            }
            Accessor::Count(_, set) => {
                let count = arg.parse::<u32>().ok().filter(|c| *c > 0)?;
                Some(Box::new(move |s| set(s, count)))
            }
            Accessor::Flag(_, set) => {
                let flag = parse_flag(arg)?;
                Some(Box::new(move |s| set(s, flag)))
            }
            Accessor::Emoji(_, set) => {
                let emoji = EmojiData::parse(arg)?;
                Some(Box::new(move |s| set(s, emoji)))
            }
        }
    }
}

pub struct SettingsCommands {
    settings: SettingsStore,
    platform: Arc<dyn PlatformConnection>,
}

impl SettingsCommands {
    pub fn new(settings: SettingsStore, platform: Arc<dyn PlatformConnection>) -> Self {
        Self { settings, platform }
    }

    async fn handle_scalar(&self, ctx: &CommandContext<'_>, setting: &ScalarSetting) -> Result<Embed> {
        let mention = ctx.author_mention();
        let Some(arg) = ctx.arg(0) else {
            let current = setting.accessor.render(&self.settings.get().await);
            return Ok(responses::neutral(
                &capitalize(setting.label),
                &mention,
                &format!("the {} is currently {}.", setting.label, current),
            ));
        };

        let mutate = setting.accessor.parse(arg).ok_or_else(|| {
            BotError::InvalidArguments(format!("`{}` is not a valid value for `{}`", arg, setting.command))
        })?;
        let updated = self.settings.update(mutate).await?;
        let value = setting.accessor.render(&updated);

        let title = match setting.accessor {
            Accessor::Flag(get, _) => format!("{} {}", capitalize(setting.label), enabled_disabled(get(&updated))),
            _ => format!("{} changed", capitalize(setting.label)),
        };
        Ok(responses::positive(
            &title,
            &mention,
            &format!("I changed the {} to {}.", setting.label, value),
        ))
    }

    async fn handle_channel_list(&self, ctx: &CommandContext<'_>, setting: &ChannelListSetting) -> Result<Embed> {
        let mention = ctx.author_mention();
        let list = setting.list;

        match ctx.arg(0).unwrap_or("list") {
            "list" => {
                let mut settings = self.settings.get().await;
                let channels = list(&mut settings);
                let body = if channels.is_empty() {
                    "there are no excluded channels.".to_string()
                } else {
                    let mentions: Vec<String> = channels.iter().map(|c| channel_mention(*c)).collect();
                    format!("here are the excluded channels:\n{}", mentions.join("\n"))
                };
                Ok(responses::neutral(setting.title, &mention, &body))
            }
            verb @ ("add" | "remove") => {
                let ids = ctx.args[1..]
                    .iter()
                    .map(|a| parse_mention_id(a))
                    .collect::<Option<Vec<_>>>()
                    .filter(|ids| !ids.is_empty())
                    .ok_or_else(|| {
                        BotError::InvalidArguments(format!("usage: `{} {} <channels...>`", setting.command, verb))
                    })?;

                let adding = verb == "add";
                let mut changed = Vec::new();
                let mut unchanged = Vec::new();
                let mut snapshot = self.settings.get().await;
                let channels = list(&mut snapshot);
                for id in ids {
                    let present = channels.contains(&id);
                    if adding && !present {
                        channels.push(id);
                        changed.push(id);
                    } else if !adding && present {
                        channels.retain(|c| *c != id);
                        changed.push(id);
                    } else {
                        unchanged.push(id);
                    }
                }

                if !changed.is_empty() {
                    let updated = channels.clone();
                    self.settings.update(move |s| *list(s) = updated).await?;
                }

                let past = if adding { "added" } else { "removed" };
                let render = |ids: &[Snowflake]| {
                    if ids.is_empty() {
                        "none".to_string()
                    } else {
                        ids.iter().map(|c| channel_mention(*c)).collect::<Vec<_>>().join(" ")
                    }
                };
                Ok(responses::positive(
                    &format!("Attempted to {} channel(s)", verb),
                    &mention,
                    &format!("I attempted to {} the channels you gave me.", verb),
                )
                .field(capitalize(past), render(&changed), false)
                .field(format!("Not {}", past), render(&unchanged), false))
            }
            other => Err(BotError::InvalidArguments(format!(
                "`{}` is not one of list, add or remove",
                other
            ))
            .into()),
        }
    }

    async fn handle_mute_role(&self, ctx: &CommandContext<'_>, guild_id: Snowflake) -> Result<Embed> {
        let mention = ctx.author_mention();
        let Some(arg) = ctx.arg(0) else {
            let current = match self.settings.get().await.mute_role_ids.get(&guild_id) {
                Some(role) => role_mention(*role),
                None => "not set".to_string(),
            };
            return Ok(responses::neutral(
                "Mute role",
                &mention,
                &format!("the mute role is currently {}.", current),
            ));
        };

        let role_id = parse_mention_id(arg)
            .ok_or_else(|| BotError::InvalidArguments("usage: `mute-role <role>`".to_string()))?;
        self.settings
            .update(|s| {
                s.mute_role_ids.insert(guild_id, role_id);
            })
            .await?;
        Ok(responses::positive(
            "Mute role changed",
            &mention,
            &format!("I changed the mute role to {}.", role_mention(role_id)),
        ))
    }
}

#[async_trait]
impl CommandHandler for SettingsCommands {
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        let name = ctx.name.as_str();
        let scalar = SCALAR_SETTINGS.iter().find(|s| s.command == name);
        let channel_list = CHANNEL_LISTS.iter().find(|s| s.command == name);
        if scalar.is_none() && channel_list.is_none() && name != "mute-role" {
            return Ok(false);
        }
        if !ctx.require(PrivilegeTier::BotManager)? {
            return Ok(true);
        }

        let embed = if let Some(setting) = scalar {
            self.handle_scalar(ctx, setting).await?
        } else if let Some(setting) = channel_list {
            self.handle_channel_list(ctx, setting).await?
        } else {
            let Some(guild_id) = ctx.message.guild_id else {
                return Ok(true);
            };
            self.handle_mute_role(ctx, guild_id).await?
        };

        ctx.reply(self.platform.as_ref(), embed).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::permissions::UserPermissions;
    use crate::platforms::testing::{test_message, test_user, FakePlatform, TEST_GUILD};

    fn manager() -> UserPermissions {
        UserPermissions {
            highest: PrivilegeTier::BotManager,
            muted: false,
        }
    }

    async fn run(commands: &SettingsCommands, text: &str) -> Result<bool> {
        let message = test_message(1, 9, test_user(2), text);
        let ctx = CommandContext::parse(&message, "~", manager()).unwrap();
        commands.process_command(&ctx).await
    }

    fn setup(platform: Arc<FakePlatform>, dir: &tempfile::TempDir) -> (SettingsCommands, SettingsStore) {
        let settings = SettingsStore::with_settings(dir.path().join("settings.yaml"), BotSettings::default());
        (SettingsCommands::new(settings.clone(), platform), settings)
    }

    #[tokio::test]
    async fn test_show_then_change_scalar() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, settings) = setup(platform.clone(), &dir);

        assert!(run(&commands, "~rimboard-reaction-count").await.unwrap());
        assert!(run(&commands, "~rimboard-reaction-count 3").await.unwrap());
        assert!(run(&commands, "~rimboard-enabled on").await.unwrap());
        assert!(run(&commands, "~filter-channel <#123>").await.unwrap());
        assert!(run(&commands, "~rimboard-emote <:rim:42>").await.unwrap());

        let current = settings.get().await;
        assert_eq!(current.rimboard_reactions_needed, 3);
        assert!(current.rimboard_enabled);
        assert_eq!(current.filter_channel_id, 123);
        assert_eq!(current.rimboard_emoticon, EmojiData::Custom { id: 42, name: "rim".to_string(), animated: false });

        let sent = platform.sent_to(9).await;
        assert!(sent[0].embeds[0].description.as_deref().unwrap().contains("currently 5"));
        assert_eq!(sent[2].embeds[0].title.as_deref(), Some("Rimboard enabled"));

        let reloaded = SettingsStore::load_or_create(settings.path()).await.unwrap().get().await;
        assert_eq!(reloaded, current);
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, settings) = setup(platform, &dir);

        assert!(run(&commands, "~mute-limit zero").await.is_err());
        assert!(run(&commands, "~fun-allowed maybe").await.is_err());
        assert_eq!(settings.get().await, BotSettings::default());
        assert!(!run(&commands, "~unrelated").await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_lists_and_mute_role() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, settings) = setup(platform.clone(), &dir);

        run(&commands, "~excluded-channels add <#5> <#6>").await.unwrap();
        run(&commands, "~excluded-channels add <#5>").await.unwrap();
        run(&commands, "~rimboard-excluded-channels add 7").await.unwrap();
        run(&commands, "~excluded-channels remove <#6>").await.unwrap();
        run(&commands, "~mute-role <@&66>").await.unwrap();

        let current = settings.get().await;
        assert_eq!(current.excluded_channels, vec![5]);
        assert_eq!(current.rimboard_excluded_channels, vec![7]);
        assert_eq!(current.mute_role_ids.get(&TEST_GUILD), Some(&66));

        let sent = platform.sent_to(9).await;
        assert_eq!(sent[1].embeds[0].field_value("Not added"), Some("<#5>"));
        assert!(run(&commands, "~excluded-channels purge").await.is_err());
    }
}

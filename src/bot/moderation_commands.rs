use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use regex::Regex;
use std::sync::{Arc, OnceLock};

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::types::{BotError, OutgoingMessage, Snowflake};

use super::commands::{parse_mention_id, CommandContext, CommandHandler};
use super::mentions::MentionAuditor;
use super::permissions::PrivilegeTier;
use super::responses::{self, NEGATIVE_COLOR};

fn user_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(\d{17,})").expect("user id regex is valid"))
}

/// `mentions` lookups and `userinfo`.
pub struct ModerationCommands {
    auditor: Arc<MentionAuditor>,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

impl ModerationCommands {
    pub fn new(auditor: Arc<MentionAuditor>, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self {
            auditor,
            platform,
            settings,
        }
    }

    async fn handle_mentions(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let user_ids = ctx
            .args
            .iter()
            .map(|arg| {
                user_id_regex()
                    .find(arg)
                    .and_then(|m| m.as_str().parse::<Snowflake>().ok())
            })
            .collect::<Option<Vec<_>>>()
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| BotError::InvalidArguments("usage: `mentions <user mentions or ids...>`".to_string()))?;

        let embeds = self.auditor.lookup(&ctx.author_mention(), &user_ids, ctx.message).await?;

        if ctx.message.channel_id == self.settings.get().await.action_channel_id {
            if let Err(e) = self
                .platform
                .delete_message(ctx.message.channel_id, ctx.message.id)
                .await
            {
                warn!("Failed to delete mentions command message: {}", e);
            }
        }

        for embed in embeds {
            self.platform
                .send_message(ctx.message.channel_id, &OutgoingMessage::embed(embed))
                .await?;
        }
        Ok(())
    }

    async fn handle_userinfo(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let user_id = ctx
            .arg(0)
            .and_then(parse_mention_id)
            .ok_or_else(|| BotError::InvalidArguments("usage: `userinfo <user>`".to_string()))?;
        let Some(guild_id) = ctx.message.guild_id else {
            return Ok(());
        };

        let embed = match self.platform.get_member(guild_id, user_id).await? {
            Some(member) => {
                let now = Utc::now();
                let mut embed = responses::neutral("User Info", &ctx.author_mention(), "here's some info about that user!")
                    .field("Mention", member.user.mention(), true)
                    .field("Username", member.user.tag(), true)
                    .field("Joined Discord", responses::format_ago(member.user.created_at(), now), false);
                if let Some(joined) = member.joined_at {
                    embed = embed.field("Joined the server", responses::format_ago(joined, now), false);
                }
                match member.user.avatar_url.clone() {
                    Some(avatar) => embed.thumbnail(avatar),
                    None => embed,
                }
            }
            None => crate::types::Embed::new("Cannot get user info")
                .color(NEGATIVE_COLOR)
                .description("Unable to find that user..."),
        };

        ctx.reply(self.platform.as_ref(), embed).await
    }
}

#[async_trait]
impl CommandHandler for ModerationCommands {
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        if !matches!(ctx.name.as_str(), "mentions" | "userinfo") {
            return Ok(false);
        }
        if !ctx.require(PrivilegeTier::CommunitySupport)? {
            return Ok(true);
        }

        if ctx.name == "mentions" {
            self.handle_mentions(ctx).await?;
        } else {
            self.handle_userinfo(ctx).await?;
        }
        Ok(true)
    }
}

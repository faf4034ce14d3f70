use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::platforms::PlatformConnection;
use crate::types::{BotError, Snowflake};

use super::commands::{parse_mention_id, CommandContext, CommandHandler};
use super::mutes::{MuteRequest, MuteSystem};
use super::permissions::PrivilegeTier;
use super::responses;

pub struct MuteCommands {
    mutes: Arc<MuteSystem>,
    platform: Arc<dyn PlatformConnection>,
}

impl MuteCommands {
    pub fn new(mutes: Arc<MuteSystem>, platform: Arc<dyn PlatformConnection>) -> Self {
        Self { mutes, platform }
    }

    fn target(ctx: &CommandContext<'_>, usage: &str) -> Result<Snowflake> {
        ctx.arg(0)
            .and_then(parse_mention_id)
            .ok_or_else(|| BotError::validation("Syntax error", usage).into())
    }

    async fn handle_mute(&self, ctx: &CommandContext<'_>, guild_id: Snowflake) -> Result<()> {
        let target_id = Self::target(ctx, "The syntax is: mute <mention> <time> <reason>.")?;
        self.mutes
            .add_mute(MuteRequest {
                guild_id,
                staff_id: ctx.message.author.id,
                target_id,
                args: ctx.rest_after(1),
                token: ctx.message.id.to_string(),
                issued_at: ctx.message.timestamp,
            })
            .await?;
        Ok(())
    }

    async fn handle_list(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let page = ctx.arg(0).and_then(|p| p.parse().ok()).unwrap_or(1);
        let embed = self.mutes.list_embed(&ctx.author_mention(), page, Utc::now())?;
        ctx.reply(self.platform.as_ref(), embed).await
    }

    async fn handle_remove(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let token = ctx.rest_after(0).trim();
        let mute = self.mutes.remove_by_token(token)?;
        ctx.reply(
            self.platform.as_ref(),
            MuteSystem::removed_embed(&ctx.author_mention(), &mute, Utc::now()),
        )
        .await
    }

    async fn handle_unmute(&self, ctx: &CommandContext<'_>, guild_id: Snowflake) -> Result<()> {
        let user_id = Self::target(ctx, "The syntax is: unmute <mention>.")?;
        self.mutes.unmute(guild_id, user_id).await?;
        let embed = responses::positive("Removed mute", &ctx.author_mention(), "I removed any mutes on this user!")
            .field("User", crate::types::user_mention(user_id), true);
        ctx.reply(self.platform.as_ref(), embed).await
    }
}

#[async_trait]
impl CommandHandler for MuteCommands {
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        if !matches!(ctx.name.as_str(), "mute" | "mute-list" | "mute-remove" | "unmute") {
            return Ok(false);
        }
        let Some(guild_id) = ctx.message.guild_id else {
            return Ok(true);
        };
        if !ctx.require(PrivilegeTier::CommunitySupport)? {
            return Ok(true);
        }

        match ctx.name.as_str() {
            "mute" => self.handle_mute(ctx, guild_id).await?,
            "mute-list" => self.handle_list(ctx).await?,
            "mute-remove" => self.handle_remove(ctx).await?,
            _ => self.handle_unmute(ctx, guild_id).await?,
        }
        Ok(true)
    }
}

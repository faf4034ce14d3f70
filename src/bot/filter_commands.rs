use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::platforms::PlatformConnection;
use crate::storage::FilterKind;
use crate::types::{BotError, Embed};

use super::commands::{CommandContext, CommandHandler};
use super::filter::FilterEngine;
use super::permissions::PrivilegeTier;
use super::responses::{self, NEUTRAL_COLOR};

const MAX_LIST_CHARS: usize = 4000;

pub struct FilterCommands {
    engine: Arc<FilterEngine>,
    platform: Arc<dyn PlatformConnection>,
}

impl FilterCommands {
    pub fn new(engine: Arc<FilterEngine>, platform: Arc<dyn PlatformConnection>) -> Self {
        Self { engine, platform }
    }

    /// Handle `filter` and `exclude` with their add/remove/list subcommands
    async fn handle_rule_command(&self, kind: FilterKind, ctx: &CommandContext<'_>) -> Result<()> {
        let usage = || {
            BotError::InvalidArguments(format!(
                "usage: `{} add|remove|list <{}>`",
                ctx.name,
                kind.label()
            ))
        };

        let subcommand = ctx.arg(0).ok_or_else(usage)?.to_lowercase();
        let item = ctx.rest_after(1).trim();
        let mention = ctx.author_mention();

        let embed = match subcommand.as_str() {
            "add" | "new" => {
                if item.is_empty() {
                    return Err(usage().into());
                }
                self.engine.add_rule(kind, item).await?;
                responses::positive(
                    &format!("Added new {}", kind.label()),
                    &mention,
                    &format!("I added a new {} to the filter: `{}`", kind.label(), item),
                )
            }
            "remove" | "delete" => {
                if item.is_empty() {
                    return Err(usage().into());
                }
                self.engine.remove_rule(kind, item).await?;
                responses::positive(
                    &format!("Removed {}", kind.label()),
                    &mention,
                    &format!("I removed the {} from the filter: `{}`", kind.label(), item),
                )
            }
            "list" => Self::list_embed(kind, &self.engine.list(kind).await),
            _ => return Err(usage().into()),
        };

        ctx.reply(self.platform.as_ref(), embed).await
    }

    fn list_embed(kind: FilterKind, items: &[String]) -> Embed {
        let title = format!("List of {}s", kind.label());
        if items.is_empty() {
            return Embed::new(title)
                .color(NEUTRAL_COLOR)
                .description(format!("there are no {}s currently", kind.label()));
        }

        let lines: Vec<String> = items.iter().map(|i| format!("`{}`", i)).collect();
        Embed::new(title)
            .color(NEUTRAL_COLOR)
            .description(responses::truncate_chars(&lines.join("\n"), MAX_LIST_CHARS))
            .footer(format!("{} total", items.len()))
    }
}

#[async_trait]
impl CommandHandler for FilterCommands {
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        let kind = match ctx.name.as_str() {
            "filter" => FilterKind::Mask,
            "exclude" => FilterKind::Exclude,
            _ => return Ok(false),
        };

        if ctx.require(PrivilegeTier::Moderator)? {
            self.handle_rule_command(kind, ctx).await?;
        }
        Ok(true)
    }
}

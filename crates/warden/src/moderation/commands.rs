//! Moderator commands.

use std::sync::Arc;
use std::time::Duration;

use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};
use warden_common::{ChatId, ConfigError, Member, MessageRef, ModerationError, UserId};

use super::MuteService;
use crate::config::{AppConfig, ConfigChange, ConfigHandle};
use crate::platform::{ChatRights, Platform};
use crate::scheduler::Scheduler;

const GROUP_ONLY: &str = "This command only works in groups.";
const PRIVATE_ONLY: &str = "Send /config to me in a private chat.";
const NOT_ADMIN: &str = "Only group administrators can use this command.";
const NOT_BOT_ADMIN: &str = "Only bot administrators can change settings.";
const NO_TARGET: &str = "Reply to a message of the member, or give their numeric user id.";
const SELF_TARGET: &str = "You cannot use this on yourself.";
const BOT_TARGET: &str = "Bots cannot be targeted.";
const ADMIN_TARGET: &str = "Administrators cannot be targeted.";
const FAILED: &str = "The command failed, please try again later.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show this list")]
    Help,
    #[command(description = "ban a member: reply, or /ban <user id> [reason]")]
    Ban(String),
    #[command(description = "remove a member, they may rejoin")]
    Kick(String),
    #[command(description = "silence a member: /mute [user id] [hours] [reason]")]
    Mute(String),
    #[command(description = "lift a mute")]
    Unmute(String),
    #[command(description = "delete the N messages before this one: /del N")]
    Del(String),
    #[command(description = "check that the bot has the admin rights it needs")]
    Permissions,
    #[command(description = "show or change settings (private chat)")]
    Config(String),
}

/// Where a command was sent and by whom
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub chat: ChatId,
    pub chat_is_private: bool,
    pub sender: Member,
    /// The command message itself
    pub message: MessageRef,
    /// Author of the message the command replies to
    pub reply_target: Option<Member>,
}

/// Member a moderator command acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: UserId,
    pub label: String,
    pub is_bot: bool,
}

#[derive(Clone)]
pub struct Moderator {
    platform: Arc<dyn Platform>,
    mutes: MuteService,
    config: ConfigHandle,
    scheduler: Arc<Scheduler>,
    bot_id: UserId,
}

impl Moderator {
    pub fn new(
        platform: Arc<dyn Platform>,
        mutes: MuteService,
        config: ConfigHandle,
        scheduler: Arc<Scheduler>,
        bot_id: UserId,
    ) -> Self {
        Self {
            platform,
            mutes,
            config,
            scheduler,
            bot_id,
        }
    }

    /// Run a command and post the reply. Refusals are answered and count as
    /// handled; other failures are answered generically and returned.
    pub async fn execute(
        &self,
        ctx: &CommandContext,
        command: Command,
    ) -> Result<(), ModerationError> {
        if !ctx.chat_is_private && self.silenced(ctx).await? {
            return Ok(());
        }

        let config = self.config.current().await;

        let result = match command {
            Command::Help => Ok(Command::descriptions().to_string()),
            Command::Config(args) => self.configure(ctx, &config, &args).await,
            other => self.moderate(ctx, &config, other).await,
        };

        let (reply, failure) = match result {
            Ok(text) => (text, None),
            Err(ModerationError::Refused(text)) => (text, None),
            Err(e) => (FAILED.to_string(), Some(e)),
        };

        self.reply(ctx, &reply, config.moderation.command_reply_delete_after_secs)
            .await;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn moderate(
        &self,
        ctx: &CommandContext,
        config: &AppConfig,
        command: Command,
    ) -> Result<String, ModerationError> {
        if ctx.chat_is_private {
            return Err(refused(GROUP_ONLY));
        }
        if !self.platform.is_chat_admin(ctx.chat, ctx.sender.id).await? {
            return Err(refused(NOT_ADMIN));
        }
        self.sync_admin(config, ctx.sender.id).await;

        match command {
            Command::Ban(args) => {
                let (target, rest) = self.target(ctx, &args).await?;
                self.platform.ban(ctx.chat, target.id).await?;
                info!(chat_id = %ctx.chat, moderator = %ctx.sender.id, user_id = %target.id, "Member banned");
                Ok(with_reason(format!("{} was banned", target.label), &rest))
            }
            Command::Kick(args) => {
                let (target, rest) = self.target(ctx, &args).await?;
                self.platform.kick(ctx.chat, target.id).await?;
                info!(chat_id = %ctx.chat, moderator = %ctx.sender.id, user_id = %target.id, "Member kicked");
                Ok(with_reason(format!("{} was removed", target.label), &rest))
            }
            Command::Mute(args) => {
                let (target, rest) = self.target(ctx, &args).await?;
                let (hours, reason) = parse_mute_args(
                    &rest,
                    config.moderation.default_mute_hours,
                    config.moderation.max_mute_hours,
                )?;
                self.mutes
                    .mute(ctx.chat, target.id, chrono::Duration::hours(hours as i64))
                    .await?;
                Ok(with_reason(
                    format!("{} was muted for {hours} hour(s)", target.label),
                    &reason,
                ))
            }
            Command::Unmute(args) => {
                let (target, _) = self.target(ctx, &args).await?;
                if self.mutes.unmute(ctx.chat, target.id).await? {
                    Ok(format!("{} can post again.", target.label))
                } else {
                    Ok(format!("{} is not muted.", target.label))
                }
            }
            Command::Del(args) => {
                let count = parse_delete_count(&args, config.moderation.max_delete_messages)?;
                let deleted = self.delete_preceding(ctx.message, count).await;
                info!(chat_id = %ctx.chat, moderator = %ctx.sender.id, requested = count, deleted, "Messages deleted");
                Ok(format!("Deleted {deleted} of {count} message(s)."))
            }
            Command::Permissions => {
                let rights = self.platform.member_rights(ctx.chat, self.bot_id).await?;
                if !rights.missing().is_empty() {
                    warn!(chat_id = %ctx.chat, missing = ?rights.missing(), "Bot lacks admin rights");
                }
                Ok(rights_report(&rights))
            }
            Command::Help | Command::Config(_) => Ok(Command::descriptions().to_string()),
        }
    }

    /// A muted member's command is deleted unanswered. Administrators are
    /// never silenced.
    async fn silenced(&self, ctx: &CommandContext) -> Result<bool, ModerationError> {
        if !self.mutes.is_muted(ctx.chat, ctx.sender.id).await? {
            return Ok(false);
        }
        if self.platform.is_chat_admin(ctx.chat, ctx.sender.id).await? {
            return Ok(false);
        }

        debug!(chat_id = %ctx.chat, user_id = %ctx.sender.id, "Dropped command from muted member");
        if let Err(e) = self.platform.delete_message(ctx.message).await {
            debug!(chat_id = %ctx.chat, error = %e, "Failed to delete muted command");
        }
        Ok(true)
    }

    /// Resolve and vet the target of a member command
    async fn target<'a>(
        &self,
        ctx: &CommandContext,
        args: &'a str,
    ) -> Result<(Target, Vec<&'a str>), ModerationError> {
        let (target, rest) = resolve_target(ctx.reply_target.as_ref(), args)?;

        if target.id == ctx.sender.id {
            return Err(refused(SELF_TARGET));
        }
        if target.is_bot || target.id == self.bot_id {
            return Err(refused(BOT_TARGET));
        }
        if self.platform.is_chat_admin(ctx.chat, target.id).await? {
            return Err(refused(ADMIN_TARGET));
        }

        Ok((target, rest))
    }

    async fn configure(
        &self,
        ctx: &CommandContext,
        config: &AppConfig,
        args: &str,
    ) -> Result<String, ModerationError> {
        if !ctx.chat_is_private {
            return Err(refused(PRIVATE_ONLY));
        }
        if !config.is_bot_admin(ctx.sender.id) {
            return Err(refused(NOT_BOT_ADMIN));
        }

        let args = args.trim();
        if args.is_empty() {
            return Ok(config.describe());
        }

        let Some((key, value)) = args.split_once(char::is_whitespace) else {
            return Err(ModerationError::Refused(format!(
                "Usage: /config <key> <value>\nKeys: {}",
                ConfigChange::KEYS.join(", ")
            )));
        };

        let change = ConfigChange::parse(key, value).map_err(not_applied)?;
        let updated = self.config.apply(change).await.map_err(not_applied)?;

        info!(user_id = %ctx.sender.id, key, "Settings changed");
        Ok(format!("Updated {key}.\n\n{}", updated.describe()))
    }

    /// Chat administrators become bot administrators on first use
    async fn sync_admin(&self, config: &AppConfig, user: UserId) {
        if config.is_bot_admin(user) {
            return;
        }
        match self.config.apply(ConfigChange::AddAdmin(user)).await {
            Ok(_) => info!(user_id = %user, "Chat administrator added to bot administrators"),
            Err(e) => warn!(user_id = %user, error = %e, "Failed to sync administrator"),
        }
    }

    /// Best effort, counts what the platform accepted
    async fn delete_preceding(&self, command: MessageRef, count: u32) -> usize {
        let first = (command.message_id - count as i32).max(1);
        let mut deleted = 0;

        for message_id in (first..command.message_id).rev() {
            let message = MessageRef::new(command.chat_id, message_id);
            match self.platform.delete_message(message).await {
                Ok(()) => deleted += 1,
                Err(e) => debug!(chat_id = %command.chat_id, message_id, error = %e, "Skipped message"),
            }
        }

        deleted
    }

    /// Answer in the chat; in groups the answer and the command vanish later
    async fn reply(&self, ctx: &CommandContext, text: &str, delete_after_secs: u64) {
        let sent = match self.platform.send_message(ctx.chat, text, None).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(chat_id = %ctx.chat, error = %e, "Failed to reply to command");
                None
            }
        };

        if ctx.chat_is_private || delete_after_secs == 0 {
            return;
        }

        let platform = self.platform.clone();
        let command = ctx.message;
        self.scheduler
            .after(Duration::from_secs(delete_after_secs), async move {
                for message in sent.into_iter().chain(Some(command)) {
                    let _ = platform.delete_message(message).await;
                }
            });
    }
}

fn refused(text: &str) -> ModerationError {
    ModerationError::Refused(text.to_string())
}

fn not_applied(error: ConfigError) -> ModerationError {
    match error {
        ConfigError::UnknownKey(_) | ConfigError::InvalidValue { .. } => {
            ModerationError::Refused(format!("Not applied: {error}"))
        }
        other => other.into(),
    }
}

fn rights_report(rights: &ChatRights) -> String {
    let missing = rights.missing();
    let mut held: Vec<&str> = Vec::new();
    if rights.delete_messages {
        held.push("delete messages");
    }
    if rights.restrict_members {
        held.push("ban users");
    }
    held.extend(rights.extras());

    let held = if held.is_empty() {
        "none".to_string()
    } else {
        held.join(", ")
    };

    if missing.is_empty() {
        format!("Bot rights: {held}.\nAll required rights are present.")
    } else {
        format!(
            "Bot rights: {held}.\nMissing: {}.\nMake the bot an administrator with these rights, \
             otherwise the captcha, /ban, /kick and /mute will not work.",
            missing.join(", ")
        )
    }
}

fn with_reason(mut text: String, reason: &[&str]) -> String {
    if !reason.is_empty() {
        text.push_str(": ");
        text.push_str(&reason.join(" "));
    }
    text.push('.');
    text
}

/// The replied-to member wins; otherwise the first argument must be a user
/// id. Returns the target and the remaining arguments.
pub fn resolve_target<'a>(
    reply: Option<&Member>,
    args: &'a str,
) -> Result<(Target, Vec<&'a str>), ModerationError> {
    let mut words: Vec<&str> = args.split_whitespace().collect();

    if let Some(member) = reply {
        let target = Target {
            id: member.id,
            label: member.mention(),
            is_bot: member.is_bot,
        };
        return Ok((target, words));
    }

    match words.first().and_then(|w| w.parse::<i64>().ok()) {
        Some(id) if id > 0 => {
            words.remove(0);
            let target = Target {
                id: UserId(id),
                label: format!("User {id}"),
                is_bot: false,
            };
            Ok((target, words))
        }
        _ => Err(refused(NO_TARGET)),
    }
}

/// `[hours] [reason...]`. A leading number is the duration and must be in
/// `1..=max_hours`.
pub fn parse_mute_args<'a>(
    args: &[&'a str],
    default_hours: u32,
    max_hours: u32,
) -> Result<(u32, Vec<&'a str>), ModerationError> {
    let Some(first) = args.first() else {
        return Ok((default_hours, Vec::new()));
    };

    match first.parse::<i64>() {
        Ok(hours) if hours >= 1 && hours <= max_hours as i64 => {
            Ok((hours as u32, args[1..].to_vec()))
        }
        Ok(_) => Err(ModerationError::Refused(format!(
            "Mute duration must be between 1 and {max_hours} hours."
        ))),
        Err(_) => Ok((default_hours, args.to_vec())),
    }
}

pub fn parse_delete_count(args: &str, max: u32) -> Result<u32, ModerationError> {
    let usage = || ModerationError::Refused(format!("Usage: /del N, with N between 1 and {max}."));

    match args.trim().parse::<u32>() {
        Ok(count) if (1..=max).contains(&count) => Ok(count),
        _ => Err(usage()),
    }
}

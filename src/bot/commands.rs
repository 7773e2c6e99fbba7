//! Slash commands

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info};

use crate::db;
use crate::dialogue::{AdminDialogue, AdminDialogueState};
use crate::localization::{t_args_lang, t_lang};

use super::ui_builder::{create_language_keyboard, format_stats};
use super::{db_user_id, now, register_user, AppState};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Commands:")]
pub enum Command {
    #[command(description = "start over")]
    Start,
    #[command(description = "change language")]
    Language,
    #[command(description = "premium subscription")]
    Premium,
    #[command(description = "help")]
    Help,
    #[command(description = "cancel the current admin action")]
    Cancel,
    #[command(description = "admin: grant premium, <user_id> <days>")]
    GrantPremium(String),
    #[command(description = "admin: revoke premium, <user_id>")]
    RevokePremium(String),
    #[command(description = "admin: statistics")]
    Stats,
}

impl Command {
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Command::GrantPremium(_) | Command::RevokePremium(_) | Command::Stats
        )
    }
}

/// Longest premium period an admin can grant in one command
pub const MAX_PREMIUM_DAYS: i64 = 36_500;

/// `<user_id> <days>` with `1..=MAX_PREMIUM_DAYS` days
pub fn parse_grant_args(args: &str) -> Option<(i64, i64)> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    let days: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(1..=MAX_PREMIUM_DAYS).contains(&days) {
        return None;
    }
    Some((user_id, days))
}

pub fn parse_revoke_args(args: &str) -> Option<i64> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(user_id)
}

pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
    dialogue: AdminDialogue,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let language = register_user(&state.pool, user).await?;
    let lang = Some(language.as_str());
    let user_id = db_user_id(user);

    debug!(user_id, command = ?cmd, "Received command");

    if cmd.is_admin_only() && !state.is_admin(user) {
        bot.send_message(msg.chat.id, t_lang("admin-only", lang)).await?;
        return Ok(());
    }

    match cmd {
        Command::Start => {
            db::set_thread_id(&state.pool, user_id, None).await?;
            dialogue.exit().await?;
            bot.send_message(msg.chat.id, t_lang("choose-language", lang))
                .reply_markup(create_language_keyboard(true))
                .await?;
        }
        Command::Language => {
            bot.send_message(msg.chat.id, t_lang("choose-language", lang))
                .reply_markup(create_language_keyboard(false))
                .await?;
        }
        Command::Premium => {
            let until = db::get_user(&state.pool, user_id)
                .await?
                .and_then(|u| u.premium_until(now()));
            let text = match until {
                Some(until) => t_args_lang(
                    "premium-active",
                    &[("until", &until.format("%Y-%m-%d").to_string())],
                    lang,
                ),
                None => t_lang("premium-info", lang),
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, t_lang("help", lang)).await?;
        }
        Command::Cancel => {
            let reply = match dialogue.get().await?.unwrap_or_default() {
                AdminDialogueState::Idle => "nothing-to-cancel",
                AdminDialogueState::AwaitingBroadcast { .. } => "broadcast-cancelled",
                AdminDialogueState::AwaitingKnowledgeFile => "update-db-cancelled",
            };
            dialogue.exit().await?;
            bot.send_message(msg.chat.id, t_lang(reply, lang)).await?;
        }
        Command::GrantPremium(args) => {
            let Some((target, days)) = parse_grant_args(&args) else {
                bot.send_message(msg.chat.id, t_lang("premium-usage", lang)).await?;
                return Ok(());
            };
            let target_str = target.to_string();
            let reply = match db::grant_premium_access(&state.pool, target, days, now()).await? {
                Some(until) => {
                    info!(admin_id = user_id, target, days, "Admin granted premium");
                    t_args_lang(
                        "premium-granted",
                        &[
                            ("user", &target_str),
                            ("days", &days.to_string()),
                            ("until", &until.format("%Y-%m-%d").to_string()),
                        ],
                        lang,
                    )
                }
                None => t_args_lang("premium-user-not-found", &[("user", &target_str)], lang),
            };
            bot.send_message(msg.chat.id, reply).await?;
        }
        Command::RevokePremium(args) => {
            let Some(target) = parse_revoke_args(&args) else {
                bot.send_message(msg.chat.id, t_lang("premium-usage", lang)).await?;
                return Ok(());
            };
            let target_str = target.to_string();
            let key = if db::revoke_premium_access(&state.pool, target).await? {
                info!(admin_id = user_id, target, "Admin revoked premium");
                "premium-revoked"
            } else {
                "premium-user-not-found"
            };
            bot.send_message(msg.chat.id, t_args_lang(key, &[("user", &target_str)], lang))
                .await?;
        }
        Command::Stats => {
            let users = db::get_user_count(&state.pool).await?;
            let premium = db::get_premium_user_count(&state.pool, now()).await?;
            let feedback = db::get_feedback_stats(&state.pool).await?;
            bot.send_message(msg.chat.id, format_stats(users, premium, feedback, lang))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start", "halal_bot").unwrap(), Command::Start);
        assert_eq!(
            Command::parse("/grant_premium 12345 30", "halal_bot").unwrap(),
            Command::GrantPremium("12345 30".into())
        );
        assert_eq!(
            Command::parse("/revoke_premium 12345", "halal_bot").unwrap(),
            Command::RevokePremium("12345".into())
        );
        assert!(Command::parse("/unknown", "halal_bot").is_err());
    }

    #[test]
    fn test_grant_args() {
        assert_eq!(parse_grant_args("12345 30"), Some((12345, 30)));
        assert_eq!(parse_grant_args("  12345   7 "), Some((12345, 7)));
        assert_eq!(parse_grant_args("12345"), None);
        assert_eq!(parse_grant_args("12345 0"), None);
        assert_eq!(parse_grant_args("abc 30"), None);
        assert_eq!(parse_grant_args("1 2 3"), None);
        assert_eq!(parse_grant_args("1 36500"), Some((1, MAX_PREMIUM_DAYS)));
        assert_eq!(parse_grant_args("1 36501"), None);
        assert_eq!(parse_grant_args("1 100000000"), None);
    }

    #[test]
    fn test_revoke_args() {
        assert_eq!(parse_revoke_args("42"), Some(42));
        assert_eq!(parse_revoke_args(""), None);
        assert_eq!(parse_revoke_args("42 43"), None);
    }

    #[test]
    fn test_admin_only_commands() {
        assert!(Command::Stats.is_admin_only());
        assert!(Command::GrantPremium(String::new()).is_admin_only());
        assert!(!Command::Cancel.is_admin_only());
    }
}

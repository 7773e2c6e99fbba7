//! Callback Handler module for processing inline keyboard callback queries

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{debug, info, warn};

use crate::db::{self, Vote};
use crate::dialogue::{AdminDialogue, AdminDialogueState};
use crate::localization::t_lang;

use super::admin;
use super::ui_builder::{create_admin_keyboard, create_main_menu_keyboard, CallbackAction};
use super::{db_user_id, now, register_user, AppState};

/// Store the vote for the answer in `message` and take the buttons away
async fn record_vote(bot: &Bot, state: &AppState, q: &CallbackQuery, vote: Vote, lang: Option<&str>) -> Result<()> {
    bot.answer_callback_query(q.id.clone())
        .text(t_lang("feedback-thanks", lang))
        .await?;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();

    if let Err(e) = bot.edit_message_reply_markup(chat_id, message_id).await {
        warn!(error = %e, "Failed to remove feedback buttons");
    }

    let user_id = db_user_id(&q.from);
    let flagged = db::apply_vote(&state.pool, chat_id.0, message_id.0, user_id, vote, now()).await?;
    debug!(user_id, vote = vote.as_str(), flagged, "Vote recorded");
    Ok(())
}

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
    dialogue: AdminDialogue,
) -> Result<()> {
    let language = register_user(&state.pool, &q.from).await?;
    let lang = Some(language.as_str());
    let data = q.data.as_deref().unwrap_or("");

    debug!(user_id = %q.from.id, data, "Received callback query");

    let Some(action) = CallbackAction::parse(data) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    let is_admin = state.is_admin(&q.from);
    if action.requires_admin() && !is_admin {
        bot.answer_callback_query(q.id.clone())
            .text(t_lang("admin-only", lang))
            .await?;
        return Ok(());
    }

    if let CallbackAction::Vote(vote) = action {
        return record_vote(&bot, &state, &q, vote, lang).await;
    }

    bot.answer_callback_query(q.id.clone()).await?;
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;

    match action {
        CallbackAction::SetLanguage { language, from_start } => {
            db::update_user_language(&state.pool, db_user_id(&q.from), language).await?;
            info!(user_id = %q.from.id, language, "Language changed");
            let chosen = Some(language);
            bot.edit_message_text(chat_id, message.id(), t_lang("language-set", chosen))
                .await?;
            if from_start {
                bot.send_message(chat_id, t_lang("welcome", chosen))
                    .reply_markup(create_main_menu_keyboard(is_admin, chosen))
                    .await?;
            }
        }
        CallbackAction::AskText => {
            bot.send_message(chat_id, t_lang("ask-text-prompt", lang)).await?;
        }
        CallbackAction::AskPhoto => {
            bot.send_message(chat_id, t_lang("ask-photo-prompt", lang)).await?;
        }
        CallbackAction::AdminPanel => {
            bot.send_message(chat_id, t_lang("admin-panel-title", lang))
                .reply_markup(create_admin_keyboard(lang))
                .await?;
        }
        CallbackAction::FeedbackStats => admin::send_stats(&bot, &state, chat_id, lang).await?,
        CallbackAction::SuspiciousList => admin::send_suspicious_list(&bot, &state, chat_id, lang).await?,
        CallbackAction::BroadcastStart => {
            dialogue.update(AdminDialogueState::broadcast(now())).await?;
            bot.send_message(chat_id, t_lang("broadcast-prompt", lang)).await?;
        }
        CallbackAction::UpdateDb => {
            dialogue.update(AdminDialogueState::AwaitingKnowledgeFile).await?;
            bot.send_message(chat_id, t_lang("update-db-prompt", lang)).await?;
        }
        CallbackAction::ExportFeedback => admin::export_feedback(&bot, &state, chat_id, lang).await?,
        CallbackAction::Vote(_) => {}
    }
    Ok(())
}

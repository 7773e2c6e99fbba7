//! Message Handler module for processing incoming Telegram messages

use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardMarkup, Location, MessageId, ParseMode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assistant::{self, AssistantApi, AssistantError, PollSettings};
use crate::db::{self, RequestKind};
use crate::dialogue::{AdminDialogue, AdminDialogueState};
use crate::establishments::{self, EstablishmentsError, MAX_RESULTS, SEARCH_RADIUS_KM};
use crate::localization::{language_instruction, t_args_lang, t_lang, waiting_message};
use crate::usage::check_user_limits;

use super::admin;
use super::ui_builder::{
    assistant_error_message, create_feedback_keyboard, format_establishments, limit_message, ocr_error_message,
    split_message, TELEGRAM_TEXT_LIMIT,
};
use super::{db_user_id, download_file, now, register_user, AppState};

/// Who asked and where the answer goes
struct Asker<'a> {
    user_id: i64,
    chat_id: ChatId,
    lang: Option<&'a str>,
}

/// Charge the request against the user's quota; on refusal tell the user
/// and return `false`.
async fn within_limits(bot: &Bot, state: &AppState, msg: &Message, asker: &Asker<'_>, kind: RequestKind) -> Result<bool> {
    let is_admin = msg.from.as_ref().is_some_and(|u| state.is_admin(u));
    let decision = check_user_limits(&state.pool, asker.user_id, kind, is_admin, state.config.limits, now()).await?;

    match limit_message(decision, kind == RequestKind::Photo, asker.lang) {
        Some(text) => {
            info!(user_id = asker.user_id, kind = kind.as_str(), "Request refused, free limit reached");
            bot.send_message(asker.chat_id, text).await?;
            Ok(false)
        }
        None => Ok(true),
    }
}

/// Failure of a question asked in the user's stored thread
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Ask in the user's stored assistant thread.
///
/// A new thread id is stored as soon as the run exists, so a run that fails
/// later still keeps the conversation for the next question.
pub async fn ask_with_stored_thread(
    pool: &SqlitePool,
    api: &dyn AssistantApi,
    user_id: i64,
    query: &str,
    poll: PollSettings,
) -> Result<String, ConversationError> {
    let thread_id = db::get_thread_id(pool, user_id).await?;
    let run = assistant::start_run(api, thread_id.as_deref(), query).await?;

    if thread_id.as_deref() != Some(run.thread_id.as_str()) {
        db::set_thread_id(pool, user_id, Some(&run.thread_id)).await?;
        debug!(user_id, thread_id = %run.thread_id, "Stored new assistant thread");
    }

    Ok(assistant::wait_for_answer(api, run, poll).await?)
}

/// Show `text` either by editing `target` or as a new message; Markdown
/// first, plain text when Telegram rejects the markup.
async fn show_text(
    bot: &Bot,
    asker: &Asker<'_>,
    target: Option<MessageId>,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<MessageId> {
    match target {
        Some(id) => {
            let mut request = bot.edit_message_text(asker.chat_id, id, text).parse_mode(ParseMode::Markdown);
            if let Some(markup) = keyboard.clone() {
                request = request.reply_markup(markup);
            }
            if let Err(e) = request.await {
                // The assistant's Markdown is not always valid for Telegram
                warn!(user_id = asker.user_id, error = %e, "Markdown rejected, sending answer as plain text");
                let mut plain = bot.edit_message_text(asker.chat_id, id, text);
                if let Some(markup) = keyboard {
                    plain = plain.reply_markup(markup);
                }
                plain.await?;
            }
            Ok(id)
        }
        None => {
            let mut request = bot.send_message(asker.chat_id, text).parse_mode(ParseMode::Markdown);
            if let Some(markup) = keyboard.clone() {
                request = request.reply_markup(markup);
            }
            let sent = match request.await {
                Ok(sent) => sent,
                Err(e) => {
                    warn!(user_id = asker.user_id, error = %e, "Markdown rejected, sending answer as plain text");
                    let mut plain = bot.send_message(asker.chat_id, text);
                    if let Some(markup) = keyboard {
                        plain = plain.reply_markup(markup);
                    }
                    plain.await?
                }
            };
            Ok(sent.id)
        }
    }
}

/// Put the answer in place of `waiting`, continuing in new messages when it
/// is longer than Telegram allows. The vote buttons go on the last part,
/// whose id is returned.
async fn deliver_answer(bot: &Bot, asker: &Asker<'_>, waiting: &Message, answer: &str) -> Result<MessageId> {
    let parts = split_message(answer, TELEGRAM_TEXT_LIMIT);
    let last = parts.len() - 1;

    let mut shown = waiting.id;
    for (i, part) in parts.iter().enumerate() {
        let target = (i == 0).then_some(waiting.id);
        let keyboard = (i == last).then(create_feedback_keyboard);
        shown = show_text(bot, asker, target, part, keyboard).await?;
    }
    Ok(shown)
}

/// Ask the assistant and turn `waiting` into the answer.
///
/// `query` is what the assistant sees; `question` is what gets stored for
/// feedback.
async fn answer_with_assistant(
    bot: &Bot,
    state: &AppState,
    asker: &Asker<'_>,
    waiting: &Message,
    query: &str,
    question: &str,
    kind: RequestKind,
) -> Result<()> {
    let answer = match ask_with_stored_thread(
        &state.pool,
        state.assistant.as_ref(),
        asker.user_id,
        query,
        state.poll_settings(),
    )
    .await
    {
        Ok(answer) => answer,
        Err(ConversationError::Assistant(e)) => {
            error!(user_id = asker.user_id, error = %e, "Assistant request failed");
            bot.edit_message_text(asker.chat_id, waiting.id, assistant_error_message(&e, asker.lang))
                .await?;
            return Ok(());
        }
        Err(ConversationError::Store(e)) => return Err(e),
    };

    info!(user_id = asker.user_id, kind = kind.as_str(), chars = answer.chars().count(), "Assistant answered");

    let shown = deliver_answer(bot, asker, waiting, &answer).await?;
    db::save_answer(
        &state.pool,
        asker.chat_id.0,
        shown.0,
        asker.user_id,
        question,
        &answer,
        kind,
        now(),
    )
    .await?;
    Ok(())
}

/// Once the waiting message is out, a failure replaces it with a generic
/// apology instead of leaving the user waiting.
async fn apologize_on_error(bot: &Bot, asker: &Asker<'_>, waiting: &Message, outcome: Result<()>) -> Result<()> {
    let Err(e) = outcome else {
        return Ok(());
    };
    error!(user_id = asker.user_id, error = %e, "Request failed after the waiting message");

    let apology = t_lang("error-unexpected", asker.lang);
    if let Err(edit_error) = bot.edit_message_text(asker.chat_id, waiting.id, &apology).await {
        warn!(error = %edit_error, "Failed to replace the waiting message");
        bot.send_message(asker.chat_id, apology).await?;
    }
    Ok(())
}

async fn handle_question(bot: &Bot, state: &AppState, msg: &Message, asker: &Asker<'_>, text: &str) -> Result<()> {
    let question = text.trim();
    if question.starts_with('/') {
        bot.send_message(asker.chat_id, t_lang("help", asker.lang)).await?;
        return Ok(());
    }
    if !within_limits(bot, state, msg, asker, RequestKind::Text).await? {
        return Ok(());
    }

    debug!(user_id = asker.user_id, "Received question");
    let waiting = bot.send_message(asker.chat_id, waiting_message(asker.lang)).await?;
    let query = format!("{}{}", language_instruction(asker.lang), question);
    let outcome = answer_with_assistant(bot, state, asker, &waiting, &query, question, RequestKind::Text).await;
    apologize_on_error(bot, asker, &waiting, outcome).await
}

/// Read the product label, then ask the assistant about it
async fn handle_image(bot: &Bot, state: &AppState, msg: &Message, asker: &Asker<'_>, file_id: FileId) -> Result<()> {
    if !within_limits(bot, state, msg, asker, RequestKind::Photo).await? {
        return Ok(());
    }

    let waiting = bot.send_message(asker.chat_id, waiting_message(asker.lang)).await?;
    let outcome = read_label_and_answer(bot, state, asker, &waiting, file_id).await;
    apologize_on_error(bot, asker, &waiting, outcome).await
}

async fn read_label_and_answer(
    bot: &Bot,
    state: &AppState,
    asker: &Asker<'_>,
    waiting: &Message,
    file_id: FileId,
) -> Result<()> {
    let bytes = match download_file(bot, &state.http, file_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(user_id = asker.user_id, error = %e, "Failed to download image");
            bot.edit_message_text(asker.chat_id, waiting.id, t_lang("error-download-failed", asker.lang))
                .await?;
            return Ok(());
        }
    };

    let recognized = match state.recognizer.recognize(&bytes).await {
        Ok(text) => text,
        Err(e) => {
            warn!(user_id = asker.user_id, error = %e, "OCR failed");
            bot.edit_message_text(asker.chat_id, waiting.id, ocr_error_message(&e, asker.lang))
                .await?;
            return Ok(());
        }
    };
    let description = recognized.unwrap_or_else(|| t_lang("photo-no-text", asker.lang));

    bot.edit_message_text(asker.chat_id, waiting.id, t_lang("photo-analyzed", asker.lang))
        .await?;

    let query = format!(
        "{}{}",
        language_instruction(asker.lang),
        t_args_lang("photo-query", &[("text", &description)], asker.lang)
    );
    answer_with_assistant(bot, state, asker, waiting, &query, &description, RequestKind::Photo).await
}

async fn handle_location(bot: &Bot, state: &AppState, asker: &Asker<'_>, location: &Location) -> Result<()> {
    bot.send_message(asker.chat_id, t_lang("location-searching", asker.lang)).await?;

    let organizations = match establishments::load_establishments(&state.config.establishments_file).await {
        Ok(orgs) => orgs,
        Err(e) => {
            error!(error = %e, "Establishments list unavailable");
            let key = match e {
                EstablishmentsError::Missing(_) => "location-db-missing",
                EstablishmentsError::Invalid(_) => "location-db-invalid",
            };
            bot.send_message(asker.chat_id, t_lang(key, asker.lang)).await?;
            return Ok(());
        }
    };

    let nearby = establishments::nearest(
        &organizations,
        location.latitude,
        location.longitude,
        SEARCH_RADIUS_KM,
        MAX_RESULTS,
    );
    debug!(user_id = asker.user_id, found = nearby.len(), "Nearest establishments");

    bot.send_message(asker.chat_id, format_establishments(&nearby, asker.lang))
        .await?;
    Ok(())
}

async fn handle_document(bot: &Bot, state: &AppState, msg: &Message, asker: &Asker<'_>) -> Result<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let is_image = doc
        .mime_type
        .as_ref()
        .is_some_and(|mime| mime.type_() == "image");
    if is_image {
        debug!(user_id = asker.user_id, "Received image document");
        handle_image(bot, state, msg, asker, doc.file.id.clone()).await
    } else {
        bot.send_message(asker.chat_id, t_lang("error-unsupported-format", asker.lang))
            .await?;
        Ok(())
    }
}

/// Admin dialogue states take the message before normal handling.
/// Returns `true` when the message was consumed.
async fn handle_admin_dialogue(
    bot: &Bot,
    state: &AppState,
    msg: &Message,
    dialogue: &AdminDialogue,
    lang: Option<&str>,
) -> Result<bool> {
    let is_admin = msg.from.as_ref().is_some_and(|u| state.is_admin(u));
    let current = dialogue.get().await?.unwrap_or_default();
    if current.is_idle() {
        return Ok(false);
    }
    if !is_admin {
        dialogue.exit().await?;
        return Ok(false);
    }

    match current {
        AdminDialogueState::Idle => Ok(false),
        AdminDialogueState::AwaitingBroadcast { started_at } => {
            dialogue.exit().await?;
            if !AdminDialogueState::broadcast_is_live(started_at, now()) {
                bot.send_message(msg.chat.id, t_lang("broadcast-expired", lang)).await?;
                return Ok(true);
            }
            match msg.text() {
                Some(text) => admin::broadcast(bot, state, msg.chat.id, text, lang).await?,
                None => {
                    bot.send_message(msg.chat.id, t_lang("broadcast-cancelled", lang)).await?;
                }
            }
            Ok(true)
        }
        AdminDialogueState::AwaitingKnowledgeFile => {
            admin::receive_knowledge_file(bot, state, msg, dialogue, lang).await?;
            Ok(true)
        }
    }
}

pub async fn message_handler(bot: Bot, msg: Message, state: Arc<AppState>, dialogue: AdminDialogue) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let language = register_user(&state.pool, user).await?;
    let lang = Some(language.as_str());

    if handle_admin_dialogue(&bot, &state, &msg, &dialogue, lang).await? {
        return Ok(());
    }

    let asker = Asker {
        user_id: db_user_id(user),
        chat_id: msg.chat.id,
        lang,
    };

    if let Some(text) = msg.text() {
        handle_question(&bot, &state, &msg, &asker, text).await?;
    } else if let Some(photos) = msg.photo() {
        if let Some(largest) = photos.last() {
            debug!(user_id = asker.user_id, "Received photo");
            handle_image(&bot, &state, &msg, &asker, largest.file.id.clone()).await?;
        }
    } else if msg.document().is_some() {
        handle_document(&bot, &state, &msg, &asker).await?;
    } else if let Some(location) = msg.location() {
        handle_location(&bot, &state, &asker, location).await?;
    } else {
        debug!(user_id = asker.user_id, "Unsupported message type");
        bot.send_message(msg.chat.id, t_lang("unsupported-message", lang)).await?;
    }

    Ok(())
}

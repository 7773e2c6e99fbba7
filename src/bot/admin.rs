//! Admin console: broadcast, knowledge base upload, statistics, suspicious
//! products and feedback export.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{error, info, warn};

use crate::assistant::AssistantError;
use crate::db::{self, FeedbackEntry};
use crate::dialogue::AdminDialogue;
use crate::localization::{t_args_lang, t_lang};

use super::ui_builder::{format_stats, format_suspicious_list};
use super::{download_file, now, AppState};

/// Pause between two broadcast messages, under Telegram's 30 msg/s cap
pub const BROADCAST_DELAY: Duration = Duration::from_millis(100);
pub const SUSPICIOUS_LIST_LIMIT: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send to every user in turn. A `RetryAfter` is waited out and the same
/// user is tried once more; anything else counts as a failure.
pub async fn fan_out<F, Fut>(user_ids: &[i64], delay: Duration, mut send: F) -> BroadcastReport
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<(), RequestError>>,
{
    let mut report = BroadcastReport::default();

    for &user_id in user_ids {
        let mut result = send(user_id).await;
        if let Err(RequestError::RetryAfter(wait)) = &result {
            warn!(user_id, retry_after = ?wait.duration(), "Broadcast throttled");
            tokio::time::sleep(wait.duration()).await;
            result = send(user_id).await;
        }

        match result {
            Ok(()) => report.sent += 1,
            Err(RequestError::Api(ApiError::BotBlocked)) => {
                warn!(user_id, "User blocked the bot, message not delivered");
                report.failed += 1;
            }
            Err(e) => {
                error!(user_id, error = %e, "Broadcast message failed");
                report.failed += 1;
            }
        }
        tokio::time::sleep(delay).await;
    }

    report
}

/// Deliver `text` to every stored user and report the counts to the admin
pub async fn broadcast(bot: &Bot, state: &AppState, admin_chat: ChatId, text: &str, lang: Option<&str>) -> Result<()> {
    let user_ids = db::get_all_user_ids(&state.pool).await?;
    if user_ids.is_empty() {
        bot.send_message(admin_chat, t_lang("broadcast-no-users", lang)).await?;
        return Ok(());
    }

    bot.send_message(
        admin_chat,
        t_args_lang("broadcast-started", &[("count", &user_ids.len().to_string())], lang),
    )
    .await?;

    let report = fan_out(&user_ids, BROADCAST_DELAY, |user_id| async move {
        bot.send_message(ChatId(user_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
    })
    .await;

    info!(sent = report.sent, failed = report.failed, "Broadcast finished");
    bot.send_message(
        admin_chat,
        t_args_lang(
            "broadcast-done",
            &[("sent", &report.sent.to_string()), ("failed", &report.failed.to_string())],
            lang,
        ),
    )
    .await?;
    Ok(())
}

/// Upload the admin's document to the assistant and attach it to the
/// vector store. The dialogue ends whatever the outcome.
pub async fn receive_knowledge_file(
    bot: &Bot,
    state: &AppState,
    msg: &Message,
    dialogue: &AdminDialogue,
    lang: Option<&str>,
) -> Result<()> {
    let Some(vector_store_id) = state.config.assistant.vector_store_id.as_deref() else {
        bot.send_message(msg.chat.id, t_lang("update-db-no-store", lang)).await?;
        dialogue.exit().await?;
        return Ok(());
    };

    let Some(doc) = msg.document() else {
        bot.send_message(msg.chat.id, t_lang("update-db-not-document", lang)).await?;
        return Ok(());
    };
    dialogue.exit().await?;

    let status = bot.send_message(msg.chat.id, t_lang("update-db-processing", lang)).await?;
    let file_name = doc.file_name.clone().unwrap_or_else(|| "knowledge.txt".to_string());

    let outcome: Result<(), String> = async {
        let bytes = download_file(bot, &state.http, doc.file.id.clone())
            .await
            .map_err(|e| e.to_string())?;
        bot.edit_message_text(msg.chat.id, status.id, t_lang("update-db-uploading", lang))
            .await
            .map_err(|e| e.to_string())?;

        let file_id = state
            .assistant
            .upload_file(&file_name, bytes)
            .await
            .map_err(|e: AssistantError| e.to_string())?;
        bot.edit_message_text(
            msg.chat.id,
            status.id,
            t_args_lang("update-db-attaching", &[("file_id", &file_id)], lang),
        )
        .await
        .map_err(|e| e.to_string())?;

        state
            .assistant
            .add_file_to_vector_store(vector_store_id, &file_id)
            .await
            .map_err(|e| e.to_string())
    }
    .await;

    let text = match outcome {
        Ok(()) => {
            info!(file_name = %file_name, vector_store_id, "Knowledge base updated");
            t_args_lang("update-db-done", &[("name", &file_name)], lang)
        }
        Err(e) => {
            error!(file_name = %file_name, error = %e, "Knowledge base update failed");
            t_args_lang("update-db-failed", &[("error", &e)], lang)
        }
    };
    bot.edit_message_text(msg.chat.id, status.id, text).await?;
    Ok(())
}

pub async fn send_stats(bot: &Bot, state: &AppState, chat_id: ChatId, lang: Option<&str>) -> Result<()> {
    let users = db::get_user_count(&state.pool).await?;
    let premium = db::get_premium_user_count(&state.pool, now()).await?;
    let feedback = db::get_feedback_stats(&state.pool).await?;
    bot.send_message(chat_id, format_stats(users, premium, feedback, lang)).await?;
    Ok(())
}

pub async fn send_suspicious_list(bot: &Bot, state: &AppState, chat_id: ChatId, lang: Option<&str>) -> Result<()> {
    let products = db::recent_suspicious_products(&state.pool, SUSPICIOUS_LIST_LIMIT).await?;
    bot.send_message(chat_id, format_suspicious_list(&products, lang)).await?;
    Ok(())
}

/// Feedback rows as CSV, header first
pub fn feedback_csv(entries: &[FeedbackEntry]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", "user_id", "question", "bot_answer", "vote"])?;
    for entry in entries {
        writer.write_record([
            entry.created_at.as_str(),
            &entry.user_id.to_string(),
            entry.question.as_str(),
            entry.bot_answer.as_str(),
            entry.vote.as_str(),
        ])?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

pub async fn export_feedback(bot: &Bot, state: &AppState, chat_id: ChatId, lang: Option<&str>) -> Result<()> {
    let entries = db::list_feedback(&state.pool).await?;
    if entries.is_empty() {
        bot.send_message(chat_id, t_lang("feedback-export-empty", lang)).await?;
        return Ok(());
    }

    let bytes = feedback_csv(&entries)?;
    info!(rows = entries.len(), "Exporting feedback");
    bot.send_document(chat_id, InputFile::memory(bytes).file_name("feedback.csv"))
        .await?;
    Ok(())
}

//! Bot module for handling Telegram interactions
//!
//! - `commands`: slash commands, including the admin ones
//! - `message_handler`: text, photo, document and location messages
//! - `callback_handler`: inline keyboard callback queries
//! - `admin`: broadcast, knowledge base upload, statistics and exports
//! - `ui_builder`: keyboards and message formatting

pub mod admin;
pub mod callback_handler;
pub mod commands;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePool;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{FileId, User};

use crate::assistant::{AssistantApi, PollSettings};
use crate::config::Config;
use crate::db;
use crate::dialogue::AdminDialogueState;
use crate::localization::detect_language;
use crate::ocr::TextRecognizer;

pub use callback_handler::callback_handler;
pub use commands::{command_handler, Command};
pub use message_handler::message_handler;

/// Everything the handlers share
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub assistant: Arc<dyn AssistantApi>,
    pub recognizer: TextRecognizer,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn is_admin(&self, user: &User) -> bool {
        self.config.is_admin(user.id.0)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.config.assistant.poll_interval,
            max_polls: self.config.assistant.max_polls,
        }
    }
}

/// Wall-clock time used for every stored timestamp
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Telegram user ids fit in 52 bits, so they are stored as SQLite integers
pub fn db_user_id(user: &User) -> i64 {
    user.id.0 as i64
}

/// Record the user and return the language their replies should use
pub async fn register_user(pool: &SqlitePool, user: &User) -> Result<String> {
    let user_id = db_user_id(user);
    db::add_or_update_user(
        pool,
        user_id,
        &user.full_name(),
        user.username.as_deref(),
        detect_language(user.language_code.as_deref()),
        now(),
    )
    .await?;
    db::get_user_language(pool, user_id).await
}

/// Fetch a Telegram file into memory
pub async fn download_file(bot: &Bot, http: &reqwest::Client, file_id: FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!("https://api.telegram.org/file/bot{}/{}", bot.token(), file.path);

    let bytes = http
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .context("Failed to download file from Telegram")?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}

/// Dispatcher tree: commands first, then plain messages; callback queries
/// share the same per-chat admin dialogue.
pub fn schema() -> UpdateHandler<anyhow::Error> {
    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<AdminDialogueState>, AdminDialogueState>()
        .branch(teloxide::filter_command::<Command, _>().endpoint(command_handler))
        .branch(dptree::endpoint(message_handler));

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<AdminDialogueState>, AdminDialogueState>()
        .endpoint(callback_handler);

    dptree::entry().branch(messages).branch(callbacks)
}

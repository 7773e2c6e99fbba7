//! Runtime configuration read from the environment.
//!
//! `main` loads `.env` through `dotenv` first, so every value here can live
//! either in the process environment or in that file. Only the bot token is
//! mandatory; missing optional values disable the feature that needs them.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_ADMIN_IDS: &str = "929307596";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";
pub const DEFAULT_FREE_TEXT_LIMIT: u32 = 10;
pub const DEFAULT_FREE_PHOTO_LIMIT: u32 = 3;

/// Which OCR engine reads text from user photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrBackendKind {
    GoogleVision,
    Tesseract,
}

impl FromStr for OcrBackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "google-vision" | "vision" => Ok(Self::GoogleVision),
            "tesseract" => Ok(Self::Tesseract),
            other => Err(AppError::Config(format!("unknown OCR_BACKEND: {other}"))),
        }
    }
}

/// OpenAI Assistants settings.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub assistant_id: Option<String>,
    pub api_base: String,
    pub vector_store_id: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

/// OCR back end settings.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub backend: OcrBackendKind,
    pub google_api_key: Option<String>,
    pub google_endpoint: String,
    pub tesseract_languages: String,
}

/// Free-tier request quotas, per user per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLimits {
    pub text: u32,
    pub photo: u32,
}

impl Default for FreeLimits {
    fn default() -> Self {
        Self {
            text: DEFAULT_FREE_TEXT_LIMIT,
            photo: DEFAULT_FREE_PHOTO_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub assistant: AssistantConfig,
    pub vision: VisionConfig,
    pub admin_ids: Vec<u64>,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub limits: FreeLimits,
    pub establishments_file: PathBuf,
    pub webhook_url: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_token = get("TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| AppError::Config("TELEGRAM_BOT_TOKEN must be set".into()))?;

        let assistant = AssistantConfig {
            api_key: get("OPENAI_API_KEY"),
            assistant_id: get("OPENAI_ASSISTANT_ID"),
            api_base: get("OPENAI_API_BASE")
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            vector_store_id: get("VECTOR_STORE_ID"),
            poll_interval: Duration::from_millis(parse_or("ASSISTANT_POLL_INTERVAL_MS", get("ASSISTANT_POLL_INTERVAL_MS"), 2000u64)?),
            max_polls: parse_or("ASSISTANT_MAX_POLLS", get("ASSISTANT_MAX_POLLS"), 90u32)?,
        };

        let vision = VisionConfig {
            backend: match get("OCR_BACKEND") {
                Some(v) => v.parse()?,
                None => OcrBackendKind::GoogleVision,
            },
            google_api_key: get("GOOGLE_VISION_API_KEY"),
            google_endpoint: get("GOOGLE_VISION_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string()),
            tesseract_languages: get("TESSERACT_LANGUAGES")
                .unwrap_or_else(|| "kaz+rus+eng".to_string()),
        };

        let admin_ids = parse_admin_ids(
            &get("ADMIN_IDS").unwrap_or_else(|| DEFAULT_ADMIN_IDS.to_string()),
        )?;

        let data_dir = PathBuf::from(get("RENDER_DISK_MOUNT_PATH").unwrap_or_else(|| ".".into()));
        let database_url = get("DATABASE_URL").unwrap_or_else(|| default_database_url(&data_dir));

        let limits = FreeLimits {
            text: parse_or("FREE_TEXT_LIMIT", get("FREE_TEXT_LIMIT"), DEFAULT_FREE_TEXT_LIMIT)?,
            photo: parse_or("FREE_PHOTO_LIMIT", get("FREE_PHOTO_LIMIT"), DEFAULT_FREE_PHOTO_LIMIT)?,
        };

        Ok(Self {
            telegram_token,
            assistant,
            vision,
            admin_ids,
            data_dir,
            database_url,
            limits,
            establishments_file: PathBuf::from(
                get("ESTABLISHMENTS_FILE").unwrap_or_else(|| "qmdb_data_json.json".into()),
            ),
            webhook_url: get("WEBHOOK_URL").map(|u| u.trim_end_matches('/').to_string()),
            port: parse_or("PORT", get("PORT"), 8080u16)?,
        })
    }

    /// Create the data directory that holds the database file
    pub fn ensure_data_dir(&self) -> Result<(), AppError> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Telegram only delivers webhooks over TLS, so anything else falls back
    /// to long polling.
    pub fn webhook_enabled(&self) -> bool {
        self.webhook_url
            .as_deref()
            .is_some_and(|u| u.starts_with("https://"))
    }
}

fn default_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("bot_users.db").display())
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, AppError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {v}"))),
        None => Ok(default),
    }
}

/// Parse a comma separated list of Telegram user ids.
pub fn parse_admin_ids(raw: &str) -> Result<Vec<u64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| AppError::Config(format!("ADMIN_IDS contains an invalid id: {s}")))
        })
        .collect()
}

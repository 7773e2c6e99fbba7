//! SQLite persistence for users, usage counters, premium entitlements,
//! assistant threads, answered questions, feedback and suspicious products.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Represents a bot user
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub is_premium: bool,
    pub subscription_end_date: Option<String>,
    pub created_at: String,
}

impl User {
    /// End of an active premium subscription, `None` when there is none at `now`
    pub fn premium_until(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.is_premium {
            return None;
        }
        self.subscription_end_date
            .as_deref()
            .and_then(parse_datetime)
            .filter(|end| *end > now)
    }
}

/// Daily request counters for a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub text_requests: u32,
    pub photo_requests: u32,
    pub last_request_date: Option<NaiveDate>,
}

/// Which daily counter a request is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Text,
    Photo,
}

impl RequestKind {
    fn column(self) -> &'static str {
        match self {
            RequestKind::Text => "text_requests_count",
            RequestKind::Photo => "photo_requests_count",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Text => "text",
            RequestKind::Photo => "photo",
        }
    }
}

/// A question the bot answered, remembered until the user votes on it
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AnswerRecord {
    pub chat_id: i64,
    pub message_id: i32,
    pub user_id: i64,
    pub question: String,
    pub answer: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Like,
    Dislike,
}

impl Vote {
    pub fn as_str(self) -> &'static str {
        match self {
            Vote::Like => "like",
            Vote::Dislike => "dislike",
        }
    }

    pub fn from_callback(data: &str) -> Option<Self> {
        match data {
            "like" => Some(Vote::Like),
            "dislike" => Some(Vote::Dislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FeedbackEntry {
    pub id: i64,
    pub user_id: i64,
    pub question: String,
    pub bot_answer: String,
    pub vote: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub total: i64,
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SuspiciousProduct {
    pub id: i64,
    pub user_id: i64,
    pub description: String,
    pub created_at: String,
}

pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Open (creating if needed) the database and run the schema setup
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    info!(database_url = %database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database url: {database_url}"))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    init_database_schema(&pool).await?;
    Ok(pool)
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &SqlitePool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            full_name TEXT,
            username TEXT,
            language_code TEXT,
            is_premium INTEGER NOT NULL DEFAULT 0,
            subscription_end_date TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    run_user_migrations(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS answers (
            chat_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (chat_id, message_id)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create answers table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            question TEXT NOT NULL,
            bot_answer TEXT NOT NULL,
            vote TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create feedback table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS suspicious_products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create suspicious_products table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Add the usage and thread columns to databases created before they existed
async fn run_user_migrations(pool: &SqlitePool) -> Result<()> {
    let columns: Vec<String> = sqlx::query("PRAGMA table_info(users)")
        .fetch_all(pool)
        .await
        .context("Failed to read users table layout")?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    let wanted = [
        ("text_requests_count", "INTEGER NOT NULL DEFAULT 0"),
        ("photo_requests_count", "INTEGER NOT NULL DEFAULT 0"),
        ("last_request_date", "TEXT"),
        ("openai_thread_id", "TEXT"),
    ];

    for (name, definition) in wanted {
        if !columns.iter().any(|c| c == name) {
            sqlx::query(&format!("ALTER TABLE users ADD COLUMN {name} {definition}"))
                .execute(pool)
                .await
                .with_context(|| format!("Failed to add column {name}"))?;
            info!(column = name, "Added missing users column");
        }
    }

    Ok(())
}

/// Insert a new user or refresh the profile of an existing one.
///
/// The stored language is only set on insert; afterwards it changes through
/// `update_user_language` when the user picks one.
pub async fn add_or_update_user(
    pool: &SqlitePool,
    user_id: i64,
    full_name: &str,
    username: Option<&str>,
    language_code: &str,
    now: NaiveDateTime,
) -> Result<()> {
    debug!(user_id, "Upserting user");

    sqlx::query(
        "INSERT INTO users (user_id, full_name, username, language_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            full_name = excluded.full_name,
            username = excluded.username",
    )
    .bind(user_id)
    .bind(full_name)
    .bind(username)
    .bind(language_code)
    .bind(format_datetime(now))
    .execute(pool)
    .await
    .context("Failed to add or update user")?;

    Ok(())
}

pub async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT user_id, full_name, username, language_code, is_premium,
                subscription_end_date, created_at
         FROM users WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read user")
}

pub async fn get_user_count(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")
}

pub async fn get_premium_user_count(pool: &SqlitePool, now: NaiveDateTime) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users
         WHERE is_premium = 1 AND subscription_end_date IS NOT NULL AND subscription_end_date > ?1",
    )
    .bind(format_datetime(now))
    .fetch_one(pool)
    .await
    .context("Failed to count premium users")
}

pub async fn get_all_user_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT user_id FROM users ORDER BY user_id")
        .fetch_all(pool)
        .await
        .context("Failed to list user ids")
}

/// Whether the user holds a premium subscription that has not expired yet
pub async fn is_user_premium(pool: &SqlitePool, user_id: i64, now: NaiveDateTime) -> Result<bool> {
    let row: Option<(bool, Option<String>)> = sqlx::query_as(
        "SELECT is_premium, subscription_end_date FROM users WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read premium status")?;

    Ok(match row {
        Some((true, Some(end_date))) => parse_datetime(&end_date).is_some_and(|end| end > now),
        _ => false,
    })
}

/// Grant premium for `days` days from `now`. Returns the expiry, or `None`
/// when the user is unknown.
pub async fn grant_premium_access(
    pool: &SqlitePool,
    user_id: i64,
    days: i64,
    now: NaiveDateTime,
) -> Result<Option<NaiveDateTime>> {
    let end_date = Duration::try_days(days)
        .and_then(|period| now.checked_add_signed(period))
        .with_context(|| format!("Premium period of {days} days is out of range"))?;

    let result = sqlx::query(
        "UPDATE users SET is_premium = 1, subscription_end_date = ?1 WHERE user_id = ?2",
    )
    .bind(format_datetime(end_date))
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to grant premium")?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    info!(user_id, days, "Premium access granted");
    Ok(Some(end_date))
}

pub async fn revoke_premium_access(pool: &SqlitePool, user_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET is_premium = 0, subscription_end_date = NULL WHERE user_id = ?1",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to revoke premium")?;

    info!(user_id, "Premium access revoked");
    Ok(result.rows_affected() > 0)
}

pub async fn update_user_language(pool: &SqlitePool, user_id: i64, language_code: &str) -> Result<()> {
    sqlx::query("UPDATE users SET language_code = ?1 WHERE user_id = ?2")
        .bind(language_code)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to update user language")?;

    info!(user_id, language_code, "User language changed");
    Ok(())
}

/// The user's stored language, `kk` when unknown
pub async fn get_user_language(pool: &SqlitePool, user_id: i64) -> Result<String> {
    let language: Option<Option<String>> =
        sqlx::query_scalar("SELECT language_code FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to read user language")?;

    Ok(language
        .flatten()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| crate::localization::DEFAULT_LANGUAGE.to_string()))
}

pub async fn get_user_usage(pool: &SqlitePool, user_id: i64) -> Result<Usage> {
    let row: Option<(i64, i64, Option<String>)> = sqlx::query_as(
        "SELECT text_requests_count, photo_requests_count, last_request_date
         FROM users WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read usage")?;

    Ok(match row {
        Some((text, photo, last)) => Usage {
            text_requests: text.max(0) as u32,
            photo_requests: photo.max(0) as u32,
            last_request_date: last
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok()),
        },
        None => Usage::default(),
    })
}

/// Zero both counters and stamp the day they now count for
pub async fn reset_user_limits(pool: &SqlitePool, user_id: i64, today: NaiveDate) -> Result<()> {
    sqlx::query(
        "UPDATE users SET text_requests_count = 0, photo_requests_count = 0, last_request_date = ?1
         WHERE user_id = ?2",
    )
    .bind(today.format(DATE_FORMAT).to_string())
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to reset usage limits")?;

    Ok(())
}

pub async fn increment_request_count(pool: &SqlitePool, user_id: i64, kind: RequestKind) -> Result<()> {
    let column = kind.column();
    sqlx::query(&format!("UPDATE users SET {column} = {column} + 1 WHERE user_id = ?1"))
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to increment request count")?;

    Ok(())
}

/// Store or clear the user's assistant conversation thread
pub async fn set_thread_id(pool: &SqlitePool, user_id: i64, thread_id: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE users SET openai_thread_id = ?1 WHERE user_id = ?2")
        .bind(thread_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to store thread id")?;

    Ok(())
}

pub async fn get_thread_id(pool: &SqlitePool, user_id: i64) -> Result<Option<String>> {
    let thread: Option<Option<String>> =
        sqlx::query_scalar("SELECT openai_thread_id FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to read thread id")?;

    Ok(thread.flatten())
}

#[allow(clippy::too_many_arguments)]
pub async fn save_answer(
    pool: &SqlitePool,
    chat_id: i64,
    message_id: i32,
    user_id: i64,
    question: &str,
    answer: &str,
    kind: RequestKind,
    now: NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO answers (chat_id, message_id, user_id, question, answer, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(chat_id)
    .bind(message_id)
    .bind(user_id)
    .bind(question)
    .bind(answer)
    .bind(kind.as_str())
    .bind(format_datetime(now))
    .execute(pool)
    .await
    .context("Failed to save answer")?;

    Ok(())
}

pub async fn find_answer(pool: &SqlitePool, chat_id: i64, message_id: i32) -> Result<Option<AnswerRecord>> {
    sqlx::query_as::<_, AnswerRecord>(
        "SELECT chat_id, message_id, user_id, question, answer, source, created_at
         FROM answers WHERE chat_id = ?1 AND message_id = ?2",
    )
    .bind(chat_id)
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read answer")
}

pub async fn record_feedback(
    pool: &SqlitePool,
    user_id: i64,
    question: &str,
    bot_answer: &str,
    vote: Vote,
    now: NaiveDateTime,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO feedback (user_id, question, bot_answer, vote, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(user_id)
    .bind(question)
    .bind(bot_answer)
    .bind(vote.as_str())
    .bind(format_datetime(now))
    .execute(pool)
    .await
    .context("Failed to record feedback")?;

    info!(user_id, vote = vote.as_str(), "Feedback recorded");
    Ok(result.last_insert_rowid())
}

pub async fn get_feedback_stats(pool: &SqlitePool) -> Result<FeedbackStats> {
    let (total, likes, dislikes): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*),
                SUM(CASE WHEN vote = 'like' THEN 1 ELSE 0 END),
                SUM(CASE WHEN vote = 'dislike' THEN 1 ELSE 0 END)
         FROM feedback",
    )
    .fetch_one(pool)
    .await
    .context("Failed to compute feedback stats")?;

    Ok(FeedbackStats {
        total,
        likes: likes.unwrap_or(0),
        dislikes: dislikes.unwrap_or(0),
    })
}

pub async fn list_feedback(pool: &SqlitePool) -> Result<Vec<FeedbackEntry>> {
    sqlx::query_as::<_, FeedbackEntry>(
        "SELECT id, user_id, question, bot_answer, vote, created_at FROM feedback ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list feedback")
}

pub async fn record_suspicious_product(
    pool: &SqlitePool,
    user_id: i64,
    description: &str,
    now: NaiveDateTime,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO suspicious_products (user_id, description, created_at) VALUES (?1, ?2, ?3)",
    )
    .bind(user_id)
    .bind(description)
    .bind(format_datetime(now))
    .execute(pool)
    .await
    .context("Failed to record suspicious product")?;

    info!(user_id, "Suspicious product logged");
    Ok(result.last_insert_rowid())
}

/// Most recent suspicious products, oldest first
pub async fn recent_suspicious_products(pool: &SqlitePool, limit: i64) -> Result<Vec<SuspiciousProduct>> {
    let mut products = sqlx::query_as::<_, SuspiciousProduct>(
        "SELECT id, user_id, description, created_at FROM suspicious_products
         ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list suspicious products")?;

    products.reverse();
    Ok(products)
}

/// Record a vote on the answer shown in message `message_id` of `chat_id`.
///
/// A dislike on a photo answer also logs the recognized label text as a
/// suspicious product. Returns `true` when that happened.
pub async fn apply_vote(
    pool: &SqlitePool,
    chat_id: i64,
    message_id: i32,
    user_id: i64,
    vote: Vote,
    now: NaiveDateTime,
) -> Result<bool> {
    let answer = find_answer(pool, chat_id, message_id).await?;
    let (question, bot_answer, source) = match &answer {
        Some(a) => (a.question.as_str(), a.answer.as_str(), a.source.as_str()),
        None => ("", "", ""),
    };

    record_feedback(pool, user_id, question, bot_answer, vote, now).await?;

    let suspicious = vote == Vote::Dislike && source == RequestKind::Photo.as_str() && !question.is_empty();
    if suspicious {
        record_suspicious_product(pool, user_id, question, now).await?;
    }
    Ok(suspicious)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        init_database_schema(&pool).await?;
        Ok(pool)
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() -> Result<()> {
        let pool = setup_test_db().await?;
        init_database_schema(&pool).await?;
        assert_eq!(get_user_count(&pool).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_migration_adds_missing_columns() -> Result<()> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        // Layout written by the first release, before usage tracking existed
        sqlx::query(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                full_name TEXT,
                username TEXT,
                language_code TEXT,
                is_premium INTEGER DEFAULT 0,
                subscription_end_date TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("INSERT INTO users (user_id, full_name, created_at) VALUES (7, 'Old', '2024-01-01T00:00:00')")
            .execute(&pool)
            .await?;

        init_database_schema(&pool).await?;

        increment_request_count(&pool, 7, RequestKind::Photo).await?;
        set_thread_id(&pool, 7, Some("thread_old")).await?;
        assert_eq!(get_user_usage(&pool, 7).await?.photo_requests, 1);
        assert_eq!(get_thread_id(&pool, 7).await?.as_deref(), Some("thread_old"));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_or_update_keeps_chosen_language() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);

        add_or_update_user(&pool, 1, "Aida", Some("aida"), "kk", now).await?;
        update_user_language(&pool, 1, "ru").await?;
        add_or_update_user(&pool, 1, "Aida B.", None, "kk", now).await?;

        let user = get_user(&pool, 1).await?.expect("user exists");
        assert_eq!(user.full_name.as_deref(), Some("Aida B."));
        assert_eq!(user.username, None);
        assert_eq!(get_user_language(&pool, 1).await?, "ru");
        assert_eq!(get_user_count(&pool).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_user_defaults() -> Result<()> {
        let pool = setup_test_db().await?;

        assert_eq!(get_user_language(&pool, 404).await?, "kk");
        assert_eq!(get_user_usage(&pool, 404).await?, Usage::default());
        assert_eq!(get_thread_id(&pool, 404).await?, None);
        assert!(!is_user_premium(&pool, 404, at(2025, 1, 1)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_premium_lifecycle() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);
        add_or_update_user(&pool, 5, "Nurlan", None, "kk", now).await?;

        let until = grant_premium_access(&pool, 5, 30, now).await?.expect("user exists");
        assert_eq!(until, now + Duration::days(30));
        assert!(is_user_premium(&pool, 5, now).await?);
        assert!(!is_user_premium(&pool, 5, at(2025, 4, 1)).await?);
        assert_eq!(get_premium_user_count(&pool, now).await?, 1);

        assert!(revoke_premium_access(&pool, 5).await?);
        assert!(!is_user_premium(&pool, 5, now).await?);
        assert_eq!(grant_premium_access(&pool, 999, 30, now).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_premium_until() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);
        add_or_update_user(&pool, 5, "Nurlan", None, "kk", now).await?;

        let user = get_user(&pool, 5).await?.expect("user exists");
        assert_eq!(user.premium_until(now), None);

        grant_premium_access(&pool, 5, 10, now).await?;
        let user = get_user(&pool, 5).await?.expect("user exists");
        assert_eq!(user.premium_until(now), Some(now + Duration::days(10)));
        assert_eq!(user.premium_until(at(2025, 3, 20)), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_premium_period_out_of_range() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);
        add_or_update_user(&pool, 5, "Nurlan", None, "kk", now).await?;

        assert!(grant_premium_access(&pool, 5, 100_000_000, now).await.is_err());
        assert!(grant_premium_access(&pool, 5, i64::MAX, now).await.is_err());
        // Nothing was written
        assert!(!is_user_premium(&pool, 5, now).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_premium_reads_isoformat_dates() -> Result<()> {
        let pool = setup_test_db().await?;
        sqlx::query(
            "INSERT INTO users (user_id, is_premium, subscription_end_date, created_at)
             VALUES (9, 1, '2025-06-01T10:30:00.123456', '2025-01-01T00:00:00')",
        )
        .execute(&pool)
        .await?;

        assert!(is_user_premium(&pool, 9, at(2025, 5, 31)).await?);
        assert!(!is_user_premium(&pool, 9, at(2025, 6, 2)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_usage_counters() -> Result<()> {
        let pool = setup_test_db().await?;
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        add_or_update_user(&pool, 3, "Dana", None, "ru", at(2025, 3, 1)).await?;

        reset_user_limits(&pool, 3, today).await?;
        increment_request_count(&pool, 3, RequestKind::Text).await?;
        increment_request_count(&pool, 3, RequestKind::Text).await?;
        increment_request_count(&pool, 3, RequestKind::Photo).await?;

        let usage = get_user_usage(&pool, 3).await?;
        assert_eq!(usage.text_requests, 2);
        assert_eq!(usage.photo_requests, 1);
        assert_eq!(usage.last_request_date, Some(today));
        Ok(())
    }

    #[tokio::test]
    async fn test_thread_id_set_and_clear() -> Result<()> {
        let pool = setup_test_db().await?;
        add_or_update_user(&pool, 4, "Arman", None, "kk", at(2025, 3, 1)).await?;

        set_thread_id(&pool, 4, Some("thread_abc")).await?;
        assert_eq!(get_thread_id(&pool, 4).await?.as_deref(), Some("thread_abc"));

        set_thread_id(&pool, 4, None).await?;
        assert_eq!(get_thread_id(&pool, 4).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_dislike_on_photo_answer_flags_the_product() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);
        save_answer(&pool, 10, 80, 10, "Желатин E441, қант", "Күмәнді", RequestKind::Photo, now).await?;
        save_answer(&pool, 10, 81, 10, "Haribo?", "Not halal", RequestKind::Text, now).await?;

        assert!(apply_vote(&pool, 10, 80, 10, Vote::Dislike, now).await?);
        // Likes and text answers never flag anything
        assert!(!apply_vote(&pool, 10, 80, 11, Vote::Like, now).await?);
        assert!(!apply_vote(&pool, 10, 81, 10, Vote::Dislike, now).await?);

        let products = recent_suspicious_products(&pool, 5).await?;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].description, "Желатин E441, қант");
        assert_eq!(products[0].user_id, 10);

        let rows = list_feedback(&pool).await?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].question, "Желатин E441, қант");
        assert_eq!(rows[0].bot_answer, "Күмәнді");
        assert_eq!(rows[0].vote, "dislike");
        Ok(())
    }

    #[tokio::test]
    async fn test_vote_on_forgotten_answer() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);

        assert!(!apply_vote(&pool, 10, 999, 10, Vote::Dislike, now).await?);
        assert!(recent_suspicious_products(&pool, 5).await?.is_empty());
        assert_eq!(get_feedback_stats(&pool).await?.dislikes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_feedback_and_answers() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);

        save_answer(&pool, 10, 77, 10, "E120?", "Haram: carmine", RequestKind::Text, now).await?;
        let answer = find_answer(&pool, 10, 77).await?.expect("answer stored");
        assert_eq!(answer.answer, "Haram: carmine");
        assert_eq!(answer.source, "text");
        assert!(find_answer(&pool, 10, 78).await?.is_none());

        record_feedback(&pool, 10, &answer.question, &answer.answer, Vote::Like, now).await?;
        record_feedback(&pool, 11, "q", "a", Vote::Dislike, now).await?;
        record_feedback(&pool, 12, "q", "a", Vote::Dislike, now).await?;

        let stats = get_feedback_stats(&pool).await?;
        assert_eq!(stats, FeedbackStats { total: 3, likes: 1, dislikes: 2 });
        assert_eq!(list_feedback(&pool).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_feedback_stats() -> Result<()> {
        let pool = setup_test_db().await?;
        assert_eq!(get_feedback_stats(&pool).await?, FeedbackStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_suspicious_products_keeps_latest() -> Result<()> {
        let pool = setup_test_db().await?;
        let now = at(2025, 3, 1);

        for i in 0..7 {
            record_suspicious_product(&pool, i, &format!("product {i}"), now).await?;
        }

        let recent = recent_suspicious_products(&pool, 5).await?;
        let descriptions: Vec<_> = recent.iter().map(|p| p.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["product 2", "product 3", "product 4", "product 5", "product 6"]
        );
        Ok(())
    }
}

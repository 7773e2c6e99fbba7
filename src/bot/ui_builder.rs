//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::assistant::AssistantError;
use crate::db::{FeedbackStats, SuspiciousProduct, Vote};
use crate::establishments::{format_distance, Nearby};
use crate::localization::{t_args_lang, t_lang};
use crate::ocr_errors::OcrError;
use crate::usage::LimitDecision;

/// Inline button actions, as carried in callback data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// `from_start` is set when the choice comes from the `/start` prompt
    SetLanguage { language: &'static str, from_start: bool },
    AskText,
    AskPhoto,
    AdminPanel,
    FeedbackStats,
    SuspiciousList,
    BroadcastStart,
    UpdateDb,
    ExportFeedback,
    Vote(Vote),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "set_lang_kk" => CallbackAction::SetLanguage { language: "kk", from_start: false },
            "set_lang_ru" => CallbackAction::SetLanguage { language: "ru", from_start: false },
            "set_lang_kk_start" => CallbackAction::SetLanguage { language: "kk", from_start: true },
            "set_lang_ru_start" => CallbackAction::SetLanguage { language: "ru", from_start: true },
            "ask_text" => CallbackAction::AskText,
            "ask_photo" => CallbackAction::AskPhoto,
            "admin_panel" => CallbackAction::AdminPanel,
            "feedback_stats" => CallbackAction::FeedbackStats,
            "suspicious_list" => CallbackAction::SuspiciousList,
            "broadcast_start" => CallbackAction::BroadcastStart,
            "update_db" => CallbackAction::UpdateDb,
            "export_feedback" => CallbackAction::ExportFeedback,
            other => CallbackAction::Vote(Vote::from_callback(other)?),
        };
        Some(action)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            CallbackAction::AdminPanel
                | CallbackAction::FeedbackStats
                | CallbackAction::SuspiciousList
                | CallbackAction::BroadcastStart
                | CallbackAction::UpdateDb
                | CallbackAction::ExportFeedback
        )
    }
}

/// Language picker; `from_start` marks the `/start` flow
pub fn create_language_keyboard(from_start: bool) -> InlineKeyboardMarkup {
    let suffix = if from_start { "_start" } else { "" };
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("🇰🇿 Қазақша", format!("set_lang_kk{suffix}"))],
        vec![InlineKeyboardButton::callback("🇷🇺 Русский", format!("set_lang_ru{suffix}"))],
    ])
}

pub fn create_main_menu_keyboard(is_admin: bool, language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![InlineKeyboardButton::callback(t_lang("button-ask-text", language_code), "ask_text")],
        vec![InlineKeyboardButton::callback(t_lang("button-ask-photo", language_code), "ask_photo")],
    ];
    if is_admin {
        rows.push(vec![InlineKeyboardButton::callback(
            t_lang("button-admin-panel", language_code),
            "admin_panel",
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn create_admin_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    let button = |key: &str, data: &'static str| vec![InlineKeyboardButton::callback(t_lang(key, language_code), data)];
    InlineKeyboardMarkup::new(vec![
        button("button-stats", "feedback_stats"),
        button("button-suspicious", "suspicious_list"),
        button("button-broadcast", "broadcast_start"),
        button("button-update-db", "update_db"),
        button("button-export-feedback", "export_feedback"),
    ])
}

pub fn create_feedback_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("👍", Vote::Like.as_str()),
        InlineKeyboardButton::callback("👎", Vote::Dislike.as_str()),
    ]])
}

/// Telegram rejects message texts longer than this many characters
pub const TELEGRAM_TEXT_LIMIT: usize = 4096;

/// Split `text` into pieces of at most `limit` characters, breaking after
/// the last newline of each piece when it has one.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let cut = rest.char_indices().nth(limit).map_or(rest.len(), |(i, _)| i);
        let split_at = match rest[..cut].rfind('\n') {
            Some(i) if i > 0 => i + 1,
            _ => cut,
        };
        let piece = rest[..split_at].trim_end();
        if !piece.is_empty() {
            parts.push(piece.to_string());
        }
        rest = &rest[split_at..];
    }

    let piece = rest.trim_end();
    if !piece.is_empty() || parts.is_empty() {
        parts.push(piece.to_string());
    }
    parts
}

/// Reply for a refused request, `None` when the request may proceed
pub fn limit_message(decision: LimitDecision, photo: bool, language_code: Option<&str>) -> Option<String> {
    let LimitDecision::Exceeded { limit } = decision else {
        return None;
    };
    let key = if photo { "limit-reached-photo" } else { "limit-reached-text" };
    Some(format!(
        "{}\n{}",
        t_args_lang(key, &[("limit", &limit.to_string())], language_code),
        t_lang("limit-reset-info", language_code)
    ))
}

pub fn assistant_error_message(error: &AssistantError, language_code: Option<&str>) -> String {
    match error {
        AssistantError::NotConfigured => t_lang("error-not-configured", language_code),
        AssistantError::RateLimited => t_lang("error-rate-limited", language_code),
        AssistantError::RunFailed { status, .. } => {
            t_args_lang("error-run-failed", &[("status", status)], language_code)
        }
        AssistantError::Timeout { .. } => t_lang("error-timeout", language_code),
        AssistantError::Api { .. } | AssistantError::Transport(_) => {
            t_lang("error-assistant-unavailable", language_code)
        }
        AssistantError::EmptyResponse => t_lang("error-unexpected", language_code),
    }
}

pub fn ocr_error_message(error: &OcrError, language_code: Option<&str>) -> String {
    match error {
        OcrError::UnsupportedFormat => t_lang("error-unsupported-format", language_code),
        OcrError::TooLarge { .. } => t_lang("error-file-too-large", language_code),
        _ => t_lang("error-photo", language_code),
    }
}

pub fn format_stats(users: i64, premium: i64, feedback: FeedbackStats, language_code: Option<&str>) -> String {
    t_args_lang(
        "stats",
        &[
            ("users", &users.to_string()),
            ("premium", &premium.to_string()),
            ("feedback", &feedback.total.to_string()),
            ("likes", &feedback.likes.to_string()),
            ("dislikes", &feedback.dislikes.to_string()),
        ],
        language_code,
    )
}

pub fn format_suspicious_list(products: &[SuspiciousProduct], language_code: Option<&str>) -> String {
    if products.is_empty() {
        return t_lang("suspicious-empty", language_code);
    }

    let mut text = t_args_lang("suspicious-title", &[("count", &products.len().to_string())], language_code);
    for product in products {
        text.push_str("\n\n");
        text.push_str(&t_args_lang(
            "suspicious-entry",
            &[
                ("time", &product.created_at),
                ("user", &product.user_id.to_string()),
                ("description", &product.description),
            ],
            language_code,
        ));
    }
    text
}

/// List of nearby establishments, one block each
pub fn format_establishments(nearby: &[Nearby<'_>], language_code: Option<&str>) -> String {
    if nearby.is_empty() {
        return t_lang("location-none", language_code);
    }

    let unknown = t_lang("location-unknown", language_code);
    let meters = t_lang("unit-meters", language_code);
    let kilometers = t_lang("unit-kilometers", language_code);

    let mut text = t_args_lang("location-title", &[("count", &nearby.len().to_string())], language_code);
    for entry in nearby {
        let org = entry.organization;
        let title = org
            .title
            .clone()
            .unwrap_or_else(|| t_lang("location-untitled", language_code));
        let address = org
            .address()
            .map(str::to_string)
            .unwrap_or_else(|| t_lang("location-no-address", language_code));

        let mut lines = vec![
            format!("🏢 {title}"),
            t_args_lang("location-category", &[("category", org.category_title().unwrap_or(&unknown))], language_code),
            t_args_lang("location-address", &[("address", &address)], language_code),
            t_args_lang(
                "location-distance",
                &[("distance", &format_distance(entry.distance_km, &meters, &kilometers))],
                language_code,
            ),
            t_args_lang(
                "location-certificate",
                &[("date", org.sert_date.as_deref().unwrap_or(&unknown))],
                language_code,
            ),
        ];
        if let Some(link) = org.link() {
            lines.push(t_args_lang("location-open-map", &[("link", link)], language_code));
        }

        text.push_str("\n\n");
        text.push_str(&lines.join("\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_parsing() {
        assert_eq!(
            CallbackAction::parse("set_lang_ru_start"),
            Some(CallbackAction::SetLanguage { language: "ru", from_start: true })
        );
        assert_eq!(CallbackAction::parse("dislike"), Some(CallbackAction::Vote(Vote::Dislike)));
        assert_eq!(CallbackAction::parse("update_db"), Some(CallbackAction::UpdateDb));
        assert_eq!(CallbackAction::parse("edit_3"), None);
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("Halal ✅", TELEGRAM_TEXT_LIMIT), vec!["Halal ✅"]);
    }

    #[test]
    fn test_split_long_message_on_lines() {
        let text = "E120 - haram\n".repeat(400);
        let parts = split_message(&text, TELEGRAM_TEXT_LIMIT);

        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.chars().count() <= TELEGRAM_TEXT_LIMIT));
        assert!(parts.iter().all(|p| p.starts_with("E120")));
        assert_eq!(parts.join("\n"), text.trim_end());
    }

    #[test]
    fn test_split_without_newlines_keeps_char_boundaries() {
        let text = "ә".repeat(4100);
        let parts = split_message(&text, TELEGRAM_TEXT_LIMIT);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 4096);
        assert_eq!(parts[1].chars().count(), 4);
    }

    #[test]
    fn test_admin_actions() {
        assert!(CallbackAction::ExportFeedback.requires_admin());
        assert!(CallbackAction::BroadcastStart.requires_admin());
        assert!(!CallbackAction::AskPhoto.requires_admin());
        assert!(!CallbackAction::Vote(Vote::Like).requires_admin());
    }

    #[test]
    fn test_main_menu_admin_button() {
        assert_eq!(create_main_menu_keyboard(false, Some("kk")).inline_keyboard.len(), 2);
        assert_eq!(create_main_menu_keyboard(true, Some("kk")).inline_keyboard.len(), 3);
    }

    #[test]
    fn test_language_keyboard_callbacks_parse() {
        for from_start in [true, false] {
            let keyboard = create_language_keyboard(from_start);
            for row in &keyboard.inline_keyboard {
                let data = match &row[0].kind {
                    teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => data.clone(),
                    other => panic!("unexpected button kind {other:?}"),
                };
                match CallbackAction::parse(&data) {
                    Some(CallbackAction::SetLanguage { from_start: parsed, .. }) => assert_eq!(parsed, from_start),
                    other => panic!("unexpected action {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_limit_message() {
        assert_eq!(limit_message(LimitDecision::Unlimited, false, Some("kk")), None);
        assert_eq!(limit_message(LimitDecision::Allowed { used: 1, limit: 3 }, true, Some("kk")), None);

        let text = limit_message(LimitDecision::Exceeded { limit: 3 }, true, Some("ru")).unwrap();
        assert!(text.contains("(3)"));
        assert!(text.contains("/premium"));
    }

    #[test]
    fn test_run_failed_shows_status() {
        let error = AssistantError::RunFailed {
            status: "expired".into(),
            message: "run expired".into(),
        };
        assert!(assistant_error_message(&error, Some("kk")).contains("expired"));
    }

    #[test]
    fn test_suspicious_list_formatting() {
        assert_eq!(format_suspicious_list(&[], Some("kk")), t_lang("suspicious-empty", Some("kk")));

        let products = vec![SuspiciousProduct {
            id: 1,
            user_id: 42,
            description: "Marshmallow, gelatin".into(),
            created_at: "2025-03-01T10:00:00".into(),
        }];
        let text = format_suspicious_list(&products, Some("ru"));
        assert!(text.contains("42"));
        assert!(text.contains("Marshmallow, gelatin"));
    }
}

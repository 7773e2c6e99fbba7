use halal_assistant::bot::ui_builder::{
    assistant_error_message, create_admin_keyboard, create_feedback_keyboard, format_establishments, format_stats,
    ocr_error_message, CallbackAction,
};
use halal_assistant::assistant::AssistantError;
use halal_assistant::config::{Config, OcrBackendKind};
use halal_assistant::db::FeedbackStats;
use halal_assistant::establishments::{nearest, parse_establishments};
use halal_assistant::localization::{init_localization, t_lang};
use halal_assistant::ocr_errors::OcrError;
use teloxide::types::InlineKeyboardButtonKind;

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_localization() {
        let _ = init_localization();
    }

    fn callback_data(kind: &InlineKeyboardButtonKind) -> &str {
        match kind {
            InlineKeyboardButtonKind::CallbackData(data) => data.as_str(),
            other => panic!("unexpected button kind {other:?}"),
        }
    }

    /// Every admin button maps to an admin-only action
    #[test]
    fn test_admin_keyboard_actions() {
        setup_localization();
        let keyboard = create_admin_keyboard(Some("kk"));
        assert_eq!(keyboard.inline_keyboard.len(), 5);

        for row in &keyboard.inline_keyboard {
            let action = CallbackAction::parse(callback_data(&row[0].kind)).unwrap();
            assert!(action.requires_admin(), "{action:?} should be admin only");
        }
    }

    #[test]
    fn test_feedback_keyboard() {
        let keyboard = create_feedback_keyboard();
        let data: Vec<&str> = keyboard.inline_keyboard[0]
            .iter()
            .map(|b| callback_data(&b.kind))
            .collect();
        assert_eq!(data, vec!["like", "dislike"]);
    }

    #[test]
    fn test_stats_message() {
        setup_localization();
        let text = format_stats(
            120,
            7,
            FeedbackStats {
                total: 30,
                likes: 25,
                dislikes: 5,
            },
            Some("ru"),
        );
        for value in ["120", "7", "30", "25", "5"] {
            assert!(text.contains(value), "missing {value} in {text}");
        }
    }

    #[test]
    fn test_error_messages_are_localized() {
        setup_localization();
        assert_eq!(
            assistant_error_message(&AssistantError::NotConfigured, Some("ru")),
            t_lang("error-not-configured", Some("ru"))
        );
        assert_eq!(
            assistant_error_message(&AssistantError::Timeout { polls: 90 }, Some("kk")),
            t_lang("error-timeout", Some("kk"))
        );
        assert_eq!(
            ocr_error_message(&OcrError::TooLarge { size: 2, limit: 1 }, Some("kk")),
            t_lang("error-file-too-large", Some("kk"))
        );
        assert_eq!(
            ocr_error_message(&OcrError::CircuitOpen, Some("kk")),
            t_lang("error-photo", Some("kk"))
        );
    }

    #[test]
    fn test_establishments_message() {
        setup_localization();
        let orgs = parse_establishments(
            r#"{"data":{"organizations":[
                {"title":"Halal Burger","category":{"title":"Фастфуд"},
                 "maplink":[{"link":"https://2gis.kz/almaty?m=76.946,43.2385","address":"Абай 10"}],
                 "sert_date":"31.12.2026"},
                {"maplink":[{"link":"https://2gis.kz/almaty?m=76.96,43.25"}]}
            ]}}"#,
        )
        .unwrap();
        let found = nearest(&orgs, 43.238, 76.945, 100.0, 5);
        let text = format_establishments(&found, Some("kk"));

        assert!(text.contains("Halal Burger"));
        assert!(text.contains("Фастфуд"));
        assert!(text.contains("Абай 10"));
        assert!(text.contains("31.12.2026"));
        assert!(text.contains(" м"), "short distances are in metres: {text}");
        assert!(text.contains(&t_lang("location-untitled", Some("kk"))));
        assert!(text.contains(&t_lang("location-no-address", Some("kk"))));

        assert_eq!(format_establishments(&[], Some("ru")), t_lang("location-none", Some("ru")));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = Config::from_lookup(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".into()),
            "ADMIN_IDS" => Some("1, 2,3".into()),
            "OCR_BACKEND" => Some("tesseract".into()),
            "FREE_PHOTO_LIMIT" => Some("5".into()),
            "WEBHOOK_URL" => Some("https://bot.example.kz".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.admin_ids, vec![1, 2, 3]);
        assert!(config.is_admin(2));
        assert!(!config.is_admin(929307596));
        assert_eq!(config.vision.backend, OcrBackendKind::Tesseract);
        assert_eq!(config.limits.photo, 5);
        assert_eq!(config.limits.text, 10);
        assert!(config.webhook_enabled());
        assert!(config.assistant.assistant_id.is_none());
    }
}

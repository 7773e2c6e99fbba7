use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use unic_langid::LanguageIdentifier;
use anyhow::{anyhow, Result};

/// Language used when the user's language is unknown or unsupported.
pub const DEFAULT_LANGUAGE: &str = "kk";

/// Languages with a bundled translation resource.
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["kk", "ru"];

const KK_RESOURCE: &str = include_str!("../locales/kk/main.ftl");
const RU_RESOURCE: &str = include_str!("../locales/ru/main.ftl");

const WAITING_KEYS: [&str; 5] = ["waiting-1", "waiting-2", "waiting-3", "waiting-4", "waiting-5"];

/// Localization manager for the bot's Kazakh and Russian texts
pub struct LocalizationManager {
    bundles: HashMap<String, Arc<FluentBundle<FluentResource>>>,
}

impl LocalizationManager {
    /// Create a new localization manager
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();

        for (lang, source) in [("kk", KK_RESOURCE), ("ru", RU_RESOURCE)] {
            let locale: LanguageIdentifier = lang.parse()?;
            let bundle = Self::create_bundle(&locale, source)?;
            bundles.insert(lang.to_string(), Arc::new(bundle));
        }

        Ok(Self { bundles })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(locale: &LanguageIdentifier, source: &str) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Telegram renders the bidi isolation marks as visible garbage
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid resource for {locale}: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate messages for {locale}: {errors:?}"))?;

        Ok(bundle)
    }

    /// Get a localized message in a specific language, falling back to Kazakh
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let primary = self.bundles.get(detect_language(Some(language)));
        let fallback = self.bundles.get(DEFAULT_LANGUAGE);

        let Some((bundle, msg)) = [primary, fallback]
            .into_iter()
            .flatten()
            .find_map(|bundle| bundle.get_message(key).map(|msg| (bundle, msg)))
        else {
            return format!("Missing translation: {}", key);
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {}", key),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (k, v) in args {
                fluent_args.set(*k, *v);
            }
            fluent_args
        });

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, fluent_args.as_ref(), &mut errors)
            .into_owned()
    }
}

static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager. Safe to call more than once.
pub fn init_localization() -> Result<()> {
    if LOCALIZATION_MANAGER.get().is_none() {
        let manager = LocalizationManager::new()?;
        let _ = LOCALIZATION_MANAGER.set(manager);
    }
    Ok(())
}

fn manager() -> &'static LocalizationManager {
    LOCALIZATION_MANAGER.get_or_init(|| {
        LocalizationManager::new().unwrap_or_else(|e| panic!("bundled translations are invalid: {e}"))
    })
}

/// Map a Telegram language code onto a supported language.
pub fn detect_language(language_code: Option<&str>) -> &'static str {
    match language_code
        .map(|code| code.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase())
        .as_deref()
    {
        Some("ru") => "ru",
        _ => DEFAULT_LANGUAGE,
    }
}

/// Localized message in the given language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    manager().get_message_in_language(key, detect_language(language_code), None)
}

/// Localized message with arguments in the given language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
    manager().get_message_in_language(key, detect_language(language_code), Some(&args_map))
}

/// Instruction prepended to assistant queries so it answers in the user's language.
pub fn language_instruction(language_code: Option<&str>) -> String {
    format!("{} ", t_lang("language-instruction", language_code))
}

/// One of the waiting phrases, picked at random.
pub fn waiting_message(language_code: Option<&str>) -> String {
    let key = WAITING_KEYS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(WAITING_KEYS[0]);
    t_lang(key, language_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kazakh_key_has_a_russian_translation() {
        let ids = |source: &str| {
            source
                .lines()
                .filter(|line| line.chars().next().is_some_and(|c| c.is_ascii_lowercase()))
                .filter_map(|line| line.split_once(" ="))
                .map(|(id, _)| id.trim().to_string())
                .collect::<std::collections::BTreeSet<_>>()
        };

        assert!(!ids(KK_RESOURCE).is_empty());
        assert_eq!(ids(KK_RESOURCE), ids(RU_RESOURCE));
    }

    #[test]
    fn waiting_message_is_one_of_the_phrases() {
        let phrases: Vec<String> = WAITING_KEYS.iter().map(|k| t_lang(k, Some("kk"))).collect();
        for _ in 0..10 {
            assert!(phrases.contains(&waiting_message(Some("kk"))));
        }
    }
}

//! Language registry.
//!
//! Built once from [`LanguagesConfig`] at startup and immutable afterwards.
//! The sentinel code `auto` is always valid as a source language; it never
//! appears in the table itself.

use crate::config::LanguagesConfig;
use serde::Serialize;

/// Sentinel source-language code meaning "detect".
pub const AUTO: &str = "auto";

/// One enabled or disabled language known to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct Language {
    pub code: String,
    pub name: String,
    pub name_en: String,
    pub is_enabled: bool,
    #[serde(skip)]
    pub sort_order: i32,
}

/// Read-only view over the configured language table.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<Language>,
    default_source: String,
    default_target: String,
}

impl LanguageRegistry {
    /// Build the registry, sorted by configured rank.
    pub fn from_config(config: &LanguagesConfig) -> Self {
        let mut languages: Vec<Language> = config
            .languages
            .iter()
            .map(|spec| Language {
                code: spec.code.clone(),
                name: spec.name.clone(),
                name_en: spec.name_en.clone(),
                is_enabled: spec.is_enabled,
                sort_order: spec.sort_order,
            })
            .collect();
        languages.sort_by_key(|l| l.sort_order);

        Self {
            languages,
            default_source: config.defaults.source_language.clone(),
            default_target: config.defaults.target_language.clone(),
        }
    }

    /// All enabled languages in display order.
    pub fn enabled(&self) -> impl Iterator<Item = &Language> {
        self.languages.iter().filter(|l| l.is_enabled)
    }

    /// Look up a language by exact code.
    pub fn get(&self, code: &str) -> Option<&Language> {
        self.languages.iter().find(|l| l.code == code)
    }

    /// `true` for `auto` and for every enabled language code.
    pub fn is_valid_code(&self, code: &str) -> bool {
        if code == AUTO {
            return true;
        }
        self.get(code).is_some_and(|l| l.is_enabled)
    }

    /// Prompt-facing name for a code; falls back to the code itself for
    /// languages the table does not name.
    pub fn prompt_name<'a>(&'a self, code: &'a str) -> &'a str {
        match self.get(code) {
            Some(lang) => &lang.name,
            None => code,
        }
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    pub fn default_target(&self) -> &str {
        &self.default_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LanguageDefaults, LanguageSpec};

    fn registry_with(specs: Vec<LanguageSpec>) -> LanguageRegistry {
        LanguageRegistry::from_config(&LanguagesConfig {
            languages: specs,
            defaults: LanguageDefaults::default(),
        })
    }

    fn spec(code: &str, enabled: bool, sort_order: i32) -> LanguageSpec {
        LanguageSpec {
            code: code.to_owned(),
            name: format!("{code}-name"),
            name_en: code.to_owned(),
            is_enabled: enabled,
            sort_order,
        }
    }

    #[test]
    fn auto_is_always_valid() {
        let reg = registry_with(vec![]);
        assert!(reg.is_valid_code("auto"));
    }

    #[test]
    fn only_enabled_codes_validate() {
        let reg = registry_with(vec![spec("en", true, 1), spec("fr", false, 2)]);
        assert!(reg.is_valid_code("en"));
        assert!(!reg.is_valid_code("fr"));
        assert!(!reg.is_valid_code("xx"));
    }

    #[test]
    fn enabled_respects_sort_order() {
        let reg = registry_with(vec![spec("b", true, 2), spec("a", true, 1)]);
        let codes: Vec<&str> = reg.enabled().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, ["a", "b"]);
    }

    #[test]
    fn prompt_name_falls_back_to_code() {
        let reg = registry_with(vec![spec("en", true, 1)]);
        assert_eq!(reg.prompt_name("en"), "en-name");
        assert_eq!(reg.prompt_name("pt"), "pt");
    }

    #[test]
    fn default_registry_has_eight_languages() {
        let reg = LanguageRegistry::from_config(&LanguagesConfig::default());
        assert_eq!(reg.enabled().count(), 8);
        assert_eq!(reg.default_source(), "auto");
        assert_eq!(reg.default_target(), "zh-TW");
        assert_eq!(reg.prompt_name("zh-TW"), "繁體中文");
    }
}

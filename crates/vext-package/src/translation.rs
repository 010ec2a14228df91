//! Localized message catalogs under `_locales/<locale>/messages.json`.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    sync::OnceLock,
};

use regex::{Captures, Regex};
use serde::Deserialize;

use crate::PackageError;

pub const LOCALES_DIR: &str = "_locales";
pub const MESSAGES_FILE_NAME: &str = "messages.json";

#[derive(Debug, Deserialize)]
struct RawMessage {
    message: String,
    #[serde(default)]
    placeholders: BTreeMap<String, RawPlaceholder>,
}

#[derive(Debug, Deserialize)]
struct RawPlaceholder {
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `TranslationMessage` used across vext components.
pub struct TranslationMessage {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Resolved messages per locale, placeholders already substituted.
pub struct Translations {
    locales: BTreeMap<String, BTreeMap<String, String>>,
}

impl Translations {
    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.locales.keys().map(String::as_str)
    }

    pub fn message(&self, locale: &str, key: &str) -> Option<&str> {
        self.locales
            .get(locale)
            .and_then(|messages| messages.get(key))
            .map(String::as_str)
    }

    pub fn messages(&self, locale: &str) -> Vec<TranslationMessage> {
        self.locales
            .get(locale)
            .map(|messages| {
                messages
                    .iter()
                    .map(|(key, message)| TranslationMessage {
                        key: key.clone(),
                        message: message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\$\w+\$").expect("valid placeholder regex"))
}

/// Checks that the `$word$` tokens in `message` and the declared substitution
/// keys match one-to-one (case-insensitively), then substitutes every token.
pub fn validate_placeholders(
    message: &str,
    placeholders: &BTreeMap<String, String>,
) -> Result<String, String> {
    let substitutions = placeholders
        .iter()
        .map(|(key, content)| (key.to_lowercase(), content.as_str()))
        .collect::<BTreeMap<_, _>>();
    let words = placeholder_pattern()
        .find_iter(message)
        .map(|token| token.as_str().trim_matches('$').to_lowercase())
        .collect::<BTreeSet<_>>();

    if let Some(word) = words.iter().find(|word| !substitutions.contains_key(*word)) {
        return Err(format!("substitution mismatch: '${word}$' has no placeholder"));
    }
    if let Some(key) = substitutions.keys().find(|key| !words.contains(*key)) {
        return Err(format!(
            "substitution mismatch: placeholder '{key}' is not used in the message"
        ));
    }

    Ok(placeholder_pattern()
        .replace_all(message, |captures: &Captures<'_>| {
            let word = captures[0].trim_matches('$').to_lowercase();
            substitutions
                .get(&word)
                .map(|content| content.to_string())
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned())
}

/// Loads and validates every supported locale's catalog.
///
/// Packages without a `_locales` directory, or declaring no locales, have no
/// catalogs to check.
pub fn load_translations(
    root: &Path,
    supported_locales: &[String],
) -> Result<Translations, PackageError> {
    let mut translations = Translations::default();
    if supported_locales.is_empty() || !root.join(LOCALES_DIR).is_dir() {
        return Ok(translations);
    }

    for locale in supported_locales {
        let path = root.join(LOCALES_DIR).join(locale).join(MESSAGES_FILE_NAME);
        let translation_error = |detail: String| PackageError::Translation {
            locale: locale.clone(),
            detail,
        };
        let raw = fs::read_to_string(&path)
            .map_err(|error| translation_error(format!("failed to read {}: {error}", path.display())))?;
        let document = serde_json::from_str::<serde_json::Value>(&raw)
            .map_err(|error| translation_error(format!("json parse error: {error}")))?;
        let entries = match document {
            serde_json::Value::Object(entries) if !entries.is_empty() => entries,
            _ => {
                return Err(translation_error(
                    "bad format: not an object or is empty".to_string(),
                ))
            }
        };

        let mut messages = BTreeMap::new();
        for (key, value) in entries {
            let raw_message = serde_json::from_value::<RawMessage>(value)
                .map_err(|error| translation_error(format!("bad format in '{key}': {error}")))?;
            let placeholders = raw_message
                .placeholders
                .into_iter()
                .map(|(name, placeholder)| (name, placeholder.content))
                .collect::<BTreeMap<_, _>>();
            let resolved = validate_placeholders(&raw_message.message, &placeholders)
                .map_err(|detail| translation_error(format!("message '{key}': {detail}")))?;
            messages.insert(key, resolved);
        }
        tracing::debug!(
            locale = %locale,
            messages = messages.len(),
            "loaded extension translations"
        );
        translations.locales.insert(locale.clone(), messages);
    }
    Ok(translations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn unit_validate_placeholders_substitutes_case_insensitively() {
        let rendered = validate_placeholders(
            "Hello $User$, welcome to $SITE$",
            &placeholders(&[("user", "$1"), ("site", "$2")]),
        )
        .expect("valid");
        assert_eq!(rendered, "Hello $1, welcome to $2");
    }

    #[test]
    fn unit_validate_placeholders_replaces_every_occurrence() {
        let rendered =
            validate_placeholders("$x$ and $X$", &placeholders(&[("x", "Value")])).expect("valid");
        assert_eq!(rendered, "Value and Value");
    }

    #[test]
    fn regression_validate_placeholders_rejects_unmatched_token() {
        let error = validate_placeholders("Hi $name$", &placeholders(&[])).expect_err("mismatch");
        assert!(error.contains("$name$"));
    }

    #[test]
    fn regression_validate_placeholders_rejects_unused_substitution() {
        let error = validate_placeholders("plain", &placeholders(&[("extra", "x")]))
            .expect_err("mismatch");
        assert!(error.contains("extra"));
    }

    #[test]
    fn unit_validate_placeholders_leaves_plain_messages_alone() {
        assert_eq!(
            validate_placeholders("no tokens", &placeholders(&[])).expect("valid"),
            "no tokens"
        );
    }
}

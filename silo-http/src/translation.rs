//! Translation-key lookup for validation messages (spec §4.9).
//!
//! Grounded on `application/translation.py`'s `I18n`: a folder of
//! `<language>.json` files, each a nested key tree, loaded once at startup;
//! `get_translator(language)` hands back a lookup closure over dotted keys
//! with simple plural-count selection (`zero`/`one`/`few`/`many`). Re-typed
//! here as a struct rather than a closure factory, since Rust closures that
//! borrow `self` don't compose as cleanly as the Python nested function did.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value as Json;
use silo_core::AppError;

/// All loaded languages, keyed by file stem (`en`, `de`, ...).
#[derive(Debug, Clone, Default)]
pub struct Translations {
    languages: HashMap<String, Json>,
}

impl Translations {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file directly inside `folder` as one language,
    /// keyed by its file stem.
    pub async fn load_dir(folder: impl AsRef<Path>) -> Result<Self, AppError> {
        let folder = folder.as_ref();
        let mut languages = HashMap::new();
        let mut entries = tokio::fs::read_dir(folder)
            .await
            .map_err(|err| AppError::ConfigurationError(format!("reading i18n folder: {err}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| AppError::ConfigurationError(format!("reading i18n folder: {err}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| AppError::ConfigurationError(format!("reading {path:?}: {err}")))?;
            let value: Json = serde_json::from_str(&content)
                .map_err(|err| AppError::ConfigurationError(format!("parsing {path:?}: {err}")))?;
            languages.insert(stem.to_string(), value);
        }
        Ok(Self { languages })
    }

    pub fn translator(&self, language: &str) -> Translator<'_> {
        Translator {
            tree: self.languages.get(language),
        }
    }
}

/// A resolved translator bound to one language.
pub struct Translator<'a> {
    tree: Option<&'a Json>,
}

impl<'a> Translator<'a> {
    /// Looks up a dotted key (`"errors.required"`), optionally selecting a
    /// plural branch by `count`: `0` → `zero`/`many`, `1` → `one`/`many`,
    /// `2..=4` → `few`/`many`, else `many`.
    pub fn translate(&self, key: &str, count: Option<i64>) -> Result<String, AppError> {
        let mut node = self.tree.ok_or_else(|| AppError::TranslationKeyMissing(key.to_string()))?;
        for segment in key.split('.') {
            node = node
                .get(segment)
                .ok_or_else(|| AppError::TranslationKeyMissing(key.to_string()))?;
        }
        if let Some(count) = count {
            let branch = match count {
                0 => "zero",
                1 => "one",
                2..=4 => "few",
                _ => "many",
            };
            let resolved = node
                .get(branch)
                .or_else(|| node.get("many"))
                .ok_or_else(|| AppError::TranslationKeyMissing(key.to_string()))?;
            return resolved
                .as_str()
                .map(|s| s.replace("{count}", &count.to_string()))
                .ok_or_else(|| AppError::TranslationKeyMissing(key.to_string()));
        }
        node.as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::TranslationKeyMissing(key.to_string()))
    }
}

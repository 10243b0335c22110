//! Per-user translate mode.
//!
//! ```text
//! Off --toggle--> AwaitingLanguage --select_language--> Active(lang) --toggle--> Off
//! ```
//!
//! What `toggle` does from `AwaitingLanguage` is configurable, see
//! [`AwaitingToggle`].

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

static LANGUAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\p{L}[\p{L} \-]{1,31}$").expect("language pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TranslateMode {
    #[default]
    Off,
    AwaitingLanguage,
    Active(String),
}

impl TranslateMode {
    pub fn is_off(&self) -> bool {
        matches!(self, Self::Off)
    }

    pub fn target_language(&self) -> Option<&str> {
        match self {
            Self::Active(lang) => Some(lang),
            _ => None,
        }
    }
}

/// Target of `toggle` while a language is being chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitingToggle {
    /// Abandon the selection and switch translate mode off.
    #[default]
    Off,
    /// Keep waiting for a language.
    Stay,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("translate mode is not waiting for a language (use /translate first)")]
    NotAwaitingLanguage,
    #[error("'{0}' does not look like a language name")]
    InvalidLanguage(String),
}

/// Keyed store of translate modes, one entry per user.
pub struct ModeState {
    modes: HashMap<i64, TranslateMode>,
    awaiting_toggle: AwaitingToggle,
}

impl ModeState {
    pub fn new(awaiting_toggle: AwaitingToggle) -> Self {
        Self {
            modes: HashMap::new(),
            awaiting_toggle,
        }
    }

    pub fn get(&self, user_id: i64) -> TranslateMode {
        self.modes.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, user_id: i64, mode: TranslateMode) {
        if mode.is_off() {
            self.modes.remove(&user_id);
        } else {
            self.modes.insert(user_id, mode);
        }
    }

    pub fn remove(&mut self, user_id: i64) -> Option<TranslateMode> {
        self.modes.remove(&user_id)
    }

    pub fn toggle(&mut self, user_id: i64) -> TranslateMode {
        let next = match self.get(user_id) {
            TranslateMode::Off => TranslateMode::AwaitingLanguage,
            TranslateMode::AwaitingLanguage => match self.awaiting_toggle {
                AwaitingToggle::Off => TranslateMode::Off,
                AwaitingToggle::Stay => TranslateMode::AwaitingLanguage,
            },
            TranslateMode::Active(_) => TranslateMode::Off,
        };
        self.set(user_id, next.clone());
        next
    }

    pub fn select_language(&mut self, user_id: i64, language: &str) -> Result<TranslateMode, ModeError> {
        if self.get(user_id) != TranslateMode::AwaitingLanguage {
            return Err(ModeError::NotAwaitingLanguage);
        }
        let language = language.trim();
        if !LANGUAGE_NAME.is_match(language) {
            return Err(ModeError::InvalidLanguage(language.to_string()));
        }
        let mode = TranslateMode::Active(language.to_lowercase());
        self.set(user_id, mode.clone());
        Ok(mode)
    }

    /// Rewrite `prompt` if the user has translate mode active.
    pub fn apply(&self, user_id: i64, prompt: &str, base_language: Option<&str>) -> Option<String> {
        self.get(user_id)
            .target_language()
            .map(|lang| wrap_prompt(lang, prompt, base_language))
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(AwaitingToggle::default())
    }
}

/// Bidirectional translation instruction.
pub fn wrap_prompt(language: &str, text: &str, base_language: Option<&str>) -> String {
    let base = match base_language {
        Some(code) => format!("the user's base language ({code})"),
        None => "the user's base language".to_string(),
    };
    format!(
        "translate the following to {language}; if it is already in {language}, translate it to {base} instead: {text}"
    )
}

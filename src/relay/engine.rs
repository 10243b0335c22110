//! Relay engine - the shared context every Telegram handler talks to.
//!
//! Owns the dispatcher (sessions, quota, model chains) and the translate
//! modes. Each piece of shared state sits behind its own lock, held only for
//! its read-modify-write and never across a backend call.

use tokio::sync::Mutex;
use tracing::info;

use crate::relay::dispatcher::{Dispatcher, Reply};
use crate::relay::envelope::{self, InboundUnit};
use crate::relay::translate::{ModeError, ModeState, TranslateMode};

/// What the transport should send back.
#[derive(Debug)]
pub enum Response {
    /// Backend result.
    Reply(Reply),
    /// Status or failure text produced by the relay itself.
    Notice(String),
}

impl Response {
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }
}

pub struct RelayEngine {
    dispatcher: Dispatcher,
    modes: Mutex<ModeState>,
}

impl RelayEngine {
    pub fn new(dispatcher: Dispatcher, modes: ModeState) -> Self {
        Self {
            dispatcher,
            modes: Mutex::new(modes),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one inbound unit end to end.
    pub async fn handle(&self, unit: InboundUnit) -> Response {
        let user_id = unit.user_id;

        // A plain message while choosing a language is the choice itself
        if unit.media.is_none()
            && let Some(ref text) = unit.text
            && self.translate_mode(user_id).await == TranslateMode::AwaitingLanguage
        {
            return Response::Notice(self.select_language(user_id, text).await);
        }

        let envelope = match envelope::classify(unit) {
            Ok(envelope) => envelope,
            Err(e) => {
                info!("Rejected unit from {}: {}", user_id, e);
                return Response::Notice(format!("Can't process this: {e}"));
            }
        };

        let wrapped = {
            let modes = self.modes.lock().await;
            modes.apply(user_id, envelope.prompt(), envelope.language_code())
        };
        let envelope = match wrapped {
            Some(prompt) => envelope.with_prompt(prompt),
            None => envelope,
        };

        match self.dispatcher.send(&envelope).await {
            Ok(reply) => Response::Reply(reply),
            Err(failure) => Response::Notice(failure.to_string()),
        }
    }

    /// Generate an image for `/image <prompt>`.
    pub async fn generate_image(&self, user_id: i64, prompt: &str) -> Response {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Response::notice("Usage: /image <description>");
        }
        match self.dispatcher.generate_image(prompt).await {
            Ok(reply) => Response::Reply(reply),
            Err(failure) => {
                info!("Image request from {user_id} failed: {failure}");
                Response::Notice(failure.to_string())
            }
        }
    }

    pub async fn reset(&self, user_id: i64) -> String {
        if self.dispatcher.reset_session(user_id).await {
            info!("🔄 Session reset by {user_id}");
        }
        "Context cleared.".to_string()
    }

    pub async fn translate_mode(&self, user_id: i64) -> TranslateMode {
        self.modes.lock().await.get(user_id)
    }

    pub async fn toggle_translate(&self, user_id: i64) -> String {
        let mode = self.modes.lock().await.toggle(user_id);
        info!("Translate mode for {user_id}: {mode:?}");
        match mode {
            TranslateMode::Off => "Translate mode off.".to_string(),
            TranslateMode::AwaitingLanguage => {
                "Translate mode: which language should I translate to? Reply with its name or use /lang <language>.".to_string()
            }
            TranslateMode::Active(lang) => format!("Translate mode on ({lang})."),
        }
    }

    pub async fn select_language(&self, user_id: i64, language: &str) -> String {
        let result = self.modes.lock().await.select_language(user_id, language);
        match result {
            Ok(TranslateMode::Active(lang)) => {
                info!("Translate mode for {user_id}: {lang}");
                format!("Translating to {lang}. Send /translate to stop.")
            }
            Ok(other) => format!("Translate mode: {other:?}"),
            Err(e @ ModeError::NotAwaitingLanguage) => e.to_string(),
            Err(e @ ModeError::InvalidLanguage(_)) => format!("{e}. Try again, e.g. \"english\"."),
        }
    }

    pub async fn usage_report(&self) -> String {
        let lines = self.dispatcher.usage().await;
        let mut report = String::from("Usage in the current 24h window:\n");
        for line in lines {
            let soft = if line.category.is_hard_limit() { "" } else { " (soft)" };
            report.push_str(&format!("{}: {}/{}{}\n", line.category, line.used, line.limit, soft));
        }
        report
    }
}

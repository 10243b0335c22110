//! Forwards relay log events to a Telegram chat.
//!
//! WARN and ERROR go out at once. INFO lines are batched and flushed every
//! few seconds or when the batch grows large.

use std::fmt::Write as _;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::relay::telegram::{MAX_MESSAGE_CHARS, split_message};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;

/// Only events from this crate are forwarded. Sending a log line makes
/// teloxide and reqwest log too, which would feed back into the channel.
const FORWARDED_TARGET: &str = "gemini_relay";

enum LogMessage {
    Urgent(String),
    Info(String),
}

/// Buffer of INFO lines waiting to be sent.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
}

impl Batch {
    /// Add a line; returns the combined text once the batch is full.
    fn push(&mut self, line: String) -> Option<String> {
        self.lines.push(line);
        (self.lines.len() >= MAX_BATCH).then(|| self.take()).flatten()
    }

    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let combined = self.lines.join("\n");
        self.lines.clear();
        Some(combined)
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
    min_level: Level,
}

impl TelegramLogLayer {
    /// Spawn the sender task. Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self::with_level(bot, chat_id, Level::INFO)
    }

    pub fn with_level(bot: Bot, chat_id: ChatId, min_level: Level) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut batch = Batch::default();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(LogMessage::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(LogMessage::Info(text)) => {
                            if let Some(full) = batch.push(text) {
                                send_log(&bot, chat_id, &full).await;
                            }
                        }
                        None => {
                            if let Some(rest) = batch.take() {
                                send_log(&bot, chat_id, &rest).await;
                            }
                            break;
                        }
                    },
                    _ = interval.tick() => {
                        if let Some(text) = batch.take() {
                            send_log(&bot, chat_id, &text).await;
                        }
                    }
                }
            }
        });

        Self { tx, min_level }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            // Logging here would loop back into this layer
            eprintln!("Failed to send log to Telegram: {e}");
            return;
        }
    }
}

/// Collects the `message` field first, then any other fields as `name = value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} ({})", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push_str(", ");
        }
        let _ = write!(self.fields, "{} = {:?}", field.name(), value);
    }
}

fn format_event(level: Level, text: String) -> Option<LogMessage> {
    match level {
        Level::ERROR => Some(LogMessage::Urgent(format!("❌ {text}"))),
        Level::WARN => Some(LogMessage::Urgent(format!("⚠️ {text}"))),
        Level::INFO => Some(LogMessage::Info(text)),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > self.min_level || !metadata.target().starts_with(FORWARDED_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(msg) = format_event(level, visitor.finish())
            && self.tx.send(msg).is_err()
        {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

//! Telegram client using teloxide.

use std::sync::Arc;
use std::time::Duration;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, InputFile};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::relay::backend::BackendOutput;

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Chat actions expire after ~5 seconds on the client side.
const CHAT_ACTION_REFRESH: Duration = Duration::from_secs(4);

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send text, split into as many messages as needed.
    pub async fn reply(&self, chat_id: ChatId, text: &str) -> Result<(), String> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.bot.send_message(chat_id, chunk).await.map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }
        Ok(())
    }

    pub async fn reply_with_image(
        &self,
        chat_id: ChatId,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), String> {
        info!("📷 Sending image to chat {} ({} bytes)", chat_id.0, data.len());

        let mut request = self
            .bot
            .send_photo(chat_id, InputFile::memory(data).file_name("image.png"));
        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send image: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn reply_with_video(
        &self,
        chat_id: ChatId,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), String> {
        info!("🎬 Sending video to chat {} ({} bytes)", chat_id.0, data.len());

        let mut request = self
            .bot
            .send_video(chat_id, InputFile::memory(data).file_name("video.mp4"));
        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send video: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn reply_with_document(
        &self,
        chat_id: ChatId,
        data: Vec<u8>,
        file_name: String,
        caption: Option<&str>,
    ) -> Result<(), String> {
        info!("📎 Sending document to chat {} ({} bytes)", chat_id.0, data.len());

        let mut request = self
            .bot
            .send_document(chat_id, InputFile::memory(data).file_name(file_name));
        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send document: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Deliver a backend output, picking the Telegram method by mime type.
    pub async fn deliver(
        &self,
        chat_id: ChatId,
        output: BackendOutput,
        caption: Option<&str>,
    ) -> Result<(), String> {
        match output {
            BackendOutput::Text(text) => self.reply(chat_id, &text).await,
            BackendOutput::Binary { data, mime_type } => {
                if mime_type.starts_with("image/") {
                    self.reply_with_image(chat_id, data, caption).await
                } else if mime_type.starts_with("video/") {
                    self.reply_with_video(chat_id, data, caption).await
                } else {
                    let extension = mime_type.rsplit('/').next().unwrap_or("bin");
                    self.reply_with_document(chat_id, data, format!("result.{extension}"), caption)
                        .await
                }
            }
        }
    }

    /// Download a file by file_id.
    pub async fn download_file(&self, file_id: &FileId) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(file_id.clone())
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }

    /// Show "typing…" (or another action) until the returned guard is dropped.
    pub fn start_chat_action(&self, chat_id: ChatId, action: ChatAction) -> ChatActionGuard {
        let cancel = Arc::new(Notify::new());
        let cancel_clone = cancel.clone();
        let bot = self.bot.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = bot.send_chat_action(chat_id, action).await {
                    warn!("Failed to send chat action: {e}");
                }
                tokio::select! {
                    biased;

                    _ = cancel_clone.notified() => break,
                    _ = tokio::time::sleep(CHAT_ACTION_REFRESH) => {}
                }
            }
        });

        ChatActionGuard { cancel }
    }
}

/// Stops the chat action refresher on drop.
pub struct ChatActionGuard {
    cancel: Arc<Notify>,
}

impl Drop for ChatActionGuard {
    fn drop(&mut self) {
        self.cancel.notify_one();
    }
}

/// Split `text` into pieces of at most `max_chars` characters, preferring
/// line breaks as split points.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        // Byte offset of the first char past the limit
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..limit].rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => limit,
        };
        chunks.push(&rest[..cut]);
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

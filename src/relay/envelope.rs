//! Inbound content normalization.
//!
//! The transport hands over an [`InboundUnit`]; [`classify`] turns it into a
//! [`RequestEnvelope`] with a prompt that is never empty. Document policy is
//! enforced here so rejected files never reach the dispatcher.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::relay::quota::UsageCategory;

/// Document mime types the backend is allowed to see.
pub const ALLOWED_DOCUMENT_TYPES: &[&str] = &["application/pdf", "text/plain"];

pub const DEFAULT_IMAGE_PROMPT: &str = "what is shown here?";
pub const DEFAULT_VOICE_PROMPT: &str = "respond to this audio";
pub const DEFAULT_DOCUMENT_PROMPT: &str = "summarize this document";
pub const DEFAULT_VIDEO_PROMPT: &str = "describe this video";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
    Voice,
    Document,
    VideoNote,
    Video,
}

impl ContentKind {
    fn default_prompt(self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Image => Some(DEFAULT_IMAGE_PROMPT),
            Self::Voice => Some(DEFAULT_VOICE_PROMPT),
            Self::Document => Some(DEFAULT_DOCUMENT_PROMPT),
            Self::VideoNote | Self::Video => Some(DEFAULT_VIDEO_PROMPT),
        }
    }

    fn default_mime_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Image => "image/jpeg",
            Self::Voice => "audio/ogg",
            Self::Document => "application/octet-stream",
            Self::VideoNote | Self::Video => "video/mp4",
        }
    }

    pub fn usage_category(self) -> UsageCategory {
        match self {
            Self::Text => UsageCategory::Text,
            Self::Image => UsageCategory::Image,
            Self::Voice => UsageCategory::Audio,
            Self::Document => UsageCategory::Document,
            Self::VideoNote | Self::Video => UsageCategory::Video,
        }
    }
}

/// Binary payload sent next to the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Media as downloaded by the transport.
#[derive(Debug, Clone)]
pub struct InboundMedia {
    pub kind: ContentKind,
    pub data: Vec<u8>,
    /// Mime type declared by the transport, if any.
    pub mime_type: Option<String>,
}

/// One unit of user content before normalization.
#[derive(Debug, Clone)]
pub struct InboundUnit {
    pub user_id: i64,
    /// Message text, or the caption of a media message.
    pub text: Option<String>,
    pub media: Option<InboundMedia>,
    pub language_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundUnit {
    pub fn text(user_id: i64, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: Some(text.into()),
            media: None,
            language_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn media(user_id: i64, media: InboundMedia, caption: Option<String>) -> Self {
        Self {
            user_id,
            text: caption,
            media: Some(media),
            language_code: None,
            timestamp: Utc::now(),
        }
    }
}

/// Normalized request, ready for dispatch.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    prompt: String,
    attachment: Option<Attachment>,
    kind: ContentKind,
    user_id: i64,
    language_code: Option<String>,
    timestamp: DateTime<Utc>,
}

impl RequestEnvelope {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn language_code(&self) -> Option<&str> {
        self.language_code.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when the exchange may extend the conversation history.
    pub fn is_text_only(&self) -> bool {
        self.kind == ContentKind::Text && self.attachment.is_none()
    }

    /// Copy of this envelope with a different prompt.
    pub fn with_prompt(&self, prompt: String) -> Self {
        Self {
            prompt,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("message has no text")]
    Empty,
    #[error("unsupported document type '{0}' (only PDF and plain text are accepted)")]
    UnsupportedDocument(String),
    #[error("attachment is empty")]
    EmptyAttachment,
}

/// Build a [`RequestEnvelope`] from an inbound unit.
pub fn classify(unit: InboundUnit) -> Result<RequestEnvelope, AdapterError> {
    let caption = unit
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let Some(media) = unit.media else {
        let prompt = caption.ok_or(AdapterError::Empty)?;
        return Ok(RequestEnvelope {
            prompt,
            attachment: None,
            kind: ContentKind::Text,
            user_id: unit.user_id,
            language_code: unit.language_code,
            timestamp: unit.timestamp,
        });
    };

    if media.data.is_empty() {
        return Err(AdapterError::EmptyAttachment);
    }

    let mime_type = media
        .mime_type
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| media.kind.default_mime_type().to_string());

    if media.kind == ContentKind::Document && !ALLOWED_DOCUMENT_TYPES.contains(&mime_type.as_str()) {
        return Err(AdapterError::UnsupportedDocument(mime_type));
    }

    let prompt = caption
        .or_else(|| media.kind.default_prompt().map(str::to_string))
        .ok_or(AdapterError::Empty)?;

    Ok(RequestEnvelope {
        prompt,
        attachment: Some(Attachment {
            data: media.data,
            mime_type,
        }),
        kind: media.kind,
        user_id: unit.user_id,
        language_code: unit.language_code,
        timestamp: unit.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(kind: ContentKind, mime: Option<&str>) -> InboundMedia {
        InboundMedia {
            kind,
            data: vec![1, 2, 3],
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn test_text_unit() {
        let env = classify(InboundUnit::text(7, "  hello  ")).unwrap();
        assert_eq!(env.prompt(), "hello");
        assert_eq!(env.kind(), ContentKind::Text);
        assert_eq!(env.user_id(), 7);
        assert!(env.is_text_only());
    }

    #[test]
    fn test_blank_text_rejected() {
        assert_eq!(classify(InboundUnit::text(7, "   ")).unwrap_err(), AdapterError::Empty);
    }

    #[test]
    fn test_default_prompts() {
        let cases = [
            (ContentKind::Image, DEFAULT_IMAGE_PROMPT),
            (ContentKind::Voice, DEFAULT_VOICE_PROMPT),
            (ContentKind::VideoNote, DEFAULT_VIDEO_PROMPT),
            (ContentKind::Video, DEFAULT_VIDEO_PROMPT),
        ];
        for (kind, expected) in cases {
            let env = classify(InboundUnit::media(1, media(kind, None), None)).unwrap();
            assert_eq!(env.prompt(), expected, "{kind:?}");
            assert!(!env.is_text_only());
        }

        let env = classify(InboundUnit::media(
            1,
            media(ContentKind::Document, Some("application/pdf")),
            None,
        ))
        .unwrap();
        assert_eq!(env.prompt(), DEFAULT_DOCUMENT_PROMPT);
    }

    #[test]
    fn test_caption_overrides_default() {
        let env = classify(InboundUnit::media(
            1,
            media(ContentKind::Image, None),
            Some("what breed is this dog?".to_string()),
        ))
        .unwrap();
        assert_eq!(env.prompt(), "what breed is this dog?");
        assert_eq!(env.attachment().unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn test_document_allow_list() {
        let ok = classify(InboundUnit::media(1, media(ContentKind::Document, Some("text/plain")), None));
        assert!(ok.is_ok());

        let err = classify(InboundUnit::media(
            1,
            media(ContentKind::Document, Some("application/zip")),
            None,
        ))
        .unwrap_err();
        assert_eq!(err, AdapterError::UnsupportedDocument("application/zip".to_string()));

        // Missing mime type is not on the list either
        let err = classify(InboundUnit::media(1, media(ContentKind::Document, None), None)).unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedDocument(_)));
    }

    #[test]
    fn test_empty_attachment_rejected() {
        let unit = InboundUnit::media(
            1,
            InboundMedia {
                kind: ContentKind::Voice,
                data: vec![],
                mime_type: None,
            },
            None,
        );
        assert_eq!(classify(unit).unwrap_err(), AdapterError::EmptyAttachment);
    }

    #[test]
    fn test_with_prompt_keeps_everything_else() {
        let env = classify(InboundUnit::media(1, media(ContentKind::Voice, None), None)).unwrap();
        let wrapped = env.with_prompt("other".to_string());
        assert_eq!(wrapped.prompt(), "other");
        assert_eq!(wrapped.kind(), ContentKind::Voice);
        assert_eq!(wrapped.attachment(), env.attachment());
        assert_eq!(env.prompt(), DEFAULT_VOICE_PROMPT);
    }
}

//! Generative backend interface and its error taxonomy.
//!
//! Backend errors are classified exactly once, where the HTTP response is
//! decoded. Everything above this module matches on [`ErrorKind`] and never
//! inspects error text.

use async_trait::async_trait;
use thiserror::Error;

use crate::relay::envelope::Attachment;
use crate::relay::session::Turn;

/// What the caller expects back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputModality {
    Text,
    /// Text and image parts are both allowed; an image part wins.
    Image,
}

/// One backend call.
///
/// Exactly two shapes reach the wire: text-only (optionally preceded by
/// conversation history), or a prompt plus a single binary part.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub model_id: &'a str,
    pub history: &'a [Turn],
    pub prompt: &'a str,
    pub attachment: Option<&'a Attachment>,
    pub modality: OutputModality,
}

impl<'a> BackendRequest<'a> {
    pub fn text(model_id: &'a str, history: &'a [Turn], prompt: &'a str) -> Self {
        Self {
            model_id,
            history,
            prompt,
            attachment: None,
            modality: OutputModality::Text,
        }
    }

    pub fn with_attachment(model_id: &'a str, prompt: &'a str, attachment: &'a Attachment) -> Self {
        Self {
            model_id,
            history: &[],
            prompt,
            attachment: Some(attachment),
            modality: OutputModality::Text,
        }
    }

    pub fn image(model_id: &'a str, prompt: &'a str) -> Self {
        Self {
            model_id,
            history: &[],
            prompt,
            attachment: None,
            modality: OutputModality::Image,
        }
    }
}

/// Canonical decoded backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutput {
    Text(String),
    Binary { data: Vec<u8>, mime_type: String },
}

impl BackendOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary { .. } => None,
        }
    }
}

/// Why a backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Quota or throughput rejection (HTTP 429).
    RateLimited,
    /// The backend does not know this model (HTTP 404).
    ModelNotFound,
    /// Backend-side outage (HTTP 500/502/503/504).
    ServiceUnavailable,
    /// Safety or policy rejection of the content itself.
    ContentBlocked,
    /// The backend could not be reached.
    NetworkFailure,
    /// Any other non-success status (bad key, bad request).
    InvalidRequest,
    /// The response body could not be decoded.
    MalformedResponse,
}

/// How the dispatcher reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next model in the chain.
    Transient,
    /// Abort the chain.
    Permanent,
    /// Abort the chain and show the block reason to the user.
    ContentBlocked,
}

impl ErrorKind {
    pub fn class(self) -> FailureClass {
        match self {
            Self::RateLimited | Self::ModelNotFound | Self::ServiceUnavailable => {
                FailureClass::Transient
            }
            Self::ContentBlocked => FailureClass::ContentBlocked,
            Self::NetworkFailure | Self::InvalidRequest | Self::MalformedResponse => {
                FailureClass::Permanent
            }
        }
    }

    /// Map an HTTP status code to a kind. Only meaningful for non-success codes.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            404 => Self::ModelNotFound,
            500 | 502 | 503 | 504 => Self::ServiceUnavailable,
            _ => Self::InvalidRequest,
        }
    }
}

/// Structured backend failure.
#[derive(Debug, Clone, Error)]
#[error("{}{message}", status_prefix(.status))]
pub struct BackendError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

fn status_prefix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!("{status}: "),
        None => String::new(),
    }
}

/// A generative model API.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<BackendOutput, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::ModelNotFound);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_failure_classes() {
        assert_eq!(ErrorKind::RateLimited.class(), FailureClass::Transient);
        assert_eq!(ErrorKind::ModelNotFound.class(), FailureClass::Transient);
        assert_eq!(ErrorKind::ServiceUnavailable.class(), FailureClass::Transient);
        assert_eq!(ErrorKind::ContentBlocked.class(), FailureClass::ContentBlocked);
        assert_eq!(ErrorKind::NetworkFailure.class(), FailureClass::Permanent);
        assert_eq!(ErrorKind::InvalidRequest.class(), FailureClass::Permanent);
        assert_eq!(ErrorKind::MalformedResponse.class(), FailureClass::Permanent);
    }

    #[test]
    fn test_display_includes_status() {
        let err = BackendError::from_status(429, "Resource has been exhausted");
        assert_eq!(err.to_string(), "429: Resource has been exhausted");

        let err = BackendError::new(ErrorKind::NetworkFailure, "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }
}

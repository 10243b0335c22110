//! Gemini `generateContent` client.
//!
//! Decoding happens in one place: [`decode_response`] turns a response body
//! into a [`BackendOutput`] or a classified [`BackendError`].

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::relay::backend::{
    BackendError, BackendOutput, BackendRequest, ErrorKind, GenerativeBackend, OutputModality,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_API_VERSION: &str = "v1beta";

/// Finish reasons that mean the content itself was refused.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
];

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    api_version: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlinePayload<'a>,
    },
}

#[derive(Serialize)]
struct InlinePayload<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
    status: Option<String>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        api_version: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            client,
        })
    }

    fn endpoint(&self, model_id: &str) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, self.api_version, model_id
        )
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<BackendOutput, BackendError> {
        let body = build_request(&request);

        let response = self
            .client
            .post(self.endpoint(request.model_id))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::new(ErrorKind::NetworkFailure, format!("HTTP error: {e}")))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            BackendError::new(ErrorKind::NetworkFailure, format!("Failed to read response: {e}"))
        })?;

        debug!("Gemini {} response status: {status}", request.model_id);

        if !status.is_success() {
            return Err(BackendError::from_status(status.as_u16(), error_message(&text)));
        }

        decode_response(&text, request.modality)
    }
}

fn build_request<'a>(request: &BackendRequest<'a>) -> GenerateRequest<'a> {
    let mut contents: Vec<Content<'a>> = request
        .history
        .iter()
        .map(|turn| Content {
            role: turn.role.as_str(),
            parts: vec![Part::Text { text: &turn.text }],
        })
        .collect();

    let mut parts = Vec::with_capacity(2);
    if let Some(attachment) = request.attachment {
        parts.push(Part::Inline {
            inline_data: InlinePayload {
                mime_type: &attachment.mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(&attachment.data),
            },
        });
    }
    parts.push(Part::Text { text: request.prompt });
    contents.push(Content { role: "user", parts });

    let generation_config = match request.modality {
        OutputModality::Text => None,
        OutputModality::Image => Some(GenerationConfig {
            response_modalities: vec!["TEXT", "IMAGE"],
        }),
    };

    GenerateRequest {
        contents,
        generation_config,
    }
}

/// Best-effort human-readable message from an error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.status {
            Some(status) => format!("{} ({status})", envelope.error.message),
            None => envelope.error.message,
        },
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty error body".to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        }
    }
}

/// Decode a successful `generateContent` body.
pub fn decode_response(body: &str, modality: OutputModality) -> Result<BackendOutput, BackendError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::new(ErrorKind::MalformedResponse, format!("Failed to parse response: {e}"))
    })?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(BackendError::new(
            ErrorKind::ContentBlocked,
            format!("prompt blocked ({reason})"),
        ));
    }

    let candidate = parsed
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| BackendError::new(ErrorKind::MalformedResponse, "No candidates in response"))?;

    if let Some(reason) = candidate.finish_reason.as_deref()
        && BLOCKING_FINISH_REASONS.contains(&reason)
    {
        return Err(BackendError::new(
            ErrorKind::ContentBlocked,
            format!("response blocked ({reason})"),
        ));
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    if modality == OutputModality::Image
        && let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref())
    {
        let data = base64::engine::general_purpose::STANDARD
            .decode(&inline.data)
            .map_err(|e| {
                BackendError::new(ErrorKind::MalformedResponse, format!("Failed to decode base64: {e}"))
            })?;
        let mime_type = inline
            .mime_type
            .clone()
            .unwrap_or_else(|| "image/png".to_string());
        return Ok(BackendOutput::Binary { data, mime_type });
    }

    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    if text.trim().is_empty() {
        return Err(BackendError::new(ErrorKind::MalformedResponse, "Empty response"));
    }
    Ok(BackendOutput::Text(text))
}

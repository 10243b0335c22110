//! Request dispatch across the model chain.
//!
//! Models are tried in priority order. A transient failure moves on to the
//! next model and leaves session and quota untouched. Any other failure ends
//! the walk at once. The same model is never retried.
//!
//! A quota slot is reserved before the walk and given back if it fails, so
//! concurrent requests cannot overshoot a hard limit. No lock is held while
//! a backend call is in flight.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::relay::backend::{
    BackendError, BackendOutput, BackendRequest, FailureClass, GenerativeBackend,
};
use crate::relay::chain::{ModelChain, ModelDescriptor};
use crate::relay::envelope::RequestEnvelope;
use crate::relay::quota::{QuotaTracker, Reservation, UsageCategory, UsageLine};
use crate::relay::session::SessionStore;

/// A successful backend result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub model_id: String,
    pub output: BackendOutput,
    /// True when a model other than the chain's first produced the result.
    pub fallback: bool,
}

impl Reply {
    /// Append the fallback marker to `text` when needed.
    pub fn annotate(&self, text: &str) -> String {
        if self.fallback {
            format!("{text}\n\n(fallback: {})", self.model_id)
        } else {
            text.to_string()
        }
    }

    /// Text rendering of a text reply, with fallback marker.
    pub fn text(&self) -> Option<String> {
        self.output.as_text().map(|t| self.annotate(t))
    }
}

/// One failed or skipped model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub model_id: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error("Request blocked: {message}")]
    Blocked { model_id: String, message: String },
    #[error("Request failed on {model_id}: {message}")]
    Permanent { model_id: String, message: String },
    #[error("{}", exhausted_message(.attempts))]
    Exhausted { attempts: Vec<Attempt> },
    #[error("No configured model accepts this kind of content")]
    NoCapableModel,
    #[error("Daily {} limit reached. Try again tomorrow.", .category.as_str().replace('_', " "))]
    QuotaExceeded { category: UsageCategory },
}

fn exhausted_message(attempts: &[Attempt]) -> String {
    let list = attempts
        .iter()
        .map(|a| format!("{}: {}", a.model_id, a.diagnostic))
        .collect::<Vec<_>>()
        .join("; ");
    let last = attempts.last().map(|a| a.diagnostic.as_str()).unwrap_or("none");
    format!("All models failed ({list}). Last error: {last}")
}

/// Bookkeeping for one walk over a chain.
#[derive(Default)]
struct ChainWalk {
    attempts: Vec<Attempt>,
    tried: usize,
}

impl ChainWalk {
    fn skip(&mut self, model: &ModelDescriptor, reason: &str) {
        self.attempts.push(Attempt {
            model_id: model.id.clone(),
            diagnostic: format!("skipped ({reason})"),
        });
    }

    /// Ok to continue with the next model, Err to stop.
    fn fail(&mut self, model: &ModelDescriptor, err: BackendError) -> Result<(), DispatchFailure> {
        self.tried += 1;
        match err.class() {
            FailureClass::Transient => {
                warn!("{} failed ({:?}), trying next model: {}", model.id, err.kind, err);
                self.attempts.push(Attempt {
                    model_id: model.id.clone(),
                    diagnostic: err.to_string(),
                });
                Ok(())
            }
            FailureClass::ContentBlocked => {
                warn!("{} blocked the request: {}", model.id, err);
                Err(DispatchFailure::Blocked {
                    model_id: model.id.clone(),
                    message: err.message,
                })
            }
            FailureClass::Permanent => {
                warn!("{} failed permanently ({:?}): {}", model.id, err.kind, err);
                Err(DispatchFailure::Permanent {
                    model_id: model.id.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn finish(self) -> DispatchFailure {
        if self.tried == 0 {
            DispatchFailure::NoCapableModel
        } else {
            DispatchFailure::Exhausted { attempts: self.attempts }
        }
    }
}

pub struct Dispatcher {
    backend: Arc<dyn GenerativeBackend>,
    chain: ModelChain,
    image_chain: ModelChain,
    sessions: Mutex<SessionStore>,
    quota: Mutex<QuotaTracker>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        chain: ModelChain,
        image_chain: ModelChain,
        sessions: SessionStore,
        quota: QuotaTracker,
    ) -> Self {
        Self {
            backend,
            chain,
            image_chain,
            sessions: Mutex::new(sessions),
            quota: Mutex::new(quota),
        }
    }

    pub fn chain(&self) -> &ModelChain {
        &self.chain
    }

    /// Send one envelope through the chain.
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<Reply, DispatchFailure> {
        let reservation = self.reserve(envelope.kind().usage_category()).await?;
        let result = if envelope.is_text_only() {
            self.send_text(envelope).await
        } else {
            self.send_stateless(envelope).await
        };
        if result.is_err() {
            self.release(reservation).await;
        }
        result
    }

    async fn send_text(&self, envelope: &RequestEnvelope) -> Result<Reply, DispatchFailure> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions.get_or_create(envelope.user_id(), &self.chain.primary().id)
        };
        let history = handle.lock().await.history.clone();
        let mut walk = ChainWalk::default();

        for (position, model) in self.chain.iter().enumerate() {
            let request = BackendRequest::text(&model.id, &history, envelope.prompt());
            info!("🤖 {} <- text ({} turn(s) of history)", model.id, history.len());

            match self.backend.invoke(request).await {
                Ok(output) => {
                    // Exchanges land in completion order, each pair kept together
                    if let Some(text) = output.as_text() {
                        handle.lock().await.push_exchange(envelope.prompt(), text);
                    }
                    return Ok(self.reply(model, output, position));
                }
                Err(err) => walk.fail(model, err)?,
            }
        }

        Err(walk.finish())
    }

    async fn send_stateless(&self, envelope: &RequestEnvelope) -> Result<Reply, DispatchFailure> {
        let mut walk = ChainWalk::default();

        for (position, model) in self.chain.iter().enumerate() {
            let request = match envelope.attachment() {
                Some(attachment) => {
                    if !model.multimodal {
                        walk.skip(model, "no attachment support");
                        continue;
                    }
                    info!(
                        "🤖 {} <- {:?} ({} bytes, {})",
                        model.id,
                        envelope.kind(),
                        attachment.data.len(),
                        attachment.mime_type
                    );
                    BackendRequest::with_attachment(&model.id, envelope.prompt(), attachment)
                }
                None => BackendRequest::text(&model.id, &[], envelope.prompt()),
            };

            match self.backend.invoke(request).await {
                Ok(output) => return Ok(self.reply(model, output, position)),
                Err(err) => walk.fail(model, err)?,
            }
        }

        Err(walk.finish())
    }

    /// Generate an image from a prompt using the image chain.
    pub async fn generate_image(&self, prompt: &str) -> Result<Reply, DispatchFailure> {
        let reservation = self.reserve(UsageCategory::ImageGeneration).await?;
        let result = self.walk_image_chain(prompt).await;
        if result.is_err() {
            self.release(reservation).await;
        }
        result
    }

    async fn walk_image_chain(&self, prompt: &str) -> Result<Reply, DispatchFailure> {
        let mut walk = ChainWalk::default();

        for (position, model) in self.image_chain.iter().enumerate() {
            info!("🎨 {} <- \"{}\"", model.id, prompt.chars().take(50).collect::<String>());
            match self.backend.invoke(BackendRequest::image(&model.id, prompt)).await {
                Ok(output) => return Ok(self.reply(model, output, position)),
                Err(err) => walk.fail(model, err)?,
            }
        }

        Err(walk.finish())
    }

    fn reply(&self, model: &ModelDescriptor, output: BackendOutput, position: usize) -> Reply {
        if position > 0 {
            info!("✅ Answered by fallback model {}", model.id);
        }
        Reply {
            model_id: model.id.clone(),
            output,
            fallback: position > 0,
        }
    }

    async fn reserve(&self, category: UsageCategory) -> Result<Reservation, DispatchFailure> {
        let mut quota = self.quota.lock().await;
        let Some(reservation) = quota.try_reserve(category) else {
            warn!("Daily {category} limit reached, refusing request");
            return Err(DispatchFailure::QuotaExceeded { category });
        };
        let (count, limit) = (quota.count(category), quota.limit(category));
        if !category.is_hard_limit() && count > limit {
            warn!("Soft {category} limit passed ({count}/{limit})");
        }
        Ok(reservation)
    }

    async fn release(&self, reservation: Reservation) {
        self.quota.lock().await.release(reservation);
    }

    /// Drop the conversation for `user_id`.
    pub async fn reset_session(&self, user_id: i64) -> bool {
        self.sessions.lock().await.reset(user_id)
    }

    /// Number of turns in the session `user_id` would use, 0 if none.
    pub async fn history_len(&self, user_id: i64) -> usize {
        let handle = self.sessions.lock().await.get(user_id);
        match handle {
            Some(session) => session.lock().await.history.len(),
            None => 0,
        }
    }

    pub async fn usage(&self) -> Vec<UsageLine> {
        self.quota.lock().await.snapshot()
    }
}

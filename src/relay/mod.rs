//! Relay core - forwards Telegram content to a generative backend.

pub mod backend;
pub mod chain;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod envelope;
pub mod gemini;
pub mod quota;
pub mod session;
pub mod telegram;
pub mod translate;


pub use backend::{BackendError, BackendOutput, BackendRequest, ErrorKind, GenerativeBackend};
pub use chain::{ModelChain, ModelDescriptor};
pub use command::Command;
pub use dispatcher::{DispatchFailure, Dispatcher, Reply};
pub use engine::{RelayEngine, Response};
pub use envelope::{ContentKind, InboundMedia, InboundUnit};
pub use gemini::GeminiClient;
pub use quota::{QuotaTracker, UsageCategory};
pub use session::{SessionScope, SessionStore};
pub use telegram::TelegramClient;
pub use translate::{AwaitingToggle, ModeState, TranslateMode};

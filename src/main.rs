use std::path::PathBuf;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use gemini_relay::config::Config;
use gemini_relay::health;
use gemini_relay::relay::command::HELP_TEXT;
use gemini_relay::relay::{
    BackendOutput, Command, ContentKind, Dispatcher, GeminiClient, InboundMedia, InboundUnit,
    ModeState, QuotaTracker, RelayEngine, Response, SessionStore, TelegramClient,
};
use gemini_relay::telegram_log::TelegramLogLayer;

struct BotState {
    config: Config,
    engine: RelayEngine,
    telegram: TelegramClient,
    bot_username: Option<String>,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gemini-relay.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting gemini-relay...");
    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("Loaded config from defaults and environment"),
    }
    info!("Model chain: {}", config.models.ids().join(" -> "));
    match config.owner_id {
        Some(owner) => info!("Serving owner {owner} only"),
        None => info!("Serving every user"),
    }

    let gemini = match GeminiClient::new(
        config.gemini_api_key.clone(),
        &config.api_base_url,
        &config.api_version,
        config.request_timeout,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    match health::bind(config.health_port).await {
        Ok(listener) => {
            tokio::spawn(async move {
                if let Err(e) = health::serve(listener).await {
                    error!("Health endpoint stopped: {e}");
                }
            });
        }
        Err(e) => warn!("Failed to bind health port {}: {e}", config.health_port),
    }

    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        warn!("Failed to drop pending updates: {e}");
    }

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            None
        }
    };

    let dispatcher = Dispatcher::new(
        Arc::new(gemini),
        config.models.clone(),
        config.image_models.clone(),
        SessionStore::new(config.session_scope),
        QuotaTracker::with_limits(config.quota_limits.clone()),
    );
    let engine = RelayEngine::new(dispatcher, ModeState::new(config.awaiting_toggle));

    let state = Arc::new(BotState {
        telegram: TelegramClient::new(bot.clone()),
        config,
        engine,
        bot_username,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    info!("✅ Bot online");
    teloxide::dispatching::Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if !state.config.is_allowed(user.id) {
        info!("Ignoring message from {} ({})", user.first_name, user.id);
        return Ok(());
    }

    let chat_id = msg.chat.id;
    let user_id = user.id.0 as i64;

    if let Some(text) = msg.text()
        && let Some(command) = Command::parse(text, state.bot_username.as_deref())
    {
        info!("📨 {:?} from {}", command, user_id);
        return handle_command(&state, chat_id, user_id, command).await;
    }

    let unit = match inbound_unit(&msg, &state.telegram).await {
        Ok(Some(unit)) => unit,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!("{e}");
            send(&state, chat_id, "Couldn't download that file, please try again.").await;
            return Ok(());
        }
    };

    let preview: String = unit.text.as_deref().unwrap_or("").chars().take(100).collect();
    info!(
        "📨 Message from {} ({}): {:?} \"{}\"",
        user.first_name,
        user_id,
        unit.media.as_ref().map(|m| m.kind).unwrap_or(ContentKind::Text),
        preview
    );

    let response = {
        let _typing = state.telegram.start_chat_action(chat_id, ChatAction::Typing);
        state.engine.handle(unit).await
    };
    respond(&state, chat_id, response).await;
    Ok(())
}

async fn handle_command(
    state: &BotState,
    chat_id: ChatId,
    user_id: i64,
    command: Command,
) -> ResponseResult<()> {
    match command {
        Command::Start => send(state, chat_id, "Bot online. Send /help to see what I can do.").await,
        Command::Help => send(state, chat_id, HELP_TEXT).await,
        Command::Reset => send(state, chat_id, &state.engine.reset(user_id).await).await,
        Command::Translate => {
            send(state, chat_id, &state.engine.toggle_translate(user_id).await).await
        }
        Command::Lang(language) if language.is_empty() => {
            send(state, chat_id, "Usage: /lang <language>").await
        }
        Command::Lang(language) => {
            send(state, chat_id, &state.engine.select_language(user_id, &language).await).await
        }
        Command::Usage => send(state, chat_id, &state.engine.usage_report().await).await,
        Command::Image(prompt) => {
            let response = {
                let _uploading = state.telegram.start_chat_action(chat_id, ChatAction::UploadPhoto);
                state.engine.generate_image(user_id, &prompt).await
            };
            respond(state, chat_id, response).await;
        }
        Command::Unknown(name) => {
            send(state, chat_id, &format!("Unknown command /{name}. Send /help for the list.")).await
        }
    }
    Ok(())
}

async fn respond(state: &BotState, chat_id: ChatId, response: Response) {
    match response {
        Response::Notice(text) => send(state, chat_id, &text).await,
        Response::Reply(reply) => {
            let caption = reply.fallback.then(|| format!("(fallback: {})", reply.model_id));
            let output = match reply.text() {
                Some(text) => BackendOutput::Text(text),
                None => reply.output,
            };
            if let Err(e) = state.telegram.deliver(chat_id, output, caption.as_deref()).await {
                warn!("Failed to deliver reply: {e}");
            }
        }
    }
}

async fn send(state: &BotState, chat_id: ChatId, text: &str) {
    // Errors are already logged by the client
    let _ = state.telegram.reply(chat_id, text).await;
}

/// Convert a Telegram message into an inbound unit, downloading any media.
///
/// Returns `Ok(None)` for messages the relay doesn't handle (stickers, polls...).
async fn inbound_unit(msg: &Message, telegram: &TelegramClient) -> Result<Option<InboundUnit>, String> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(None);
    };

    let media: Option<(ContentKind, &FileId, Option<String>)> = if let Some(photos) = msg.photo() {
        // Sizes are ordered smallest first
        photos.last().map(|p| (ContentKind::Image, &p.file.id, None))
    } else if let Some(voice) = msg.voice() {
        Some((ContentKind::Voice, &voice.file.id, voice.mime_type.as_ref().map(|m| m.to_string())))
    } else if let Some(doc) = msg.document() {
        Some((ContentKind::Document, &doc.file.id, doc.mime_type.as_ref().map(|m| m.to_string())))
    } else if let Some(note) = msg.video_note() {
        Some((ContentKind::VideoNote, &note.file.id, None))
    } else if let Some(video) = msg.video() {
        Some((ContentKind::Video, &video.file.id, video.mime_type.as_ref().map(|m| m.to_string())))
    } else {
        None
    };

    let mut unit = match media {
        Some((kind, file_id, mime_type)) => {
            let data = telegram.download_file(file_id).await?;
            InboundUnit::media(
                user.id.0 as i64,
                InboundMedia { kind, data, mime_type },
                msg.caption().map(str::to_string),
            )
        }
        None => match msg.text() {
            Some(text) => InboundUnit::text(user.id.0 as i64, text),
            None => return Ok(None),
        },
    };
    unit.language_code = user.language_code.clone();
    unit.timestamp = msg.date;
    Ok(Some(unit))
}

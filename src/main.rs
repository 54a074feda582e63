use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use switchboard_bot::config::{ServiceRegistry, Settings};
use switchboard_bot::llm::AiClient;
use switchboard_bot::storage::R2Storage;
use switchboard_bot::{bot, storage};
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, InlineQuery};
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data from log output
struct RedactionPatterns {
    token_url: Regex,
    token_raw: Regex,
    api_key_json: Regex,
    bearer: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            token_raw: Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?,
            api_key_json: Regex::new(r#""apiKey"\s*:\s*"[^"]*""#)?,
            bearer: Regex::new(r"Bearer [A-Za-z0-9._~+/=-]{8,}")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token_url
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token_raw
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .api_key_json
            .replace_all(&output, r#""apiKey":"[MASKED]""#)
            .to_string();
        output = self
            .bearer
            .replace_all(&output, "Bearer [MASKED]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the Write contract even when
        // the redacted string length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Redaction patterns must exist before any logging happens
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting Switchboard bot...");

    let settings = init_settings();
    let registry = init_registry(&settings);
    let storage = init_storage(&settings).await;

    let ai = Arc::new(AiClient::new());
    info!("AI client initialized.");

    let bot = Bot::new(settings.telegram_token.clone());

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![settings, registry, storage, ai])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_registry(settings: &Settings) -> Arc<ServiceRegistry> {
    match ServiceRegistry::from_json(&settings.ai_services) {
        Ok(registry) => {
            info!("Service registry loaded ({} services).", registry.len());
            Arc::new(registry)
        }
        Err(e) => {
            error!("Failed to parse AI_SERVICES: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_storage(settings: &Settings) -> Arc<R2Storage> {
    match storage::R2Storage::new(settings).await {
        Ok(s) => {
            info!("R2 Storage initialized.");
            if let Err(e) = s.check_connection().await {
                error!("R2 Storage connection check failed: {}", e);
            }
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to initialize R2 Storage: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_inline_query().endpoint(handle_inline_query))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query))
        .branch(
            Update::filter_message()
                .filter(|msg: Message| {
                    msg.text().is_some() || msg.caption().is_some() || msg.photo().is_some()
                })
                .endpoint(handle_message),
        )
}

async fn handle_inline_query(
    bot: Bot,
    q: InlineQuery,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::inline_query(bot, q, settings, registry, storage, ai).await {
        error!("Inline query handler error: {}", e);
    }
    respond(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) =
        Box::pin(bot::handlers::direct_message(bot, msg, settings, registry, storage, ai)).await
    {
        error!("Message handler error: {}", e);
    }
    respond(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) =
        bot::handlers::selection_callback(bot, q, settings, registry, storage, ai).await
    {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

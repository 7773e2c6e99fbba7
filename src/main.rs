use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use teloxide::RequestError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use halal_assistant::assistant::OpenAiAssistant;
use halal_assistant::bot::{self, AppState};
use halal_assistant::config::Config;
use halal_assistant::db;
use halal_assistant::dialogue::AdminDialogueState;
use halal_assistant::localization::init_localization;
use halal_assistant::ocr::{OcrBackend, TextRecognizer};
use halal_assistant::ocr_config::OcrConfig;

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting Halal Assistant Telegram Bot");

    let config = Config::from_env()?;
    init_localization()?;

    config
        .ensure_data_dir()
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;
    let pool = db::connect(&config.database_url).await?;

    let http = reqwest::Client::new();
    let assistant = OpenAiAssistant::new(&config.assistant)?;
    if !assistant.is_configured() {
        warn!("OPENAI_API_KEY or OPENAI_ASSISTANT_ID missing, questions will be refused");
    }
    let recognizer = TextRecognizer::new(
        OcrBackend::from_config(&config.vision, http.clone()),
        OcrConfig::default(),
    );
    info!(ocr_backend = recognizer.backend_name(), admins = config.admin_ids.len(), "Services initialized");

    let bot = Bot::new(&config.telegram_token);
    let webhook = config
        .webhook_enabled()
        .then(|| config.webhook_url.clone())
        .flatten();
    let port = config.port;

    let state = Arc::new(AppState {
        pool,
        config,
        assistant: Arc::new(assistant),
        recognizer,
        http,
    });

    let mut dispatcher = Dispatcher::builder(bot.clone(), bot::schema())
        .dependencies(dptree::deps![state, InMemStorage::<AdminDialogueState>::new()])
        .enable_ctrlc_handler()
        .build();

    match webhook {
        Some(base) => {
            let url: reqwest::Url = format!("{}/telegram", base.trim_end_matches('/'))
                .parse()
                .context("WEBHOOK_URL is not a valid URL")?;
            let addr = SocketAddr::from(([0, 0, 0, 0], port));

            let (listener, stop_flag, router) =
                webhooks::axum_no_setup(webhooks::Options::new(addr, url.clone()));
            let app = router.route("/", axum::routing::get(|| async { "Halal assistant bot is running" }));

            let tcp = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            tokio::spawn(async move {
                if let Err(e) = axum::serve(tcp, app).with_graceful_shutdown(stop_flag).await {
                    tracing::error!(error = %e, "Webhook server stopped");
                }
            });

            match bot.set_webhook(url.clone()).await {
                Ok(_) => info!(%url, "Webhook registered"),
                // Another worker registered it moments ago
                Err(RequestError::RetryAfter(wait)) => {
                    warn!(retry_after = ?wait.duration(), "Webhook registration throttled, assuming it is set")
                }
                Err(e) => return Err(e).context("Failed to register webhook"),
            }

            info!(%addr, "Serving webhook");
            dispatcher
                .dispatch_with_listener(listener, LoggingErrorHandler::with_custom_text("Webhook listener error"))
                .await;
        }
        None => {
            bot.delete_webhook().await?;
            info!("Starting long polling");
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}

use crate::bot;
use crate::bot::handlers::{BotService, Command};
use crate::config::BotSettings;
use gobo_core::{ChatService, GeminiClient, ModelClient};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info};

/// Run the Telegram transport runtime.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let client = init_model_client(&settings);
    let service: Arc<BotService> = Arc::new(ChatService::new(client, Arc::clone(&settings.chat)));
    info!(
        history_limit = settings.chat.history_limit(),
        chat_model = %settings.chat.chat_model(),
        "Chat service initialized."
    );

    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![service])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_model_client(settings: &BotSettings) -> Arc<dyn ModelClient> {
    match GeminiClient::from_settings(settings.chat.as_ref()) {
        Ok(client) => {
            info!("Gemini client initialized.");
            Arc::new(client)
        }
        Err(e) => {
            error!("Failed to initialize Gemini client: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo))
        .branch(
            dptree::filter(|msg: Message| msg.voice().is_some() || msg.audio().is_some())
                .endpoint(handle_audio),
        )
        .branch(dptree::filter(|msg: Message| msg.video().is_some()).endpoint(handle_video))
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    service: Arc<BotService>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_command(bot, msg, cmd, service).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    service: Arc<BotService>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_text(bot, msg, service)).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    service: Arc<BotService>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_photo(bot, msg, service)).await {
        error!("Photo handler error: {}", e);
    }
    respond(())
}

async fn handle_audio(
    bot: Bot,
    msg: Message,
    service: Arc<BotService>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_audio(bot, msg, service)).await {
        error!("Audio handler error: {}", e);
    }
    respond(())
}

async fn handle_video(
    bot: Bot,
    msg: Message,
    service: Arc<BotService>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_video(bot, msg, service)).await {
        error!("Video handler error: {}", e);
    }
    respond(())
}

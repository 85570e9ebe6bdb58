use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod config;
mod db;
mod handlers;
mod session;
mod state;
mod stories;
mod userbot;
mod utils;

use config::Config;
use db::database::Database;
use handlers::callback_data::CallbackAction;
use handlers::{commands, navigation, retrieval};
use state::AppState;
use stories::engine::{EngineSettings, StoryEngine};
use userbot::Userbot;
use utils::logging::init_logging;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Stats,
    About,
    Status,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();

    let config = match Config::load() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("{err}");
            return Err(err.into());
        }
    };
    let _guards = init_logging(&config.app);
    info!("Starting Telegram Stories Viewer Bot");

    let db = Database::init(&config.database).await?;

    let userbot = Arc::new(
        Userbot::connect(&config.userbot)
            .await
            .map_err(|err| anyhow!("Failed to connect userbot: {err}"))?,
    );
    userbot::ensure_authorized(&userbot, &config.userbot).await?;

    let engine = Arc::new(StoryEngine::new(
        userbot.clone(),
        EngineSettings {
            max_stories: config.app.max_stories_per_request,
            download_concurrency: config.app.download_concurrency,
            download_timeout: config.app.request_timeout,
        },
    ));
    let state = AppState::new(Arc::clone(&config), db.clone(), engine);
    let sweeper = state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);

    let bot = Bot::new(config.bot.token.clone());

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    info!("Bot is polling for updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutting down");
    sweeper.abort();
    userbot.disconnect();
    db.close().await;
    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, state, message).await?,
        Command::Help => commands::help_handler(bot, message).await?,
        Command::About => commands::about_handler(bot, message).await?,
        Command::Stats => {
            tokio::spawn(async move {
                if let Err(err) = commands::stats_handler(bot, state, message).await {
                    error!("stats handler failed: {err}");
                }
            });
        }
        Command::Status => {
            tokio::spawn(async move {
                if let Err(err) = commands::status_handler(bot, state, message).await {
                    error!("status handler failed: {err}");
                }
            });
        }
    }
    Ok(())
}

async fn handle_text(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = retrieval::text_handler(bot, state, message).await {
            error!("text handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(action) = query.data.as_deref().and_then(CallbackAction::parse) else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };

    tokio::spawn(async move {
        handlers::access::remember_user(&state, Some(&query.from)).await;
        let result = match action {
            CallbackAction::Download { filter, target } => {
                retrieval::download_callback(bot, state, query, filter, target).await
            }
            CallbackAction::Page { user_id, page } => {
                navigation::page_callback(bot, state, query, user_id, page).await
            }
            CallbackAction::Close { user_id } => {
                navigation::close_callback(bot, state, query, user_id).await
            }
            CallbackAction::PageInfo => navigation::page_info_callback(bot, state, query).await,
            CallbackAction::Help => navigation::help_callback(bot, query).await,
        };
        if let Err(err) = result {
            error!("callback handler failed: {err}");
        }
    });
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}

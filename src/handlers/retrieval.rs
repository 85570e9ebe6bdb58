use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, User};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::models::RequestInsert;
use crate::handlers::access::remember_user;
use crate::handlers::callback_data::CallbackAction;
use crate::handlers::navigation::render_page;
use crate::handlers::responses::{send_text_with_retry, update_status};
use crate::state::AppState;
use crate::stories::classifier::{classify, resolve_input, Resolved};
use crate::stories::pagination::total_pages;
use crate::stories::source::SourceError;
use crate::stories::types::{CategoryFilter, StoryItem};
use crate::utils::telegram::telegram_user_id;
use crate::utils::timing::{
    complete_command_timer, start_callback_timer, start_command_timer, CommandTimer,
};

const SEARCHING_TEXT: &str = "🔍 Searching...";
const DELIVERY_FAILED_TEXT: &str = "Failed to deliver stories";

/// Terminal outcome of a failed retrieval request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("User not found")]
    TargetNotFound,

    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("No stories found")]
    NoStories,

    #[error("FloodWait: {0}s")]
    RateLimited(u32),

    #[error("{0}")]
    Unclassified(String),
}

impl RetrievalError {
    fn from_resolution(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) | SourceError::Rpc(_) => RetrievalError::TargetNotFound,
            other => RetrievalError::from(other),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            RetrievalError::TargetNotFound => "❌ User not found!".to_string(),
            RetrievalError::InvalidPhone => "❌ The phone number is invalid!".to_string(),
            RetrievalError::NoStories => "😔 No stories found!".to_string(),
            RetrievalError::RateLimited(seconds) => {
                format!("⏳ Please wait {seconds} seconds and try again.")
            }
            RetrievalError::Unclassified(_) => {
                "❌ Something went wrong.\n\nTry again or see /help.".to_string()
            }
        }
    }
}

impl From<SourceError> for RetrievalError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => RetrievalError::TargetNotFound,
            SourceError::InvalidPhone => RetrievalError::InvalidPhone,
            SourceError::FloodWait(seconds) => RetrievalError::RateLimited(seconds),
            other => RetrievalError::Unclassified(other.to_string()),
        }
    }
}

/// The active / pinned / all prompt, or `None` when a button payload
/// would not fit into Telegram's callback data limit.
pub fn category_keyboard(target_text: &str) -> Option<InlineKeyboardMarkup> {
    let buttons = CategoryFilter::ALL
        .into_iter()
        .map(|filter| {
            let label = match filter {
                CategoryFilter::Active => "📌 Active",
                CategoryFilter::Pinned => "📍 Pinned",
                CategoryFilter::All => "📚 All",
            };
            let action = CallbackAction::Download {
                filter,
                target: target_text.to_string(),
            };
            action
                .fits()
                .then(|| InlineKeyboardButton::callback(label, action.to_data()))
        })
        .collect::<Option<Vec<_>>>()?;

    Some(InlineKeyboardMarkup::new(vec![
        buttons,
        vec![InlineKeyboardButton::callback(
            "❓ Help",
            CallbackAction::Help.to_data(),
        )],
    ]))
}

/// Free text is a target; ask which stories to fetch.
pub async fn text_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = message.from.clone() else {
        return Ok(());
    };
    let Some(text) = message.text().map(str::trim) else {
        return Ok(());
    };
    if text.is_empty() || text.starts_with('/') {
        return Ok(());
    }

    remember_user(&state, Some(&user)).await;

    match category_keyboard(text) {
        Some(keyboard) => {
            send_text_with_retry(
                &bot,
                message.chat.id,
                &format!("🔎 {text}\n\nWhich stories do you want?"),
                Some(keyboard),
            )
            .await?;
        }
        None => {
            info!("Target text too long for a category prompt; fetching all stories");
            let timer = start_command_timer("retrieve", &message);
            process_request(
                &bot,
                &state,
                message.chat.id,
                None,
                &user,
                text,
                CategoryFilter::All,
                timer,
            )
            .await?;
        }
    }
    Ok(())
}

/// A category button was pressed on the prompt.
pub async fn download_callback(
    bot: Bot,
    state: AppState,
    query: CallbackQuery,
    filter: CategoryFilter,
    target_text: String,
) -> Result<()> {
    let timer = start_callback_timer("retrieve", &query);
    bot.answer_callback_query(query.id.clone()).await?;

    let Some(message) = query.message.as_ref() else {
        return Ok(());
    };

    process_request(
        &bot,
        &state,
        message.chat().id,
        Some(message.id()),
        &query.from,
        &target_text,
        filter,
        timer,
    )
    .await
}

async fn retrieve(
    state: &AppState,
    target_text: &str,
    filter: CategoryFilter,
) -> Result<(Resolved, Vec<StoryItem>), RetrievalError> {
    let engine = &state.engine;
    let resolved = tokio::time::timeout(
        state.config.app.request_timeout,
        resolve_input(engine.source(), target_text),
    )
    .await
    .map_err(|_| RetrievalError::from(SourceError::Timeout))?
    .map_err(RetrievalError::from_resolution)?;

    let items = engine.collect(&resolved.target, filter).await;
    if items.is_empty() {
        return Err(RetrievalError::NoStories);
    }
    Ok((resolved, items))
}

/// What one request contributes to the request log.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoggedOutcome {
    success: bool,
    stories_count: usize,
    error_message: Option<String>,
}

impl LoggedOutcome {
    /// Only stories that reached the user count; a found list that could
    /// not be delivered is a failure.
    fn new(found: Result<usize, &RetrievalError>, delivered: usize) -> Self {
        match found {
            Err(err) => LoggedOutcome {
                success: false,
                stories_count: 0,
                error_message: Some(err.to_string()),
            },
            Ok(_) if delivered == 0 => LoggedOutcome {
                success: false,
                stories_count: 0,
                error_message: Some(DELIVERY_FAILED_TEXT.to_string()),
            },
            Ok(_) => LoggedOutcome {
                success: true,
                stories_count: delivered,
                error_message: None,
            },
        }
    }

    /// Status and detail for the command timer. A Telegram error while
    /// delivering wins over the logged outcome.
    fn timer_status(
        &self,
        delivery_error: Option<&anyhow::Error>,
        found: usize,
    ) -> (&'static str, Option<String>) {
        if let Some(err) = delivery_error {
            return ("error", Some(err.to_string()));
        }
        if self.success {
            ("success", Some(format!("stories={}/{found}", self.stories_count)))
        } else {
            ("error", self.error_message.clone())
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn process_request(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    status_message: Option<MessageId>,
    user: &User,
    target_text: &str,
    filter: CategoryFilter,
    mut timer: CommandTimer,
) -> Result<()> {
    let user_id = telegram_user_id(user);
    let request_type = classify(target_text).kind;
    let status_message = match status_message {
        Some(message_id) => {
            update_status(bot, chat_id, Some(message_id), SEARCHING_TEXT).await?;
            Some(message_id)
        }
        None => Some(send_text_with_retry(bot, chat_id, SEARCHING_TEXT, None).await?.id),
    };

    let outcome = retrieve(state, target_text, filter).await;
    let delivery = match &outcome {
        Ok((resolved, items)) => {
            let total = items.len();
            let label = resolved.target.display_name.clone();
            info!(
                "User {user_id} found {total} {} stories of {label} ({})",
                filter.as_str(),
                resolved.kind
            );
            state.sessions.insert(user_id, items.clone(), filter, &label);
            deliver_first_page(bot, state, chat_id, status_message, user_id, total, &label).await
        }
        Err(err) => {
            match err {
                RetrievalError::Unclassified(detail) => {
                    error!("Error processing request '{target_text}': {detail}")
                }
                other => warn!("Request '{target_text}' from {user_id} failed: {other}"),
            }
            update_status(bot, chat_id, status_message, &err.user_message())
                .await
                .map(|_| 0)
        }
    };

    let delivered = delivery.as_ref().copied().unwrap_or_default();
    let found = outcome.as_ref().map(|(_, items)| items.len());
    let logged = LoggedOutcome::new(found, delivered);
    record_request(
        state,
        RequestInsert {
            user_id,
            target: target_text.to_string(),
            request_type: request_type.as_str().to_string(),
            category: filter.as_str().to_string(),
            stories_count: i32::try_from(logged.stories_count).unwrap_or(i32::MAX),
            success: logged.success,
            error_message: logged.error_message.clone(),
            processing_time: timer.elapsed_secs(),
        },
    )
    .await;

    let (status, detail) =
        logged.timer_status(delivery.as_ref().err(), found.unwrap_or_default());
    complete_command_timer(&mut timer, status, detail);
    delivery?;
    Ok(())
}

async fn deliver_first_page(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    status_message: Option<MessageId>,
    user_id: i64,
    total: usize,
    label: &str,
) -> Result<usize> {
    update_status(
        bot,
        chat_id,
        status_message,
        &format!(
            "✅ Found {total} stories from {label}. Sending page 1/{}...",
            total_pages(total)
        ),
    )
    .await?;
    render_page(bot, state, chat_id, user_id, 0).await
}

async fn record_request(state: &AppState, request: RequestInsert) {
    if let Err(err) = state.db.insert_request(&request).await {
        warn!("Failed to save request log: {err}");
    }
    if let Err(err) = state.db.update_daily_stats().await {
        warn!("Failed to update daily statistics: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::db::database::Database;
    use crate::stories::engine::{EngineSettings, StoryEngine};
    use crate::stories::source::fake::{bare_story, story, target, FakeSource};
    use crate::stories::types::InputKind;

    fn state_with(source: FakeSource) -> AppState {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BOT_TOKEN", "123:abc"),
            ("USERBOT_API_ID", "1"),
            ("USERBOT_API_HASH", "hash"),
            ("USERBOT_PHONE", "+10000000000"),
            ("REQUEST_TIMEOUT", "5"),
        ]);
        let config = Config::from_lookup(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();
        let engine = StoryEngine::new(
            Arc::new(source),
            EngineSettings {
                max_stories: 10,
                download_concurrency: 2,
                download_timeout: Duration::from_secs(5),
            },
        );
        AppState::new(Arc::new(config), Database::unconnected(), Arc::new(engine))
    }

    #[tokio::test]
    async fn retrieves_stories_for_a_bare_username() {
        let mut source = FakeSource::default();
        source
            .usernames
            .insert("@durov".to_string(), target(1, "Pavel Durov"));
        source.active = vec![story(1), bare_story(2), story(3)];
        source.pinned = vec![story(4)];
        let state = state_with(source);

        let (resolved, items) = retrieve(&state, "durov", CategoryFilter::All).await.unwrap();
        assert_eq!(resolved.kind, InputKind::Username);
        assert_eq!(resolved.target.display_name, "Pavel Durov");
        let ids: Vec<i32> = items.iter().map(|item| item.story_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn unknown_target_and_empty_results_are_distinct() {
        let mut source = FakeSource::default();
        source.usernames.insert("@empty".to_string(), target(2, "Empty"));
        source.active = vec![bare_story(1)];
        let state = state_with(source);

        assert_eq!(
            retrieve(&state, "@nobody", CategoryFilter::All).await.unwrap_err(),
            RetrievalError::TargetNotFound
        );
        assert_eq!(
            retrieve(&state, "@empty", CategoryFilter::Active).await.unwrap_err(),
            RetrievalError::NoStories
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_while_listing_waits_then_returns_stories() {
        let mut source = FakeSource::default();
        source.phones.insert("+998901234567".to_string(), target(3, "Phone"));
        source.active = vec![story(1), story(2)];
        source
            .active_errors_once
            .lock()
            .push_back(SourceError::FloodWait(17));
        let state = state_with(source);

        let started = tokio::time::Instant::now();
        let (_, items) = retrieve(&state, "+998901234567", CategoryFilter::Active)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(17));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn request_log_counts_only_delivered_stories() {
        assert_eq!(
            LoggedOutcome::new(Ok(12), 5),
            LoggedOutcome {
                success: true,
                stories_count: 5,
                error_message: None,
            }
        );
        assert_eq!(
            LoggedOutcome::new(Ok(12), 0),
            LoggedOutcome {
                success: false,
                stories_count: 0,
                error_message: Some("Failed to deliver stories".to_string()),
            }
        );
        assert_eq!(
            LoggedOutcome::new(Err(&RetrievalError::NoStories), 0),
            LoggedOutcome {
                success: false,
                stories_count: 0,
                error_message: Some("No stories found".to_string()),
            }
        );
    }

    #[test]
    fn timer_finishes_as_error_when_delivery_fails() {
        let delivered = LoggedOutcome::new(Ok(12), 5);
        assert_eq!(
            delivered.timer_status(None, 12),
            ("success", Some("stories=5/12".to_string()))
        );

        let send_failure = anyhow::anyhow!("Bad Request: chat not found");
        assert_eq!(
            LoggedOutcome::new(Ok(12), 0).timer_status(Some(&send_failure), 12),
            ("error", Some("Bad Request: chat not found".to_string()))
        );
        assert_eq!(
            LoggedOutcome::new(Err(&RetrievalError::TargetNotFound), 0).timer_status(None, 0),
            ("error", Some("User not found".to_string()))
        );
    }

    fn callback_data(keyboard: &InlineKeyboardMarkup) -> Vec<String> {
        keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|button| match &button.kind {
                teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn prompt_offers_each_category_for_the_raw_text() {
        let keyboard = category_keyboard("@durov").unwrap();
        assert_eq!(
            callback_data(&keyboard),
            vec!["dl_active:@durov", "dl_pinned:@durov", "dl_all:@durov", "help"]
        );
    }

    #[test]
    fn oversized_targets_skip_the_prompt() {
        let long = format!("t.me/{}/s/1", "a".repeat(60));
        assert!(category_keyboard(&long).is_none());
    }

    #[test]
    fn source_errors_map_to_request_outcomes() {
        assert_eq!(
            RetrievalError::from(SourceError::FloodWait(42)),
            RetrievalError::RateLimited(42)
        );
        assert_eq!(
            RetrievalError::from(SourceError::InvalidPhone),
            RetrievalError::InvalidPhone
        );
        assert_eq!(
            RetrievalError::from_resolution(SourceError::Rpc("USERNAME_INVALID".into())),
            RetrievalError::TargetNotFound
        );
        assert_eq!(
            RetrievalError::from(SourceError::Timeout),
            RetrievalError::Unclassified("request timed out".into())
        );
    }

    #[test]
    fn logged_error_summaries_are_stable() {
        assert_eq!(RetrievalError::TargetNotFound.to_string(), "User not found");
        assert_eq!(RetrievalError::InvalidPhone.to_string(), "Invalid phone number");
        assert_eq!(RetrievalError::NoStories.to_string(), "No stories found");
        assert_eq!(RetrievalError::RateLimited(30).to_string(), "FloodWait: 30s");
        assert!(RetrievalError::Unclassified("boom".into())
            .user_message()
            .contains("/help"));
    }
}

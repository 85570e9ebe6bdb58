use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::{debug, info, warn};

use crate::handlers::access::owns_session;
use crate::handlers::commands::HELP_TEXT;
use crate::handlers::responses::{send_story_page, send_text_with_retry};
use crate::session::{PageError, PageView};
use crate::state::AppState;
use crate::stories::pagination::{navigation_row, MAX_UPLOAD_BYTES, PAGE_SIZE};
use crate::stories::types::{DownloadedStory, StoryItem};
use crate::utils::telegram::{start_chat_action_heartbeat, telegram_user_id};

pub const SESSION_EXPIRED_TEXT: &str = "⌛ Session expired. Send the username again.";
const FOREIGN_SESSION_TEXT: &str = "These buttons belong to another user.";
const NO_SUCH_PAGE_TEXT: &str = "There is no such page.";

pub fn navigation_keyboard(user_id: i64, page: usize, total_pages: usize) -> InlineKeyboardMarkup {
    let row = navigation_row(user_id, page, total_pages)
        .into_iter()
        .map(|button| InlineKeyboardButton::callback(button.label, button.action.to_data()))
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

fn story_caption(item: &StoryItem, position: usize, total: usize) -> String {
    format!(
        "📸 Story #{position}/{total}\n📌 Type: {}\n🆔 ID: {}",
        item.category.label(),
        item.story_id
    )
}

fn navigation_text(view: &PageView) -> String {
    format!(
        "📄 Page {}/{} · {} {} stories from {}",
        view.page + 1,
        view.total_pages,
        view.total_items,
        view.filter.as_str(),
        view.target_label
    )
}

/// Stories on this page that can actually be uploaded, with their captions.
fn deliverable(
    view: &PageView,
    downloaded: Vec<DownloadedStory>,
) -> (Vec<DownloadedStory>, Vec<String>) {
    let first_position = view.page * PAGE_SIZE + 1;
    let mut stories = Vec::with_capacity(downloaded.len());
    let mut captions = Vec::with_capacity(downloaded.len());
    for story in downloaded {
        if story.size() > MAX_UPLOAD_BYTES {
            warn!(
                "Skipping story {}: {} bytes exceeds the upload limit",
                story.item.story_id,
                story.size()
            );
            continue;
        }
        let offset = view
            .items
            .iter()
            .position(|item| {
                item.story_id == story.item.story_id && item.category == story.item.category
            })
            .unwrap_or_default();
        captions.push(story_caption(
            &story.item,
            first_position + offset,
            view.total_items,
        ));
        stories.push(story);
    }
    (stories, captions)
}

/// Downloads and sends one page of the user's session, then the
/// navigation controls. Returns how many stories were delivered.
pub async fn render_page(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    page: usize,
) -> Result<usize> {
    match state.sessions.view_page(user_id, page) {
        Ok(view) => deliver_page(bot, state, chat_id, user_id, view).await,
        Err(PageError::Expired) => {
            send_text_with_retry(bot, chat_id, SESSION_EXPIRED_TEXT, None).await?;
            Ok(0)
        }
        Err(PageError::OutOfRange) => {
            debug!("Ignoring request for page {page} of user {user_id}: out of range");
            Ok(0)
        }
    }
}

async fn deliver_page(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    view: PageView,
) -> Result<usize> {
    let page = view.page;
    let _heartbeat = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::UploadPhoto);
    let downloaded = state.engine.download_batch(&view.items).await;
    let (stories, captions) = deliverable(&view, downloaded);

    if stories.is_empty() {
        warn!("Page {} for user {user_id} has no deliverable media", page + 1);
        send_text_with_retry(
            bot,
            chat_id,
            &format!("❌ Could not load page {}. Try again later.", page + 1),
            None,
        )
        .await?;
        return Ok(0);
    }

    if let Err(err) = send_story_page(bot, chat_id, &stories, &captions).await {
        warn!("Failed to send page {} to user {user_id}: {err}", page + 1);
        send_text_with_retry(
            bot,
            chat_id,
            &format!("❌ Could not send page {}. Try again later.", page + 1),
            None,
        )
        .await?;
        return Ok(0);
    }

    tokio::time::sleep(state.config.app.flood_wait_delay).await;
    send_text_with_retry(
        bot,
        chat_id,
        &navigation_text(&view),
        Some(navigation_keyboard(user_id, view.page, view.total_pages)),
    )
    .await?;

    info!(
        "Sent page {}/{} ({} stories) to user {user_id}",
        view.page + 1,
        view.total_pages,
        stories.len()
    );
    Ok(stories.len())
}

/// Toast shown when a page button is pressed.
fn page_answer(result: &Result<PageView, PageError>, page: usize) -> String {
    match result {
        Ok(_) => format!("Loading page {}...", page + 1),
        Err(PageError::Expired) => SESSION_EXPIRED_TEXT.to_string(),
        Err(PageError::OutOfRange) => NO_SUCH_PAGE_TEXT.to_string(),
    }
}

pub async fn page_callback(
    bot: Bot,
    state: AppState,
    query: CallbackQuery,
    user_id: i64,
    page: usize,
) -> Result<()> {
    if !owns_session(&query, user_id) {
        bot.answer_callback_query(query.id.clone())
            .text(FOREIGN_SESSION_TEXT)
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let result = state.sessions.view_page(user_id, page);
    bot.answer_callback_query(query.id.clone())
        .text(page_answer(&result, page))
        .await?;
    let (Ok(view), Some(message)) = (result, query.message.as_ref()) else {
        return Ok(());
    };
    deliver_page(&bot, &state, message.chat().id, user_id, view).await?;
    Ok(())
}

pub async fn close_callback(
    bot: Bot,
    state: AppState,
    query: CallbackQuery,
    user_id: i64,
) -> Result<()> {
    if !owns_session(&query, user_id) {
        bot.answer_callback_query(query.id.clone())
            .text(FOREIGN_SESSION_TEXT)
            .show_alert(true)
            .await?;
        return Ok(());
    }

    if state.sessions.close(user_id) {
        debug!("Closed story session of user {user_id}");
    }
    bot.answer_callback_query(query.id.clone())
        .text("Closed")
        .await?;

    if let Some(message) = query.message.as_ref() {
        if let Err(err) = bot.delete_message(message.chat().id, message.id()).await {
            debug!("Could not delete navigation message: {err}");
        }
    }
    Ok(())
}

pub async fn page_info_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let user_id = telegram_user_id(&query.from);
    let text = match state.sessions.current_page(user_id) {
        Some(page) => format!("You are on page {}", page + 1),
        None => SESSION_EXPIRED_TEXT.to_string(),
    };
    bot.answer_callback_query(query.id.clone()).text(text).await?;
    Ok(())
}

#[allow(deprecated)]
pub async fn help_callback(bot: Bot, query: CallbackQuery) -> Result<()> {
    bot.answer_callback_query(query.id.clone()).await?;
    if let Some(message) = query.message.as_ref() {
        bot.send_message(message.chat().id, HELP_TEXT)
            .parse_mode(ParseMode::Markdown)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stories::source::fake::media_ref;
    use crate::stories::types::{CategoryFilter, MediaKind, StoryCategory};

    fn item(id: i32, category: StoryCategory) -> StoryItem {
        StoryItem {
            story_id: id,
            category,
            kind: MediaKind::Photo,
            media: media_ref(i64::from(id), None),
        }
    }

    fn view(page: usize, items: Vec<StoryItem>) -> PageView {
        PageView {
            items,
            page,
            total_pages: 3,
            total_items: 12,
            filter: CategoryFilter::All,
            target_label: "Pavel Durov".to_string(),
        }
    }

    fn labels(keyboard: &InlineKeyboardMarkup) -> Vec<String> {
        keyboard.inline_keyboard[0]
            .iter()
            .map(|button| button.text.clone())
            .collect()
    }

    #[test]
    fn keyboard_follows_the_navigation_row() {
        assert_eq!(
            labels(&navigation_keyboard(7, 1, 3)),
            vec!["⬅️ Previous", "2/3", "Next ➡️", "❌ Close"]
        );
        assert_eq!(labels(&navigation_keyboard(7, 0, 1)), vec!["1/1", "❌ Close"]);
    }

    #[test]
    fn captions_number_stories_across_pages() {
        let items = vec![
            item(10, StoryCategory::Active),
            item(11, StoryCategory::Pinned),
            item(12, StoryCategory::Pinned),
        ];
        let mut page = view(2, items.clone());
        page.total_items = 13;
        let downloaded = vec![
            DownloadedStory {
                item: items[0].clone(),
                bytes: vec![1],
            },
            DownloadedStory {
                item: items[2].clone(),
                bytes: vec![2],
            },
        ];

        let (stories, captions) = deliverable(&page, downloaded);
        assert_eq!(stories.len(), 2);
        assert_eq!(captions[0], "📸 Story #11/13\n📌 Type: Active\n🆔 ID: 10");
        assert_eq!(captions[1], "📸 Story #13/13\n📌 Type: Pinned\n🆔 ID: 12");
    }

    #[test]
    fn oversized_downloads_are_left_out_of_the_page() {
        let items = vec![
            item(1, StoryCategory::Active),
            item(2, StoryCategory::Active),
            item(3, StoryCategory::Pinned),
        ];
        let downloaded = items
            .iter()
            .map(|item| DownloadedStory {
                item: item.clone(),
                bytes: if item.story_id == 2 {
                    vec![0; MAX_UPLOAD_BYTES as usize + 1]
                } else {
                    vec![0; 8]
                },
            })
            .collect();

        let (stories, captions) = deliverable(&view(0, items), downloaded);
        let ids: Vec<i32> = stories.iter().map(|story| story.item.story_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(captions[1], "📸 Story #3/12\n📌 Type: Pinned\n🆔 ID: 3");
    }

    #[test]
    fn page_buttons_answer_by_session_state() {
        let page = view(1, vec![item(6, StoryCategory::Active)]);
        assert_eq!(page_answer(&Ok(page), 1), "Loading page 2...");
        assert_eq!(
            page_answer(&Err(PageError::Expired), 1),
            SESSION_EXPIRED_TEXT
        );
        assert_eq!(
            page_answer(&Err(PageError::OutOfRange), 7),
            "There is no such page."
        );
    }

    #[test]
    fn navigation_text_names_page_and_target() {
        let page = view(0, vec![item(1, StoryCategory::Active)]);
        assert_eq!(
            navigation_text(&page),
            "📄 Page 1/3 · 12 all stories from Pavel Durov"
        );
    }
}

use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile, InputMedia, MessageId};
use teloxide::RequestError;
use tracing::warn;

use crate::stories::types::{DownloadedStory, MediaKind};

const TELEGRAM_RETRY_ATTEMPTS: usize = 3;

fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

async fn back_off(err: RequestError, delay: &mut Duration) {
    if let RequestError::RetryAfter(wait) = err {
        tokio::time::sleep(wait.duration()).await;
    } else {
        tokio::time::sleep(*delay).await;
        *delay *= 2;
    }
}

pub async fn send_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut request = bot.send_message(chat_id, text.to_string());
        if let Some(keyboard) = keyboard.clone() {
            request = request.reply_markup(keyboard);
        }
        match request.await {
            Ok(message) => return Ok(message),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("send_message attempt {attempt} failed: {err}");
                back_off(err, &mut delay).await;
            }
        }
    }
}

pub async fn edit_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut request = bot.edit_message_text(chat_id, message_id, text.to_string());
        if let Some(keyboard) = keyboard.clone() {
            request = request.reply_markup(keyboard);
        }
        match request.await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("edit_message_text attempt {attempt} failed: {err}");
                back_off(err, &mut delay).await;
            }
        }
    }
}

/// Edits the status message, falling back to a fresh message when the edit
/// is rejected (deleted message, identical text and so on).
pub async fn update_status(
    bot: &Bot,
    chat_id: ChatId,
    status_message: Option<MessageId>,
    text: &str,
) -> Result<()> {
    if let Some(message_id) = status_message {
        match edit_text_with_retry(bot, chat_id, message_id, text, None).await {
            Ok(()) => return Ok(()),
            Err(err) => warn!("Failed to edit status message: {err}"),
        }
    }
    send_text_with_retry(bot, chat_id, text, None).await?;
    Ok(())
}

fn input_file(story: &DownloadedStory) -> InputFile {
    InputFile::memory(story.bytes.clone()).file_name(story.file_name())
}

fn input_media(story: &DownloadedStory, caption: &str) -> InputMedia {
    match story.item.kind {
        MediaKind::Photo => InputMedia::Photo(
            teloxide::types::InputMediaPhoto::new(input_file(story)).caption(caption.to_string()),
        ),
        MediaKind::Video => InputMedia::Video(
            teloxide::types::InputMediaVideo::new(input_file(story))
                .caption(caption.to_string())
                .supports_streaming(true),
        ),
    }
}

async fn send_single(bot: &Bot, chat_id: ChatId, story: &DownloadedStory, caption: &str) -> Result<()> {
    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match story.item.kind {
            MediaKind::Photo => bot
                .send_photo(chat_id, input_file(story))
                .caption(caption.to_string())
                .await
                .map(|_| ()),
            MediaKind::Video => bot
                .send_video(chat_id, input_file(story))
                .caption(caption.to_string())
                .supports_streaming(true)
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("send media attempt {attempt} failed: {err}");
                back_off(err, &mut delay).await;
            }
        }
    }
}

/// Sends one page of stories as a single message.
///
/// Telegram albums need two to ten items, so a lone story goes out as a
/// plain photo or video instead.
pub async fn send_story_page(
    bot: &Bot,
    chat_id: ChatId,
    stories: &[DownloadedStory],
    captions: &[String],
) -> Result<()> {
    if let [story] = stories {
        let caption = captions.first().map(String::as_str).unwrap_or_default();
        return send_single(bot, chat_id, story, caption).await;
    }

    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let media: Vec<InputMedia> = stories
            .iter()
            .zip(captions)
            .map(|(story, caption)| input_media(story, caption))
            .collect();
        match bot.send_media_group(chat_id, media).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("send_media_group attempt {attempt} failed: {err}");
                back_off(err, &mut delay).await;
            }
        }
    }
}

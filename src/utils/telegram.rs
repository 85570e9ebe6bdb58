use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, User};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::db::models::UserUpsert;

const CHAT_ACTION_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

pub struct ChatActionHeartbeat {
    task_handle: Option<JoinHandle<()>>,
}

impl Drop for ChatActionHeartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Keeps "uploading photo" style indicators alive while a page is prepared.
pub fn start_chat_action_heartbeat(
    bot: Bot,
    chat_id: ChatId,
    action: ChatAction,
) -> ChatActionHeartbeat {
    let task_handle = tokio::spawn(async move {
        loop {
            if let Err(err) = bot.send_chat_action(chat_id, action.clone()).await {
                warn!("send_chat_action failed: {err}");
            }
            tokio::time::sleep(CHAT_ACTION_HEARTBEAT_INTERVAL).await;
        }
    });

    ChatActionHeartbeat {
        task_handle: Some(task_handle),
    }
}

pub fn telegram_user_id(user: &User) -> i64 {
    i64::try_from(user.id.0).unwrap_or_default()
}

pub fn user_upsert(user: &User) -> UserUpsert {
    UserUpsert {
        user_id: telegram_user_id(user),
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
        last_name: user.last_name.clone(),
    }
}

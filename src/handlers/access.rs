use teloxide::prelude::*;
use teloxide::types::User;
use tracing::{info, warn};

use crate::state::AppState;
use crate::utils::telegram::{telegram_user_id, user_upsert};

/// Records the user as active; a failed write is logged and ignored.
pub async fn remember_user(state: &AppState, user: Option<&User>) {
    let Some(user) = user else {
        return;
    };
    if let Err(err) = state.db.upsert_user(&user_upsert(user)).await {
        warn!("Failed to save user {}: {err}", user.id);
    }
}

pub async fn check_admin_access(
    bot: &Bot,
    state: &AppState,
    message: &Message,
    command: &str,
) -> bool {
    let user_id = message
        .from
        .as_ref()
        .map(telegram_user_id)
        .unwrap_or_default();

    if state.config.is_admin(user_id) {
        return true;
    }

    info!("Refused admin command /{command} from user {user_id}");
    let _ = bot
        .send_message(message.chat.id, "This command is only available to bot administrators.")
        .await;
    false
}

/// Navigation buttons carry the id of the user whose session they drive.
pub fn owns_session(query: &CallbackQuery, session_user_id: i64) -> bool {
    telegram_user_id(&query.from) == session_user_id
}

use anyhow::Result;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};
use tracing::warn;

use crate::db::models::{GlobalStats, UserStats};
use crate::handlers::access::{check_admin_access, remember_user};
use crate::state::AppState;
use crate::utils::telegram::telegram_user_id;
use crate::utils::timing::{complete_command_timer, start_command_timer};

pub const HELP_TEXT: &str = "
📖 *Help*

*Supported formats:*
• `@username` - username with @
• `durov` - username without @
• `+998901234567` - phone number
• `t.me/username/s/123456` - direct story link

*Examples:*
```
@durov
durov
+79001234567
t.me/durov/s/123456
```

After you send a target, pick which stories you want:
• Active - stories that are currently live
• Pinned - stories kept on the profile
• All - both, active first

Stories arrive five at a time; use the buttons under each page to move between pages.

*Commands:*
• /start - Start the bot
• /help - This help
• /stats - Statistics
• /about - About the bot
";

const WELCOME_TEXT: &str = "
🕵️ *Telegram Stories Viewer Bot*

View anyone's Telegram stories anonymously!

📝 *How to use:*
• Send a username: `@username`
• Username without @: `username`
• Phone number: `+998901234567`
• Story link: `t.me/username/s/123456`

✨ *What the bot fetches:*
• 📌 Active stories
• 📍 Pinned stories

⚡️ Send a username, phone number or link to begin!

📊 Statistics: /stats
❓ Help: /help
";

const ABOUT_TEXT: &str = "
ℹ️ *About*

🕵️ Telegram Stories Viewer Bot lets you watch stories anonymously.

*Built with:*
• Rust
• grammers (MTProto)
• teloxide (Bot API)
• PostgreSQL

*Features:*
✅ Active stories
✅ Pinned stories
✅ Photos and videos
✅ Lookup by username, phone or link
";

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn format_stats(user: &UserStats, global: &GlobalStats) -> String {
    format!(
        "📊 Your statistics:\n\
         • Requests: {}\n\
         • Successful: {}\n\
         • Stories fetched: {}\n\
         \n\
         🌍 Global statistics:\n\
         • Total users: {}\n\
         • Active users: {}\n\
         • Total requests: {}\n\
         • Requests today: {}\n\
         • Stories fetched: {}",
        user.total_requests,
        user.successful_requests,
        user.total_stories,
        group_thousands(global.total_users),
        group_thousands(global.active_users),
        group_thousands(global.total_requests),
        group_thousands(global.today_requests),
        group_thousands(global.total_stories),
    )
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

async fn build_status_report(state: &AppState) -> String {
    let db_result = state.db.health_check().await;
    let db_status = if db_result.is_ok() { "ok" } else { "error" };
    let db_detail = db_result.err().map(|err| err.to_string());

    let mut report = String::new();
    report.push_str("Status snapshot\n");
    report.push_str(&format!("time_utc: {}\n", Utc::now().to_rfc3339()));
    report.push_str(&format!("db: {db_status}\n"));
    if let Some(detail) = db_detail {
        report.push_str(&format!("db_error: {detail}\n"));
    }
    match state.db.get_today_statistic().await {
        Ok(Some(today)) => report.push_str(&format!(
            "today: requests={} successful={} failed={} stories={}\n",
            today.total_requests,
            today.successful_requests,
            today.failed_requests,
            today.total_stories
        )),
        Ok(None) => report.push_str("today: no requests yet\n"),
        Err(err) => report.push_str(&format!("today_error: {err}\n")),
    }
    report.push_str(&format!("live_sessions: {}\n", state.sessions.len()));
    report.push_str(&format!(
        "download_permits: free={} max={}\n",
        state.engine.available_permits(),
        state.config.app.download_concurrency
    ));
    report.push_str(&format!(
        "max_stories_per_request: {}\n",
        state.engine.max_stories()
    ));
    report.push_str(&format!("debug: {}\n", bool_label(state.config.app.debug)));
    report
}

#[allow(deprecated)]
pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    remember_user(&state, message.from.as_ref()).await;
    bot.send_message(message.chat.id, WELCOME_TEXT)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

#[allow(deprecated)]
pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, HELP_TEXT)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

#[allow(deprecated)]
pub async fn about_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, ABOUT_TEXT)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

pub async fn stats_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("stats", &message);
    remember_user(&state, message.from.as_ref()).await;
    let user_id = message
        .from
        .as_ref()
        .map(telegram_user_id)
        .unwrap_or_default();

    let stats = tokio::try_join!(
        state.db.get_user_stats(user_id),
        state.db.get_global_stats()
    );
    let text = match stats {
        Ok((user, global)) => format_stats(&user, &global),
        Err(err) => {
            warn!("Failed to load statistics: {err}");
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            bot.send_message(message.chat.id, "❌ Statistics are unavailable right now.")
                .reply_parameters(ReplyParameters::new(message.id))
                .await?;
            return Ok(());
        }
    };

    bot.send_message(message.chat.id, text)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}

pub async fn status_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    if !check_admin_access(&bot, &state, &message, "status").await {
        return Ok(());
    }

    let report = build_status_report(&state).await;
    bot.send_message(message.chat.id, report)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

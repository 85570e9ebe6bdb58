use std::time::Instant;

use chrono::{DateTime, Utc};
use teloxide::types::{CallbackQuery, Message};
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

const MAX_LOGGED_TEXT_CHARS: usize = 300;

#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: Option<i64>,
    user_id: Option<i64>,
    username: Option<String>,
    text: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

fn loggable_text(value: &str) -> String {
    value
        .replace('\n', " ")
        .chars()
        .take(MAX_LOGGED_TEXT_CHARS)
        .collect()
}

impl CommandTimer {
    fn new(
        command: &str,
        chat_id: Option<i64>,
        user: Option<&teloxide::types::User>,
        text: Option<&str>,
    ) -> Self {
        CommandTimer {
            command: command.to_string(),
            chat_id,
            user_id: user.and_then(|u| i64::try_from(u.id.0).ok()),
            username: user.and_then(|u| u.username.clone()),
            text: text.map(loggable_text),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn from_message(command: &str, message: &Message) -> Self {
        CommandTimer::new(
            command,
            Some(message.chat.id.0),
            message.from.as_ref(),
            message.text(),
        )
    }

    pub fn from_callback(command: &str, query: &CallbackQuery) -> Self {
        CommandTimer::new(
            command,
            query.message.as_ref().map(|message| message.chat().id.0),
            Some(&query.from),
            query.data.as_deref(),
        )
    }

    pub fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            "event=command_received command={} chat_id={:?} user_id={:?} username={:?} received_at={} text={:?}",
            self.command,
            self.chat_id,
            self.user_id,
            self.username,
            self.started_at.to_rfc3339(),
            self.text
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_perf.elapsed().as_secs_f64()
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        info!(
            target: TIMING_TARGET,
            "event=command_completed command={} chat_id={:?} user_id={:?} started_at={} response_sent_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            self.elapsed_secs(),
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.mark_status("aborted", None);
            self.log_completed();
        }
    }
}

pub fn start_command_timer(command: &str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    timer.log_received();
    timer
}

pub fn start_callback_timer(command: &str, query: &CallbackQuery) -> CommandTimer {
    let timer = CommandTimer::from_callback(command, query);
    timer.log_received();
    timer
}

pub fn complete_command_timer(timer: &mut CommandTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

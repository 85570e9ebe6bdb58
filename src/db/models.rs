use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct UserUpsert {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequestInsert {
    pub user_id: i64,
    pub target: String,
    pub request_type: String,
    pub category: String,
    pub stories_count: i32,
    pub success: bool,
    pub error_message: Option<String>,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct UserStats {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub total_stories: i64,
}

#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_users: i64,
    pub active_users: i64,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub total_stories: i64,
    pub today_requests: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyStatisticRow {
    pub date: NaiveDate,
    pub total_users: i64,
    pub active_users: i64,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub total_stories: i64,
}

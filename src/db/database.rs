use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::db::models::{DailyStatisticRow, GlobalStats, RequestInsert, UserStats, UserUpsert};

const TARGET_MAX_CHARS: usize = 255;

const SCHEMA: [&str; 7] = [
    "CREATE TABLE IF NOT EXISTS users (\
        user_id BIGINT PRIMARY KEY,\
        username VARCHAR(255),\
        first_name VARCHAR(255),\
        last_name VARCHAR(255),\
        is_active BOOLEAN NOT NULL DEFAULT TRUE,\
        is_blocked BOOLEAN NOT NULL DEFAULT FALSE,\
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\
        last_active TIMESTAMPTZ NOT NULL DEFAULT NOW()\
    )",
    "CREATE TABLE IF NOT EXISTS requests (\
        id BIGSERIAL PRIMARY KEY,\
        user_id BIGINT NOT NULL REFERENCES users(user_id),\
        target VARCHAR(255) NOT NULL,\
        request_type VARCHAR(50) NOT NULL,\
        category VARCHAR(16) NOT NULL DEFAULT 'all',\
        stories_count INT NOT NULL DEFAULT 0,\
        success BOOLEAN NOT NULL DEFAULT FALSE,\
        error_message TEXT,\
        processing_time DOUBLE PRECISION NOT NULL DEFAULT 0,\
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\
    )",
    "CREATE TABLE IF NOT EXISTS statistics (\
        id SERIAL PRIMARY KEY,\
        date DATE NOT NULL UNIQUE DEFAULT CURRENT_DATE,\
        total_users BIGINT NOT NULL DEFAULT 0,\
        active_users BIGINT NOT NULL DEFAULT 0,\
        total_requests BIGINT NOT NULL DEFAULT 0,\
        successful_requests BIGINT NOT NULL DEFAULT 0,\
        failed_requests BIGINT NOT NULL DEFAULT 0,\
        total_stories BIGINT NOT NULL DEFAULT 0\
    )",
    "CREATE INDEX IF NOT EXISTS idx_requests_user_id ON requests(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_requests_success ON requests(success)",
    "CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_statistics_date ON statistics(date)",
];

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn init(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_pool_size)
            .max_connections(config.max_pool_size)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("Database tables created successfully");
        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_user(&self, user: &UserUpsert) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name, last_active) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET \
             username = EXCLUDED.username, \
             first_name = EXCLUDED.first_name, \
             last_name = EXCLUDED.last_name, \
             last_active = EXCLUDED.last_active, \
             is_active = TRUE",
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_request(&self, request: &RequestInsert) -> Result<i64> {
        let target: String = request.target.chars().take(TARGET_MAX_CHARS).collect();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO requests \
             (user_id, target, request_type, category, stories_count, success, error_message, processing_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(request.user_id)
        .bind(target)
        .bind(&request.request_type)
        .bind(&request.category)
        .bind(request.stories_count)
        .bind(request.success)
        .bind(&request.error_message)
        .bind(request.processing_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Rebuilds today's statistics row from the raw tables.
    pub async fn update_daily_stats(&self) -> Result<()> {
        sqlx::query(
            "INSERT INTO statistics (date, total_users, active_users, total_requests, \
                                     successful_requests, failed_requests, total_stories) \
             SELECT CURRENT_DATE, \
                    (SELECT COUNT(*) FROM users), \
                    (SELECT COUNT(*) FROM users WHERE last_active::date = CURRENT_DATE), \
                    (SELECT COUNT(*) FROM requests WHERE created_at::date = CURRENT_DATE), \
                    (SELECT COUNT(*) FROM requests WHERE created_at::date = CURRENT_DATE AND success), \
                    (SELECT COUNT(*) FROM requests WHERE created_at::date = CURRENT_DATE AND NOT success), \
                    (SELECT COALESCE(SUM(stories_count), 0) FROM requests WHERE created_at::date = CURRENT_DATE) \
             ON CONFLICT (date) DO UPDATE SET \
             total_users = EXCLUDED.total_users, \
             active_users = EXCLUDED.active_users, \
             total_requests = EXCLUDED.total_requests, \
             successful_requests = EXCLUDED.successful_requests, \
             failed_requests = EXCLUDED.failed_requests, \
             total_stories = EXCLUDED.total_stories",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user_stats(&self, user_id: i64) -> Result<UserStats> {
        let stats = sqlx::query_as::<_, UserStats>(
            "SELECT COUNT(*) AS total_requests, \
                    COUNT(*) FILTER (WHERE success) AS successful_requests, \
                    COALESCE(SUM(stories_count), 0)::BIGINT AS total_stories \
             FROM requests WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let stats = sqlx::query_as::<_, GlobalStats>(
            "SELECT (SELECT COUNT(*) FROM users) AS total_users, \
                    (SELECT COUNT(*) FROM users WHERE is_active) AS active_users, \
                    (SELECT COUNT(*) FROM requests) AS total_requests, \
                    (SELECT COUNT(*) FROM requests WHERE success) AS successful_requests, \
                    (SELECT COALESCE(SUM(stories_count), 0)::BIGINT FROM requests) AS total_stories, \
                    (SELECT COUNT(*) FROM requests WHERE created_at::date = CURRENT_DATE) AS today_requests",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn get_today_statistic(&self) -> Result<Option<DailyStatisticRow>> {
        let row = sqlx::query_as::<_, DailyStatisticRow>(
            "SELECT date, total_users, active_users, total_requests, successful_requests, \
                    failed_requests, total_stories \
             FROM statistics WHERE date = CURRENT_DATE",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// A handle whose pool never connects, for code paths that must not touch storage.
    #[cfg(test)]
    pub fn unconnected() -> Self {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(50))
            .connect_lazy("postgres://localhost:1/unused")
            .expect("lazy pool");
        Database { pool }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use once_cell::sync::Lazy;
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    static NEXT_USER: AtomicI64 = AtomicI64::new(0);
    static SCHEMA_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

    /// Connects to the scratch database named by `TEST_DATABASE_URL`.
    ///
    /// The tests below are ignored by default; run them with
    /// `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
    async fn test_db() -> Database {
        let url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must point at a scratch Postgres database");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");
        let _guard = SCHEMA_LOCK.lock().await;
        Database::from_pool(pool).await.expect("create schema")
    }

    fn unique_user_id() -> i64 {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        -(nanos.abs() % 1_000_000_000_000) - NEXT_USER.fetch_add(1, Ordering::SeqCst) - 1
    }

    fn user(user_id: i64, first_name: &str) -> UserUpsert {
        UserUpsert {
            user_id,
            username: Some(format!("user{}", user_id.abs())),
            first_name: Some(first_name.to_string()),
            last_name: None,
        }
    }

    fn request(user_id: i64, success: bool, stories_count: i32) -> RequestInsert {
        RequestInsert {
            user_id,
            target: "@durov".to_string(),
            request_type: "username".to_string(),
            category: "all".to_string(),
            stories_count,
            success,
            error_message: (!success).then(|| "No stories found".to_string()),
            processing_time: 0.25,
        }
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn upserting_a_user_twice_keeps_one_row_with_latest_name() {
        let db = test_db().await;
        let user_id = unique_user_id();

        db.upsert_user(&user(user_id, "First")).await.unwrap();
        db.upsert_user(&user(user_id, "Second")).await.unwrap();

        let rows: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT first_name FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&db.pool)
                .await
                .unwrap();
        assert_eq!(rows, vec![(Some("Second".to_string()),)]);
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn user_stats_aggregate_that_users_requests() {
        let db = test_db().await;
        let user_id = unique_user_id();
        db.upsert_user(&user(user_id, "Stats")).await.unwrap();
        db.insert_request(&request(user_id, true, 4)).await.unwrap();
        db.insert_request(&request(user_id, true, 3)).await.unwrap();
        db.insert_request(&request(user_id, false, 0)).await.unwrap();

        let stats = db.get_user_stats(user_id).await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.total_stories, 7);
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn recomputing_daily_stats_keeps_one_row_per_day() {
        let db = test_db().await;
        let user_id = unique_user_id();
        db.upsert_user(&user(user_id, "Daily")).await.unwrap();
        db.insert_request(&request(user_id, true, 2)).await.unwrap();
        db.update_daily_stats().await.unwrap();
        db.insert_request(&request(user_id, false, 0)).await.unwrap();
        db.update_daily_stats().await.unwrap();

        let (rows,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM statistics WHERE date = CURRENT_DATE")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(rows, 1);

        let row = db.get_today_statistic().await.unwrap().unwrap();
        assert!(row.total_requests >= 2);
        assert!(row.failed_requests >= 1);
        assert_eq!(
            row.successful_requests + row.failed_requests,
            row.total_requests
        );
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn long_targets_are_truncated_on_insert() {
        let db = test_db().await;
        let user_id = unique_user_id();
        db.upsert_user(&user(user_id, "Long")).await.unwrap();
        let mut long = request(user_id, false, 0);
        long.target = "ы".repeat(400);
        let id = db.insert_request(&long).await.unwrap();

        let (length,): (i32,) = sqlx::query_as("SELECT LENGTH(target) FROM requests WHERE id = $1")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(length, 255);
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn global_stats_see_new_rows() {
        let db = test_db().await;
        let before = db.get_global_stats().await.unwrap();
        let user_id = unique_user_id();
        db.upsert_user(&user(user_id, "Global")).await.unwrap();
        db.insert_request(&request(user_id, true, 5)).await.unwrap();
        let after = db.get_global_stats().await.unwrap();
        assert!(after.total_users >= before.total_users + 1);
        assert!(after.today_requests >= before.today_requests + 1);
        assert!(after.total_stories >= before.total_stories + 5);
    }
}

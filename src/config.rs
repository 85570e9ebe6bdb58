use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration:\n{}", format_issues(.0))]
    Invalid(Vec<String>),
}

fn format_issues(issues: &[String]) -> String {
    issues
        .iter()
        .enumerate()
        .map(|(index, issue)| format!("  {}. {issue}", index + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub admin_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct UserbotConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
    pub session_name: String,
}

impl UserbotConfig {
    pub fn session_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.session", self.session_name))
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub debug: bool,
    pub log_level: String,
    pub max_stories_per_request: usize,
    pub request_timeout: Duration,
    /// Pause between consecutive bot sends while rendering one page.
    pub flood_wait_delay: Duration,
    pub download_concurrency: usize,
    pub session_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot: BotConfig,
    pub userbot: UserbotConfig,
    pub database: DatabaseConfig,
    pub app: AppConfig,
}

/// Reads variables through a lookup function and remembers every problem
/// instead of stopping at the first one.
struct EnvReader<F> {
    lookup: F,
    issues: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        EnvReader {
            lookup,
            issues: Vec::new(),
        }
    }

    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&mut self, name: &str) -> String {
        match self.raw(name) {
            Some(value) => value,
            None => {
                self.issues.push(format!("{name} is required"));
                String::new()
            }
        }
    }

    fn required_parsed<T>(&mut self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.raw(name) else {
            self.issues.push(format!("{name} is required"));
            return None;
        };
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                self.issues
                    .push(format!("{name} has invalid value '{value}': {err}"));
                None
            }
        }
    }

    fn parsed<T>(&mut self, name: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.raw(name) else {
            return default;
        };
        match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(err) => {
                self.issues
                    .push(format!("{name} has invalid value '{value}': {err}"));
                default
            }
        }
    }

    fn bool(&mut self, name: &str, default: bool) -> bool {
        let Some(value) = self.raw(name) else {
            return default;
        };
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                self.issues
                    .push(format!("{name} has invalid boolean value '{value}'"));
                default
            }
        }
    }

    fn at_least<T>(&mut self, name: &str, value: T, minimum: T) -> T
    where
        T: PartialOrd + Display + Copy,
    {
        if value < minimum {
            self.issues
                .push(format!("{name} must be at least {minimum}, got {value}"));
        }
        value
    }

    fn seconds(&mut self, name: &str, value: f64) -> Duration {
        match Duration::try_from_secs_f64(value) {
            Ok(duration) => duration,
            Err(err) => {
                self.issues.push(format!(
                    "{name} must be a non-negative number of seconds, got {value}: {err}"
                ));
                Duration::ZERO
            }
        }
    }

    fn id_list(&mut self, name: &str) -> Vec<i64> {
        let Some(value) = self.raw(name) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            match entry.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(_) => self
                    .issues
                    .push(format!("{name} contains a non-numeric id '{entry}'")),
            }
        }
        ids
    }
}


impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = EnvReader::new(lookup);

        let bot = BotConfig {
            token: reader.required("BOT_TOKEN"),
            admin_ids: reader.id_list("ADMIN_IDS"),
        };

        let api_id = reader.required_parsed::<i32>("USERBOT_API_ID");
        let userbot = UserbotConfig {
            api_id: api_id.unwrap_or_default(),
            api_hash: reader.required("USERBOT_API_HASH"),
            phone: reader.required("USERBOT_PHONE"),
            session_name: reader.string("USERBOT_SESSION", "userbot_session"),
        };

        let min_pool_size = reader.parsed::<u32>("DB_MIN_POOL_SIZE", 5);
        let max_pool_size = reader.parsed::<u32>("DB_MAX_POOL_SIZE", 20);
        let max_pool_size = reader.at_least("DB_MAX_POOL_SIZE", max_pool_size, 1);
        if min_pool_size > max_pool_size {
            reader.issues.push(format!(
                "DB_MIN_POOL_SIZE ({min_pool_size}) must not exceed DB_MAX_POOL_SIZE ({max_pool_size})"
            ));
        }
        let database = DatabaseConfig {
            host: reader.string("DB_HOST", "localhost"),
            port: reader.parsed::<u16>("DB_PORT", 5432),
            name: reader.string("DB_NAME", "stories_bot"),
            user: reader.string("DB_USER", "postgres"),
            password: reader.string("DB_PASS", ""),
            min_pool_size,
            max_pool_size,
        };

        let max_stories = reader.parsed::<usize>("MAX_STORIES_PER_REQUEST", 100);
        let request_timeout = reader.parsed::<u64>("REQUEST_TIMEOUT", 60);
        let flood_wait_delay = reader.parsed::<f64>("FLOOD_WAIT_DELAY", 0.5);
        let flood_wait_delay = reader.seconds("FLOOD_WAIT_DELAY", flood_wait_delay);
        let session_ttl = reader.parsed::<u64>("SESSION_TTL_SECONDS", 1800);
        let download_concurrency = reader.parsed::<usize>("DOWNLOAD_CONCURRENCY", 5);
        let app = AppConfig {
            debug: reader.bool("DEBUG", false),
            log_level: reader.string("LOG_LEVEL", "info").to_lowercase(),
            max_stories_per_request: reader.at_least("MAX_STORIES_PER_REQUEST", max_stories, 1),
            request_timeout: Duration::from_secs(reader.at_least(
                "REQUEST_TIMEOUT",
                request_timeout,
                1,
            )),
            flood_wait_delay,
            download_concurrency: reader.at_least(
                "DOWNLOAD_CONCURRENCY",
                download_concurrency,
                1,
            ),
            session_ttl: Duration::from_secs(reader.at_least(
                "SESSION_TTL_SECONDS",
                session_ttl,
                1,
            )),
        };

        if !reader.issues.is_empty() {
            return Err(ConfigError::Invalid(reader.issues));
        }

        Ok(Config {
            bot,
            userbot,
            database,
            app,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.bot.admin_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn required_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("BOT_TOKEN", "123:abc"),
            ("USERBOT_API_ID", "12345"),
            ("USERBOT_API_HASH", "hash"),
            ("USERBOT_PHONE", "+10000000000"),
        ]
    }

    fn issues_of(result: Result<Config, ConfigError>) -> Vec<String> {
        match result {
            Ok(_) => panic!("expected configuration to be rejected"),
            Err(ConfigError::Invalid(issues)) => issues,
        }
    }

    #[test]
    fn applies_defaults_when_only_required_values_are_set() {
        let config = Config::from_lookup(lookup_from(&required_pairs())).unwrap();
        assert_eq!(config.userbot.api_id, 12345);
        assert_eq!(config.userbot.session_name, "userbot_session");
        assert_eq!(
            config.userbot.session_path(),
            PathBuf::from("userbot_session.session")
        );
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.name, "stories_bot");
        assert_eq!(config.database.min_pool_size, 5);
        assert_eq!(config.database.max_pool_size, 20);
        assert_eq!(config.app.max_stories_per_request, 100);
        assert_eq!(config.app.request_timeout, Duration::from_secs(60));
        assert_eq!(config.app.flood_wait_delay, Duration::from_millis(500));
        assert_eq!(config.app.download_concurrency, 5);
        assert_eq!(config.app.log_level, "info");
        assert!(!config.app.debug);
        assert!(config.bot.admin_ids.is_empty());
    }

    #[test]
    fn lists_every_missing_required_variable() {
        let issues = issues_of(Config::from_lookup(lookup_from(&[])));
        assert_eq!(issues.len(), 4);
        for name in ["BOT_TOKEN", "USERBOT_API_ID", "USERBOT_API_HASH", "USERBOT_PHONE"] {
            assert!(
                issues.iter().any(|issue| issue.starts_with(name)),
                "missing issue for {name}: {issues:?}"
            );
        }
    }

    #[test]
    fn rejects_malformed_numbers_instead_of_defaulting() {
        let mut pairs = required_pairs();
        pairs.retain(|(key, _)| *key != "USERBOT_API_ID");
        pairs.push(("USERBOT_API_ID", "not-a-number"));
        pairs.push(("DB_PORT", "99999"));
        pairs.push(("MAX_STORIES_PER_REQUEST", "0"));
        let issues = issues_of(Config::from_lookup(lookup_from(&pairs)));
        assert_eq!(issues.len(), 3, "{issues:?}");
        assert!(issues.iter().any(|issue| issue.contains("USERBOT_API_ID")));
        assert!(issues.iter().any(|issue| issue.contains("DB_PORT")));
        assert!(issues.iter().any(|issue| issue.contains("MAX_STORIES_PER_REQUEST")));
    }

    #[test]
    fn rejects_pool_bounds_in_the_wrong_order() {
        let mut pairs = required_pairs();
        pairs.push(("DB_MIN_POOL_SIZE", "10"));
        pairs.push(("DB_MAX_POOL_SIZE", "2"));
        let issues = issues_of(Config::from_lookup(lookup_from(&pairs)));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("DB_MIN_POOL_SIZE"));
    }

    #[test]
    fn parses_admin_ids_and_tunables() {
        let mut pairs = required_pairs();
        pairs.push(("ADMIN_IDS", " 1, 2 ,,3"));
        pairs.push(("FLOOD_WAIT_DELAY", "1.5"));
        pairs.push(("DEBUG", "TRUE"));
        pairs.push(("LOG_LEVEL", "DEBUG"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.bot.admin_ids, vec![1, 2, 3]);
        assert!(config.is_admin(2));
        assert!(!config.is_admin(4));
        assert_eq!(config.app.flood_wait_delay, Duration::from_millis(1500));
        assert!(config.app.debug);
        assert_eq!(config.app.log_level, "debug");
    }

    #[test]
    fn out_of_range_durations_are_reported_not_panicked_on() {
        for delay in ["1e30", "-0.5", "NaN", "inf"] {
            let mut pairs = required_pairs();
            pairs.push(("FLOOD_WAIT_DELAY", delay));
            let issues = issues_of(Config::from_lookup(lookup_from(&pairs)));
            assert_eq!(issues.len(), 1, "{delay}: {issues:?}");
            assert!(issues[0].starts_with("FLOOD_WAIT_DELAY"), "{issues:?}");
        }

        let mut pairs = required_pairs();
        pairs.push(("SESSION_TTL_SECONDS", "0"));
        let issues = issues_of(Config::from_lookup(lookup_from(&pairs)));
        assert_eq!(issues, vec!["SESSION_TTL_SECONDS must be at least 1, got 0"]);
    }

    #[test]
    fn error_display_enumerates_issues() {
        let err = ConfigError::Invalid(vec!["A is required".into(), "B is required".into()]);
        let text = err.to_string();
        assert!(text.contains("1. A is required"));
        assert!(text.contains("2. B is required"));
    }
}

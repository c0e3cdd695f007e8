use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Limit and window of one fixed-window rate limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateRule {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CloudStorageConfig {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,
    pub run_migrations: bool,

    // Tokens and cookies, ttl in seconds
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,
    pub remember_me_ttl: usize,
    pub cookie_secure: bool,
    pub trust_proxy_headers: bool,

    // Rate limiting
    pub rate_login: RateRule,
    pub rate_api: RateRule,
    pub rate_refresh_per_min: u32,
    pub rate_limit_max_keys: usize,

    // Mail
    pub smtp: Option<SmtpConfig>,
    pub mail_from: String,
    pub app_url: String,

    // Backups
    pub backup_dir: String,
    pub backup_interval_hours: u64,
    pub backup_retention: usize,
    pub cloud_storage: Option<CloudStorageConfig>,
    pub cron_secret: Option<String>,
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("{key} must be set"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 587)?,
                username: optional("SMTP_USERNAME"),
                password: optional("SMTP_PASSWORD"),
            }),
            None => None,
        };

        let cloud_storage = match optional("CLOUD_STORAGE_URL") {
            Some(url) => Some(CloudStorageConfig {
                url: url.trim_end_matches('/').to_string(),
                key: required("CLOUD_STORAGE_KEY")?,
                bucket: optional("CLOUD_STORAGE_BUCKET").unwrap_or_else(|| "backups".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            api_prefix: optional("API_PREFIX").unwrap_or_else(|| "/api".to_string()),
            run_migrations: parse_or("RUN_MIGRATIONS", true)?,

            access_token_ttl: parse_or("ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or("REFRESH_TOKEN_TTL", 86_400)?, // 1 day
            remember_me_ttl: parse_or("REMEMBER_ME_TTL", 2_592_000)?, // 30 days
            cookie_secure: parse_or("COOKIE_SECURE", true)?,
            trust_proxy_headers: parse_or("TRUST_PROXY_HEADERS", false)?,

            rate_login: RateRule {
                limit: parse_or("RATE_LOGIN_LIMIT", 5)?,
                window: Duration::from_secs(parse_or("RATE_LOGIN_WINDOW_SECS", 900)?),
            },
            rate_api: RateRule {
                limit: parse_or("RATE_API_LIMIT", 120)?,
                window: Duration::from_secs(parse_or("RATE_API_WINDOW_SECS", 60)?),
            },
            rate_refresh_per_min: parse_or("RATE_REFRESH_PER_MIN", 30)?,
            rate_limit_max_keys: parse_or("RATE_LIMIT_MAX_KEYS", 10_000)?,

            smtp,
            mail_from: optional("MAIL_FROM")
                .unwrap_or_else(|| "Embassy HR <no-reply@localhost>".to_string()),
            app_url: optional("APP_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),

            backup_dir: optional("BACKUP_DIR").unwrap_or_else(|| "backups".to_string()),
            backup_interval_hours: parse_or("BACKUP_INTERVAL_HOURS", 24)?,
            backup_retention: parse_or("BACKUP_RETENTION", 14)?,
            cloud_storage,
            cron_secret: optional("CRON_SECRET"),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for unit tests; nothing here touches the network.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/embassy_hr_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            api_prefix: "/api".to_string(),
            run_migrations: false,
            access_token_ttl: 900,
            refresh_token_ttl: 86_400,
            remember_me_ttl: 2_592_000,
            cookie_secure: true,
            trust_proxy_headers: false,
            rate_login: RateRule {
                limit: 5,
                window: Duration::from_secs(900),
            },
            rate_api: RateRule {
                limit: 120,
                window: Duration::from_secs(60),
            },
            rate_refresh_per_min: 30,
            rate_limit_max_keys: 100,
            smtp: None,
            mail_from: "Embassy HR <no-reply@localhost>".to_string(),
            app_url: "http://localhost:3000".to_string(),
            backup_dir: "backups".to_string(),
            backup_interval_hours: 0,
            backup_retention: 14,
            cloud_storage: None,
            cron_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_to_default_when_unset() {
        let value: u32 = parse_or("EMBASSY_HR_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_or_reports_the_variable_name() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("EMBASSY_HR_TEST_BAD_NUMBER", "twelve") };
        let err = parse_or::<u32>("EMBASSY_HR_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("EMBASSY_HR_TEST_BAD_NUMBER"));
    }

    #[test]
    fn blank_optional_values_are_treated_as_unset() {
        unsafe { env::set_var("EMBASSY_HR_TEST_BLANK", "   ") };
        assert!(optional("EMBASSY_HR_TEST_BLANK").is_none());
    }
}

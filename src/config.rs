use std::env;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub access_secret: String,
    pub access_ttl_hours: i64,
    pub refresh_secret: String,
    pub refresh_ttl_days: i64,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_name: String,
}

impl SmtpConfig {
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Where overdue de-duplication markers are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    Mongo,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(LedgerBackend::Mongo),
            "memory" => Ok(LedgerBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub due_soon_cron: String,
    pub overdue_cron: String,
    pub ledger_reset_cron: String,
    pub ledger: LedgerBackend,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt: JwtConfig,
    pub cors_origin: String,
    pub frontend_url: String,
    pub secure_cookies: bool,
    pub smtp: SmtpConfig,
    pub notifications: NotificationConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let environment = get("APP_ENV")
            .or_else(|| get("NODE_ENV"))
            .unwrap_or_else(|| "development".to_string());

        Ok(Self {
            bind_addr: or("BIND_ADDR", "0.0.0.0:8000"),
            mongo_uri: required("MONGO_URI")?,
            database_name: or("DATABASE_NAME", "todo_app"),
            jwt: JwtConfig {
                access_secret: required("ACCESS_TOKEN_SECRET")?,
                access_ttl_hours: parse(&get, "ACCESS_TOKEN_EXPIRY_HOURS", 24)?,
                refresh_secret: required("REFRESH_TOKEN_SECRET")?,
                refresh_ttl_days: parse(&get, "REFRESH_TOKEN_EXPIRY_DAYS", 10)?,
            },
            cors_origin: or("CORS_ORIGIN", "http://localhost:3000"),
            frontend_url: or("FRONTEND_URL", "http://localhost:8000"),
            secure_cookies: environment.eq_ignore_ascii_case("production"),
            smtp: SmtpConfig {
                host: or("SMTP_HOST", "smtp.gmail.com"),
                port: parse(&get, "SMTP_PORT", 587)?,
                username: get("EMAIL_USER"),
                password: get("EMAIL_PASSWORD"),
                from_name: or("EMAIL_FROM_NAME", "Todo App"),
            },
            notifications: NotificationConfig {
                enabled: parse(&get, "NOTIFICATIONS_ENABLED", true)?,
                due_soon_cron: or("DUE_SOON_CRON", "*/15 * * * *"),
                overdue_cron: or("OVERDUE_CRON", "0 9 * * *"),
                ledger_reset_cron: or("LEDGER_RESET_CRON", "0 0 * * *"),
                ledger: parse(&get, "OVERDUE_LEDGER", LedgerBackend::Mongo)?,
            },
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

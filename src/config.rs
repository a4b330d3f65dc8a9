// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use dotenvy::dotenv;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

/// Deployment mode. Development echoes internal detail and reset links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` selects the in-process memory backend.
    pub database_url: Option<String>,
    pub jwt_secret: SecretString,
    /// Session token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub app_env: AppEnv,
    pub bind_addr: SocketAddr,
    /// Validated at load; stored without a trailing slash.
    pub frontend_url: String,
    pub smtp_url: Option<SecretString>,
    pub mail_from: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<SecretString>,
    pub otp_ttl: Duration,
    pub reset_ttl: Duration,
    pub saga_poll_interval: Duration,
    /// How long finished sagas and their stock keys are kept.
    pub saga_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let app_env = match optional("APP_ENV").as_deref() {
            None | Some("production") => AppEnv::Production,
            Some("development") | Some("dev") => AppEnv::Development,
            Some(other) => return Err(ConfigError::Invalid("APP_ENV", other.to_string())),
        };

        let bind_addr = parse_or("BIND_ADDR", "0.0.0.0:3000".parse().ok())?;

        let frontend_raw =
            optional("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        Url::parse(&frontend_raw).map_err(|e| ConfigError::Invalid("FRONTEND_URL", e.to_string()))?;
        let frontend_url = frontend_raw.trim_end_matches('/').to_string();

        Ok(Self {
            database_url: optional("DATABASE_URL"),
            jwt_secret: SecretString::from(jwt_secret),
            jwt_expiration: parse_or("JWT_EXPIRATION", Some(7 * 24 * 60 * 60))?,
            rust_log: optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            app_env,
            bind_addr,
            frontend_url,
            smtp_url: optional("SMTP_URL").map(SecretString::from),
            mail_from: optional("MAIL_FROM")
                .unwrap_or_else(|| "ShopEasy <no-reply@shopeasy.local>".to_string()),
            admin_email: optional("ADMIN_EMAIL"),
            admin_password: optional("ADMIN_PASSWORD").map(SecretString::from),
            otp_ttl: Duration::from_secs(parse_or("OTP_TTL_SECS", Some(600))?),
            reset_ttl: Duration::from_secs(parse_or("RESET_TTL_SECS", Some(300))?),
            saga_poll_interval: Duration::from_secs(parse_or("SAGA_POLL_SECS", Some(30))?),
            saga_retention: Duration::from_secs(
                parse_or::<u64>("SAGA_RETENTION_DAYS", Some(30))? * 24 * 60 * 60,
            ),
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }

    /// Builds the link mailed to a user: `<frontend>/reset/<token>`.
    pub fn reset_link(&self, raw_token: &str) -> String {
        format!("{}/reset/{}", self.frontend_url, raw_token)
    }

    /// Baseline used by tests and local tooling; callers override what they need.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            jwt_secret: SecretString::from(jwt_secret.to_string()),
            jwt_expiration: 600,
            rust_log: "error".to_string(),
            app_env: AppEnv::Development,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            frontend_url: "http://localhost:3000".to_string(),
            smtp_url: None,
            mail_from: "ShopEasy <no-reply@shopeasy.local>".to_string(),
            admin_email: None,
            admin_password: None,
            otp_ttl: Duration::from_secs(600),
            reset_ttl: Duration::from_secs(300),
            saga_poll_interval: Duration::from_secs(30),
            saga_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: Option<T>) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw.clone())),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_link_joins_frontend_and_token() {
        let mut config = Config::for_tests("s");
        config.frontend_url = "https://shop.example.com".to_string();
        assert_eq!(
            config.reset_link("abc"),
            "https://shop.example.com/reset/abc"
        );
    }
}

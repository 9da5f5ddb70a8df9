//! Application configuration loaded from the environment
//!
//! Required variables: `JWT_SECRET`, `DB_HOST`, `DB_PORT`, `DB_USER`,
//! `DB_PASSWORD`, `DB_NAME`. Everything else has a default. Token TTLs
//! accept duration strings with `s`/`m`/`h`/`d` suffixes ("60m", "30d").

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Cookie TTLs, signing secret, rate limit knobs and server binding.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub database_url: String,
    pub server_port: u16,
    pub production: bool,
    pub rate_window: Duration,
    pub rate_max_requests: usize,
    pub login_per_min: usize,
}

const REQUIRED_ENV: &[&str] = &[
    "JWT_SECRET",
    "DB_HOST",
    "DB_PORT",
    "DB_USER",
    "DB_PASSWORD",
    "DB_NAME",
];

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        for key in REQUIRED_ENV {
            if env::var(key).map(|v| v.is_empty()).unwrap_or(true) {
                bail!("environment variable {key} must be set");
            }
        }

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let ssl_mode = env::var("DB_SSLMODE").unwrap_or_else(|_| "disable".to_string());
        let database_url = format!(
            "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={ssl_mode}",
            user = env::var("DB_USER")?,
            password = env::var("DB_PASSWORD")?,
            host = env::var("DB_HOST")?,
            port = env::var("DB_PORT")?,
            name = env::var("DB_NAME")?,
        );

        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8081);

        let production = env::var("APP_ENV").as_deref() == Ok("production");

        let access_ttl = duration_from_env("JWT_EXPIRATION", Duration::from_secs(60 * 60));
        let refresh_ttl =
            duration_from_env("REFRESH_EXPIRATION", Duration::from_secs(30 * 24 * 60 * 60));

        let rate_window = env::var("RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        let rate_max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(300);

        let login_per_min = env::var("RATE_LIMIT_LOGIN_PER_MIN")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(20);

        Ok(Self {
            jwt_secret,
            access_ttl,
            refresh_ttl,
            database_url,
            server_port,
            production,
            rate_window,
            rate_max_requests,
            login_per_min,
        })
    }
}

fn duration_from_env(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .filter(|d| !d.is_zero())
        .unwrap_or(default)
}

/// Parse a duration string such as "45s", "60m", "12h" or "30d".
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let (value, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input, "s"),
    };
    let value: u64 = value.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 60 * 60,
        "d" => value * 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("60m"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("12h"), Some(Duration::from_secs(43200)));
        assert_eq!(parse_duration("30d"), Some(Duration::from_secs(2_592_000)));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10w"), None);
        assert_eq!(parse_duration("-5m"), None);
    }
}

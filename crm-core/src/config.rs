use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Runtime configuration read from the environment.
///
/// Both binaries call `dotenv().ok()` first, so a local `.env` file can
/// provide any of these values during development.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Interface the HTTP server binds to
    pub server_host: String,

    /// Port the HTTP server binds to
    pub server_port: u16,

    /// Upper bound for the connection pool
    pub db_max_connections: u32,

    /// Apply the bundled migrations on startup
    pub run_migrations: bool,

    /// Budget for a single attempt at moving the reference date
    pub date_update_timeout: Duration,

    /// How many times a contended date update is attempted before giving up
    pub date_update_max_attempts: u32,

    /// Refresh cycles running longer than this are reported as slow
    pub refresh_alert_threshold: Duration,

    /// Period of the background refresh worker; zero runs a single cycle
    pub refresh_interval: Duration,

    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    /// Builds the configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            database_url,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_var("SERVER_PORT", 8000)?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            run_migrations: parse_var("RUN_MIGRATIONS", false)?,
            date_update_timeout: Duration::from_millis(parse_var("DATE_UPDATE_TIMEOUT_MS", 2000)?),
            date_update_max_attempts: parse_var::<u32>("DATE_UPDATE_MAX_ATTEMPTS", 3)?.max(1),
            refresh_alert_threshold: Duration::from_secs(parse_var(
                "REFRESH_ALERT_THRESHOLD_SECONDS",
                300,
            )?),
            refresh_interval: Duration::from_secs(parse_var("REFRESH_INTERVAL_SECONDS", 900)?),
            cors_origins: parse_list(env::var("CORS_ORIGINS").ok().as_deref()),
        })
    }

    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", name, raw, e)),
        _ => Ok(default),
    }
}

fn parse_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_skips_blank_entries() {
        let origins = parse_list(Some("http://localhost:3000, ,https://crm.example.com,"));
        assert_eq!(
            origins,
            vec!["http://localhost:3000", "https://crm.example.com"]
        );
    }

    #[test]
    fn test_parse_list_missing_is_empty() {
        assert!(parse_list(None).is_empty());
    }

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let port: u16 = parse_var("CRM_CORE_TEST_UNSET_PORT", 8123).expect("default");
        assert_eq!(port, 8123);
    }
}

//! Loader configuration - environment defaults overridden by command-line flags

use crate::ingestion::batch::DEFAULT_BATCH_SIZE;
use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Load probe measurement dumps into the analytics store.
#[derive(Parser, Debug)]
#[command(name = "loader")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Measurement dump files (JSON lines), processed in order
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Store host
    #[arg(long)]
    pub host: Option<String>,

    /// Store port
    #[arg(long)]
    pub port: Option<u16>,

    /// Rows buffered across all tables before a flush
    #[arg(long = "batch-size", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    /// Database name
    #[arg(long)]
    pub database: Option<String>,

    /// Database user
    #[arg(long)]
    pub user: Option<String>,
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub batch_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 5432,
            database: "scamper".to_string(),
            user: "scamper".to_string(),
            password: None,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let config = Config {
            host: env::var("PROBE_DB_HOST").unwrap_or(defaults.host),
            port: parse_env("PROBE_DB_PORT")?.unwrap_or(defaults.port),
            database: env::var("PROBE_DB_NAME").unwrap_or(defaults.database),
            user: env::var("PROBE_DB_USER").unwrap_or(defaults.user),
            password: env::var("PROBE_DB_PASSWORD").ok(),
            batch_size: parse_env("PROBE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            connect_timeout_secs: parse_env("PROBE_CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout_secs),
        };

        if config.batch_size == 0 {
            anyhow::bail!("PROBE_BATCH_SIZE must be at least 1");
        }

        Ok(config)
    }

    /// Command-line flags win over the environment
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(batch_size) = args.batch_size {
            self.batch_size = batch_size as usize;
        }
        if let Some(database) = &args.database {
            self.database = database.clone();
        }
        if let Some(user) = &args.user {
            self.user = user.clone();
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);

        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a valid number, got {:?}", key, value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "loader",
            "--host",
            "db.example.net",
            "--port",
            "6432",
            "--batch-size",
            "250",
            "a.json",
            "b.json",
        ])
        .unwrap();

        let mut config = Config::default();
        config.apply_args(&args);

        assert_eq!(config.host, "db.example.net");
        assert_eq!(config.port, 6432);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.database, "scamper");
        assert_eq!(
            args.files,
            vec![PathBuf::from("a.json"), PathBuf::from("b.json")]
        );
    }

    #[test]
    fn test_args_without_overrides_keep_config() {
        let args = Args::try_parse_from(["loader", "a.json"]).unwrap();

        let mut config = Config::default();
        config.apply_args(&args);

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_args_validation() {
        // At least one file
        assert!(Args::try_parse_from(["loader"]).is_err());
        // Batch size must be positive
        assert!(Args::try_parse_from(["loader", "--batch-size", "0", "a.json"]).is_err());
        assert!(Args::try_parse_from(["loader", "--port", "not-a-port", "a.json"]).is_err());
    }

    #[test]
    fn test_parse_env() {
        env::set_var("PROBE_TEST_PARSE_OK", " 42 ");
        env::set_var("PROBE_TEST_PARSE_BAD", "forty-two");

        assert_eq!(parse_env::<u16>("PROBE_TEST_PARSE_OK").unwrap(), Some(42));
        assert!(parse_env::<u16>("PROBE_TEST_PARSE_BAD").is_err());
        assert_eq!(parse_env::<u16>("PROBE_TEST_PARSE_UNSET").unwrap(), None);
    }

    #[test]
    fn test_connect_timeout() {
        let config = Config {
            connect_timeout_secs: 3,
            ..Config::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }
}

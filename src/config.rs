//! Configuration parsing for the Cistern sink.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides (`CISTERN_*`)
//! - Defaults matching a stock PostgreSQL install

use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::AttrPersistence;
use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::gateway::InsertStyle;
use crate::ingest::IngestConfig;
use crate::naming::DEFAULT_MAX_NAME_LEN;
use crate::router::RouterConfig;
use crate::store::PostgresConfig;

/// Cistern: persists context notifications into PostgreSQL.
#[derive(Parser, Clone)]
#[command(name = "cistern")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// PostgreSQL host
    #[arg(long, env = "CISTERN_PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    /// PostgreSQL port
    #[arg(long, env = "CISTERN_PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    /// PostgreSQL user
    #[arg(long, env = "CISTERN_PG_USERNAME", default_value = "opendata")]
    pub pg_username: String,

    /// PostgreSQL password
    #[arg(long, env = "CISTERN_PG_PASSWORD", default_value = "", hide_env_values = true)]
    pub pg_password: String,

    /// Attribute layout: one row per attribute or one row per event
    #[arg(long, env = "CISTERN_ATTR_PERSISTENCE", value_enum, default_value_t = AttrPersistence::Row)]
    pub attr_persistence: AttrPersistence,

    /// Persist the grouped batch instead of the default one
    #[arg(long, env = "CISTERN_ENABLE_GROUPING")]
    pub enable_grouping: bool,

    /// How values reach the database
    #[arg(long, env = "CISTERN_INSERT_STYLE", value_enum, default_value_t = InsertStyle::Parameterized)]
    pub insert_style: InsertStyle,

    /// Maximum identifier length, in bytes
    #[arg(long, env = "CISTERN_MAX_NAME_LEN", default_value_t = DEFAULT_MAX_NAME_LEN)]
    pub max_name_len: usize,

    /// Number of per-database connections kept open
    #[arg(long, env = "CISTERN_CONNECTION_CACHE_SIZE", default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub connection_cache_size: usize,

    /// Connect timeout in seconds (0 disables it)
    #[arg(long, env = "CISTERN_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Events per batch before a flush
    #[arg(long, env = "CISTERN_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Maximum time a partial batch waits before a flush, in milliseconds
    #[arg(long, env = "CISTERN_BATCH_TIMEOUT_MS", default_value_t = 1000)]
    pub batch_timeout_ms: u64,

    /// Retries for a batch failing with a retriable error
    #[arg(long, env = "CISTERN_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Pause between retries, in milliseconds
    #[arg(long, env = "CISTERN_RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Size of the worker command channel (backpressure control)
    #[arg(long, env = "CISTERN_CHANNEL_SIZE", default_value_t = 64)]
    pub channel_size: usize,

    /// JSON-lines input file (stdin when absent)
    #[arg(short, long, env = "CISTERN_INPUT")]
    pub input: Option<PathBuf>,

    /// Use an in-process store instead of PostgreSQL
    #[arg(long, env = "CISTERN_DRY_RUN")]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Server settings for the PostgreSQL backend.
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.pg_host.clone(),
            port: self.pg_port,
            username: self.pg_username.clone(),
            password: self.pg_password.clone(),
            connect_timeout: (self.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(self.connect_timeout_secs)),
        }
    }

    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            attr_persistence: self.attr_persistence,
            insert_style: self.insert_style,
            max_name_len: self.max_name_len,
            enable_grouping: self.enable_grouping,
        }
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Create a configuration for testing: in-process store, short timers.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            dry_run: true,
            log_level: "debug".into(),
            batch_size: 10,
            batch_timeout_ms: 50,
            retry_backoff_ms: 10,
            channel_size: 8,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pg_host: "localhost".into(),
            pg_port: 5432,
            pg_username: "opendata".into(),
            pg_password: String::new(),
            attr_persistence: AttrPersistence::Row,
            enable_grouping: false,
            insert_style: InsertStyle::Parameterized,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            connection_cache_size: DEFAULT_CACHE_CAPACITY,
            connect_timeout_secs: 10,
            batch_size: 100,
            batch_timeout_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            channel_size: 64,
            input: None,
            dry_run: false,
            log_level: "info".into(),
            otel_endpoint: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pg_host", &self.pg_host)
            .field("pg_port", &self.pg_port)
            .field("pg_username", &self.pg_username)
            .field("pg_password", &"XXXXXXXXXX")
            .field("attr_persistence", &self.attr_persistence)
            .field("enable_grouping", &self.enable_grouping)
            .field("insert_style", &self.insert_style)
            .field("max_name_len", &self.max_name_len)
            .field("connection_cache_size", &self.connection_cache_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout_ms", &self.batch_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("channel_size", &self.channel_size)
            .field("input", &self.input)
            .field("dry_run", &self.dry_run)
            .field("log_level", &self.log_level)
            .field("otel_endpoint", &self.otel_endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pg_port, 5432);
        assert_eq!(config.pg_username, "opendata");
        assert_eq!(config.attr_persistence, AttrPersistence::Row);
        assert_eq!(config.insert_style, InsertStyle::Parameterized);
        assert_eq!(config.max_name_len, 63);
    }

    #[test]
    fn test_parse_matches_default() {
        let parsed = Config::try_parse_from(["cistern"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.pg_host, default.pg_host);
        assert_eq!(parsed.connection_cache_size, default.connection_cache_size);
        assert_eq!(parsed.batch_size, default.batch_size);
        assert_eq!(parsed.channel_size, default.channel_size);
    }

    #[test]
    fn test_parse_modes() {
        let config = Config::try_parse_from([
            "cistern",
            "--attr-persistence",
            "column",
            "--insert-style",
            "literal",
            "--enable-grouping",
            "--max-name-len",
            "60",
        ])
        .unwrap();

        let router = config.router();
        assert_eq!(router.attr_persistence, AttrPersistence::Column);
        assert_eq!(router.insert_style, InsertStyle::Literal);
        assert!(router.enable_grouping);
        assert_eq!(router.max_name_len, 60);
    }

    #[test]
    fn test_debug_masks_password() {
        let config = Config {
            pg_password: "hunter2".into(),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("XXXXXXXXXX"));
    }

    #[test]
    fn test_zero_connect_timeout_disables_it() {
        let config = Config {
            connect_timeout_secs: 0,
            ..Config::test_config()
        };
        assert_eq!(config.postgres().connect_timeout, None);
        assert_eq!(
            Config::default().postgres().connect_timeout,
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            Config::test_config().ingest().batch_timeout,
            Duration::from_millis(50)
        );
    }
}

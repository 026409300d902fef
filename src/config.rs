//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::schedule::LoadFailurePolicy;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Where records, revisions and schedules live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    #[default]
    Memory,
    Postgres,
}

impl StorageBackend {
    /// Whether records written by other processes are visible to this one
    pub fn is_shared(&self) -> bool {
        matches!(self, StorageBackend::Postgres)
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(ConfigError::InvalidValue(format!(
                "STORAGE_BACKEND must be \"memory\" or \"postgres\", got \"{}\"",
                other
            ))),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    /// Connect over TLS (required by most hosted providers)
    pub use_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            use_tls: false,
        }
    }
}

/// Scheduler and record-type configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two scheduler passes
    pub poll_interval_secs: u64,
    /// Maximum number of due mutations applied per pass
    pub batch_size: usize,
    /// What to do when a mutation's target record cannot be loaded
    pub load_failure_policy: LoadFailurePolicy,
    /// Record type under which revisions are stored
    pub revision_type: String,
    /// Record type under which scheduled mutations are stored
    pub schedule_type: String,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_size: 100,
            load_failure_policy: LoadFailurePolicy::default(),
            revision_type: "object_revisions".to_string(),
            schedule_type: "object_schedules".to_string(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None if lookup("DATABASE_URL").is_some() => StorageBackend::Postgres,
            None => StorageBackend::Memory,
        };

        let max_pool_size = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?;

        // Try to load DATABASE_URL first (modern format), fall back to individual vars
        let database = if let Some(database_url) = lookup("DATABASE_URL") {
            Self::parse_database_url(&database_url, max_pool_size)?
        } else {
            let defaults = DatabaseConfig::default();
            DatabaseConfig {
                host: lookup("DB_HOST").unwrap_or(defaults.host),
                port: parse_or(&lookup, "DB_PORT", defaults.port)?,
                user: lookup("DB_USER").unwrap_or(defaults.user),
                password: lookup("DB_PASSWORD").unwrap_or_default(),
                database: lookup("DB_NAME").unwrap_or(defaults.database),
                max_pool_size,
                use_tls: parse_or(&lookup, "DB_TLS", false)?,
            }
        };

        if storage == StorageBackend::Postgres
            && lookup("DATABASE_URL").is_none()
            && lookup("DB_HOST").is_none()
        {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            poll_interval_secs: parse_or(&lookup, "SCHEDULER_POLL_SECS", defaults.poll_interval_secs)?,
            batch_size: parse_or(&lookup, "SCHEDULER_BATCH_SIZE", defaults.batch_size)?,
            load_failure_policy: match lookup("SCHEDULER_LOAD_FAILURE") {
                Some(value) => value
                    .parse()
                    .map_err(|e: crate::error::AppError| ConfigError::InvalidValue(e.to_string()))?,
                None => defaults.load_failure_policy,
            },
            revision_type: lookup("REVISION_RECORD_TYPE").unwrap_or(defaults.revision_type),
            schedule_type: lookup("SCHEDULE_RECORD_TYPE").unwrap_or(defaults.schedule_type),
        };

        if scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "SCHEDULER_BATCH_SIZE must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            storage,
            database,
            scheduler,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<DatabaseConfig, ConfigError> {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
                    .to_string();

                let port = parsed.port().unwrap_or(5432);

                let user = parsed.username().to_string();
                let password = parsed.password().map(|p| p.to_string()).unwrap_or_default();

                let database = parsed.path().trim_start_matches('/').to_string();
                if database.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "Missing database name in DATABASE_URL".to_string(),
                    ));
                }

                // Neon and most hosted providers require TLS
                let use_tls = host.contains("neon.tech")
                    || parsed
                        .query_pairs()
                        .any(|(k, v)| k == "sslmode" && v == "require");

                Ok(DatabaseConfig {
                    host,
                    port,
                    user,
                    password,
                    database,
                    max_pool_size,
                    use_tls,
                })
            }
            Err(_) => Err(ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

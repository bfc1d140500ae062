use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::services::coordinator::{BookingPolicy, DEFAULT_HOLD_TTL_SECONDS};

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown storage backend '{}'", other)),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: Option<String>,
    pub pool_size: u32,
}

// Redis нужен только для публикации событий о подтверждённых бронях
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub events_stream: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub hold_ttl_seconds: i64,
    pub lock_timeout_ms: u64,
}

impl BookingConfig {
    pub fn policy(&self) -> BookingPolicy {
        BookingPolicy {
            hold_ttl: chrono::Duration::seconds(self.hold_ttl_seconds),
            lock_timeout: std::time::Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend: StorageBackend = var("STORAGE_BACKEND", "postgres").parse()?;
        let database_url = lookup("DATABASE_URL");
        if backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set for the postgres backend");
        }

        let config = Config {
            app: AppConfig {
                host: var("HOST", "0.0.0.0"),
                port: parse(&var("PORT", "8000"), "PORT")?,
                environment: var("ENVIRONMENT", "development"),
                rust_log: var("RUST_LOG", "seat_reservations=debug,tower_http=debug"),
                log_format: var("LOG_FORMAT", "pretty").parse()?,
            },
            database: DatabaseConfig {
                backend,
                url: database_url,
                pool_size: parse(&var("DB_POOL_SIZE", "20"), "DB_POOL_SIZE")?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL"),
                events_stream: var("BOOKING_EVENTS_STREAM", "booking.confirmed"),
            },
            jwt: JwtConfig {
                secret: lookup("JWT_SECRET").context("JWT_SECRET must be set")?,
            },
            booking: BookingConfig {
                hold_ttl_seconds: parse(
                    &var("HOLD_TTL_SECONDS", &DEFAULT_HOLD_TTL_SECONDS.to_string()),
                    "HOLD_TTL_SECONDS",
                )?,
                lock_timeout_ms: parse(&var("LOCK_TIMEOUT_MS", "5000"), "LOCK_TIMEOUT_MS")?,
            },
        };

        if config.booking.hold_ttl_seconds <= 0 {
            bail!("HOLD_TTL_SECONDS must be positive");
        }
        Ok(config)
    }
}

fn parse<T>(raw: &str, key: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow!("{} must be a valid value ({}): {}", key, raw, e))
}

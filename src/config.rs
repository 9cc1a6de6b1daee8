use crate::coordinator::RetryConfig;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    /// Number of decimal places one major currency unit is divided into.
    /// Fixed per deployment; amounts are integer counts of the minor unit.
    pub currency_scale: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "postgresql://localhost:5432/transfer_engine".to_string(),
                max_connections: 100,
                min_connections: 10,
            },
            retry: RetryConfig::default(),
            ledger: LedgerConfig { currency_scale: 2 },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let defaults = Config::default();

        let mut builder = config::Config::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default(
                "database.max_connections",
                defaults.database.max_connections as i64,
            )?
            .set_default(
                "database.min_connections",
                defaults.database.min_connections as i64,
            )?
            .set_default("retry.max_retries", defaults.retry.max_retries as i64)?
            .set_default(
                "retry.initial_delay_ms",
                defaults.retry.initial_delay_ms as i64,
            )?
            .set_default("retry.max_delay_ms", defaults.retry.max_delay_ms as i64)?
            .set_default("retry.backoff_multiplier", defaults.retry.backoff_multiplier)?
            .set_default("retry.jitter_factor", defaults.retry.jitter_factor)?
            .set_default("ledger.currency_scale", defaults.ledger.currency_scale as i64)?;

        // Environment-specific config file if present
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("TRANSFER_ENGINE").separator("__"),
        );

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool must allow at least one connection".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("Database pool min connections cannot exceed max".to_string());
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err("Retry backoff multiplier must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err("Retry jitter factor must be between 0 and 1".to_string());
        }

        if self.ledger.currency_scale > 12 {
            return Err("Currency scale must be at most 12".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.max_connections, 100);
        assert_eq!(config.database.min_connections, 10);
        assert_eq!(config.retry.max_retries, 10);
        assert_eq!(config.retry.initial_delay_ms, 10);
        assert_eq!(config.ledger.currency_scale, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = Config::default();
        config.database.min_connections = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = Config::default();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_scale() {
        let mut config = Config::default();
        config.ledger.currency_scale = 13;
        assert!(config.validate().is_err());
    }
}

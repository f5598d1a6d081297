//! Environment-driven configuration for the `PostgreSQL` event store.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Errors raised while reading configuration or connecting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("{name} has an invalid value: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The database could not be reached.
    #[error("failed to connect to the event store database: {0}")]
    Connect(#[from] sqlx::Error),
}

/// Connection settings for the `PostgreSQL` event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Connection string.
    pub database_url: String,
    /// Maximum pool size.
    pub max_connections: u32,
}

impl EventStoreConfig {
    /// Reads `DATABASE_URL` (required) and `EVENT_STORE_MAX_CONNECTIONS`
    /// (default 10) from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or the pool size is
    /// not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`EventStoreConfig::from_env`], reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// See [`EventStoreConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let max_connections = match lookup("EVENT_STORE_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(value) => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "EVENT_STORE_MAX_CONNECTIONS",
                        value,
                    });
                }
            },
        };
        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// Opens a connection pool with these settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Connect` if the database cannot be reached.
    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await?;
        tracing::info!(max_connections = self.max_connections, "event store pool connected");
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_pool_size() {
        let config =
            EventStoreConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/es")]))
                .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/es");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_reads_pool_size() {
        let config = EventStoreConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/es"),
            ("EVENT_STORE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_missing_database_url() {
        let result = EventStoreConfig::from_lookup(lookup(&[]));

        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_rejects_invalid_pool_size() {
        let result = EventStoreConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/es"),
            ("EVENT_STORE_MAX_CONNECTIONS", "0"),
        ]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "EVENT_STORE_MAX_CONNECTIONS", ref value }) if value == "0"
        ));
    }
}

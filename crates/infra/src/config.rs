//! Runtime configuration read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `STOCKROOM_DATABASE_URL` | unset: in-memory store |
//! | `STOCKROOM_DB_MAX_CONNECTIONS` | `10` |
//! | `STOCKROOM_DB_ACQUIRE_TIMEOUT_SECS` | `30` |
//! | `STOCKROOM_COMMAND_TIMEOUT_MS` | `10000` |

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::CommandContext;
use crate::store::{PostgresStore, StoreError};

pub const DATABASE_URL_VAR: &str = "STOCKROOM_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "STOCKROOM_DB_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_VAR: &str = "STOCKROOM_DB_ACQUIRE_TIMEOUT_SECS";
pub const COMMAND_TIMEOUT_VAR: &str = "STOCKROOM_COMMAND_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} is not set")]
    MissingDatabaseUrl(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_millis(10_000),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());

        Ok(Self {
            database_url,
            max_connections: parse_positive(&lookup, MAX_CONNECTIONS_VAR)?
                .unwrap_or(defaults.max_connections),
            acquire_timeout: parse_positive(&lookup, ACQUIRE_TIMEOUT_VAR)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            command_timeout: parse_positive(&lookup, COMMAND_TIMEOUT_VAR)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
        })
    }

    /// A fresh context carrying the configured command deadline.
    pub fn command_context(&self) -> CommandContext {
        CommandContext::with_timeout(self.command_timeout)
    }

    /// Open the pool and make sure the schema exists.
    pub async fn connect(&self) -> Result<PostgresStore, ConfigError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl(DATABASE_URL_VAR))?;

        info!(
            max_connections = self.max_connections,
            "connecting to {}",
            mask_database_url(url)
        );
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to connect to database");
                StoreError::Unavailable(e.to_string())
            })?;

        let store = PostgresStore::new(pool);
        store.apply_schema().await?;
        Ok(store)
    }
}

fn parse_positive<N>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<N>, ConfigError>
where
    N: FromStr + PartialOrd + Default,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse::<N>() {
        Ok(n) if n > N::default() => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, value }),
    }
}

/// Hide the password part of a connection string for logging.
fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = StoreConfig::from_lookup(lookup(&[
            (DATABASE_URL_VAR, "postgres://app:secret@db:5432/stock"),
            (MAX_CONNECTIONS_VAR, "4"),
            (COMMAND_TIMEOUT_VAR, "250"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.command_timeout, Duration::from_millis(250));
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_or_garbage_is_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[(MAX_CONNECTIONS_VAR, "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                var: MAX_CONNECTIONS_VAR,
                ..
            }
        ));
        assert!(StoreConfig::from_lookup(lookup(&[(COMMAND_TIMEOUT_VAR, "soon")])).is_err());
    }

    #[test]
    fn password_is_masked() {
        assert_eq!(
            mask_database_url("postgres://app:secret@db:5432/stock"),
            "postgres://app:***@db:5432/stock"
        );
        assert_eq!(mask_database_url("postgres://db/stock"), "postgres://db/stock");
    }

    #[tokio::test]
    async fn connect_without_url_fails() {
        let err = StoreConfig::default().connect().await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl(_)));
    }
}

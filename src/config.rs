use std::collections::HashMap;
use std::net::SocketAddr;

use log::LevelFilter;

use crate::error::{Error, Result};

pub const DEFAULT_CONNECTION: &str = "default";
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:7878";

const DATABASE_URL: &str = "DATABASE_URL";
const NAMED_DATABASE_URL_PREFIX: &str = "DATABASE_URL_";

/// Settings read from the environment (and `.env`, if present).
///
/// `DATABASE_URL` configures the `default` connection; `DATABASE_URL_<NAME>`
/// configures a connection called `<name>`.
#[derive(Debug, Clone)]
pub struct Config {
    pub connections: HashMap<String, String>,
    pub http_addr: SocketAddr,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut connections = HashMap::new();
        let mut http_addr = None;
        let mut log_level = None;

        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.into();

            if key == DATABASE_URL {
                connections.insert(DEFAULT_CONNECTION.to_owned(), value);
            } else if let Some(name) = key.strip_prefix(NAMED_DATABASE_URL_PREFIX) {
                if !name.is_empty() {
                    connections.insert(name.to_ascii_lowercase(), value);
                }
            } else if key == "QUEUE_HTTP_ADDR" {
                http_addr = Some(value.parse().map_err(|e| Error::InvalidSetting {
                    name: key.to_owned(),
                    reason: format!("{e}"),
                })?);
            } else if key == "LOG_LEVEL" {
                log_level = Some(value.parse().map_err(|_| Error::InvalidSetting {
                    name: key.to_owned(),
                    reason: format!("'{value}' is not a log level"),
                })?);
            }
        }

        let defaults = Self::default();

        Ok(Self {
            connections,
            http_addr: http_addr.unwrap_or(defaults.http_addr),
            log_level: log_level.unwrap_or(defaults.log_level),
        })
    }

    /// The database URL configured for `connection`.
    pub fn database_url(&self, connection: &str) -> Result<&str> {
        self.connections
            .get(connection)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownConnection(connection.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_default_and_named_connections() {
        let config = Config::from_vars([
            ("DATABASE_URL", "queue.sqlite"),
            ("DATABASE_URL_REPORTS", "reports.sqlite"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(config.database_url("default").unwrap(), "queue.sqlite");
        assert_eq!(config.database_url("reports").unwrap(), "reports.sqlite");
        assert!(matches!(
            config.database_url("billing"),
            Err(Error::UnknownConnection(name)) if name == "billing"
        ));
    }

    #[test]
    fn defaults_without_settings() {
        let config = Config::from_vars(Vec::<(String, String)>::new()).unwrap();

        assert!(config.connections.is_empty());
        assert_eq!(config.http_addr.to_string(), DEFAULT_HTTP_ADDR);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_vars([("QUEUE_HTTP_ADDR", "nowhere")]),
            Err(Error::InvalidSetting { .. })
        ));
        assert!(matches!(
            Config::from_vars([("LOG_LEVEL", "loud")]),
            Err(Error::InvalidSetting { .. })
        ));

        let config = Config::from_vars([("LOG_LEVEL", "debug")]).unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
    }
}

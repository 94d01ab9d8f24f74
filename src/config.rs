use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

const DEV_SESSION_SECRET: &str = "roomiesplit-development-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreBackend {
    Mongo { uri: String, database: String },
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Scheme, host and port invite links are built from.
    pub public_origin: String,
    pub session_secret: String,
    pub session_ttl: chrono::Duration,
    /// Upper bound for one-shot view loads.
    pub fetch_timeout: Duration,
    pub store: StoreBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_origin: "http://localhost:8080".to_string(),
            session_secret: DEV_SESSION_SECRET.to_string(),
            session_ttl: chrono::Duration::days(7),
            fetch_timeout: Duration::from_secs(10),
            store: StoreBackend::Memory,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mongodb_uri = lookup("MONGODB_URI");

        let backend = lookup("ROOMIESPLIT_STORE").unwrap_or_else(|| {
            let backend = if mongodb_uri.is_some() { "mongodb" } else { "memory" };
            backend.to_string()
        });
        let store = match backend.as_str() {
            "mongodb" => StoreBackend::Mongo {
                uri: mongodb_uri.ok_or(ConfigError::Missing { key: "MONGODB_URI" })?,
                database: lookup("MONGODB_DATABASE").unwrap_or_else(|| "RoomieSplit".to_string()),
            },
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "ROOMIESPLIT_STORE",
                    value: other.to_string(),
                    reason: "expected `mongodb` or `memory`".to_string(),
                })
            }
        };

        let session_secret = match (lookup("SESSION_SECRET"), &store) {
            (Some(secret), _) if !secret.trim().is_empty() => secret,
            (_, StoreBackend::Mongo { .. }) => {
                return Err(ConfigError::Missing {
                    key: "SESSION_SECRET",
                })
            }
            (_, StoreBackend::Memory) => {
                warn!("SESSION_SECRET not set, using the development secret");
                defaults.session_secret
            }
        };

        let public_origin = lookup("PUBLIC_ORIGIN")
            .unwrap_or(defaults.public_origin)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            public_origin,
            session_secret,
            session_ttl: chrono::Duration::seconds(parse(
                &lookup,
                "SESSION_TTL_SECS",
                defaults.session_ttl.num_seconds(),
            )?),
            fetch_timeout: Duration::from_secs(parse(
                &lookup,
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            store,
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

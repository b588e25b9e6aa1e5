use std::time::Duration;

use thiserror::Error;

use crate::otp::DEFAULT_RETENTION;
use crate::signaling::DEFAULT_SEND_TIMEOUT;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9090";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://localhost:9090";
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// The single shared login credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// The only Origin allowed to open a socket
    pub allowed_origin: String,
    pub credentials: SharedSecret,
    /// How long a login token stays redeemable
    pub otp_retention: Duration,
    /// Bounded wait per recipient when enqueueing a broadcast
    pub send_timeout: Duration,
    /// Frames buffered per client before senders start waiting
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            credentials: SharedSecret {
                username: "guest".to_string(),
                password: String::new(),
            },
            otp_retention: DEFAULT_RETENTION,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from `lookup`, falling back to defaults for anything
    /// unset. `PARLEY_PASSWORD` is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("PARLEY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(origin) = lookup("PARLEY_ALLOWED_ORIGIN") {
            config.allowed_origin = origin;
        }
        if let Some(username) = lookup("PARLEY_USERNAME") {
            config.credentials.username = username;
        }
        config.credentials.password = lookup("PARLEY_PASSWORD")
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::Missing("PARLEY_PASSWORD"))?;

        if let Some(secs) = parse(&lookup, "PARLEY_OTP_RETENTION_SECS")? {
            config.otp_retention = Duration::from_secs(secs);
        }
        if let Some(millis) = parse(&lookup, "PARLEY_SEND_TIMEOUT_MS")? {
            config.send_timeout = Duration::from_millis(millis);
        }
        if let Some(capacity) = parse(&lookup, "PARLEY_MAILBOX_CAPACITY")? {
            config.mailbox_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::Invalid { name, value }),
        },
    }
}

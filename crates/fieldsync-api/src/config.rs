use std::collections::HashMap;
use std::env;
use std::fmt;

use thiserror::Error;

const DEFAULT_MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Shared bearer token; `None` leaves the record routes open
    pub api_token: Option<String>,
    /// Upper bound for `limit` on the change feed
    pub max_page_size: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FIELDSYNC_API_BIND_ADDR", "127.0.0.1:8080");
        let api_token = optional_trimmed(&lookup, "FIELDSYNC_API_TOKEN");

        let max_page_size = value_or_default(
            &lookup,
            "FIELDSYNC_API_MAX_PAGE_SIZE",
            &DEFAULT_MAX_PAGE_SIZE.to_string(),
        )
        .parse::<usize>()
        .map_err(|_| {
            ConfigError::Invalid(
                "FIELDSYNC_API_MAX_PAGE_SIZE must be an integer in [1, 5000]".to_string(),
            )
        })?;
        if !(1..=5_000).contains(&max_page_size) {
            return Err(ConfigError::Invalid(
                "FIELDSYNC_API_MAX_PAGE_SIZE must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            api_token,
            max_page_size,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

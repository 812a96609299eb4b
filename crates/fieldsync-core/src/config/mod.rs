//! Sync engine configuration.
//!
//! `SyncConfig` is shared by every client. Values come from the builder
//! methods or from `FIELDSYNC_*` environment variables.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::validate_collection;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
const DEFAULT_PULL_PAGE_SIZE: usize = 100;
const DEFAULT_TOMBSTONE_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration for the sync engine and its trigger loop
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remote API base URL (e.g., `https://sync.example.com`)
    pub remote_url: Option<String>,
    /// Bearer token for the remote API
    pub auth_token: Option<String>,
    /// Periodic sync interval; `None` means triggers only
    pub sync_interval: Option<Duration>,
    /// Upper bound for any single remote call
    pub request_timeout: Duration,
    /// Records pushed concurrently
    pub max_in_flight: usize,
    /// First retry delay of a failed operation
    pub backoff_base: Duration,
    /// Retry delay ceiling
    pub backoff_max: Duration,
    /// Records requested per pull page
    pub pull_page_size: usize,
    /// Collections to pull in addition to those already present locally
    pub collections: Vec<String>,
    /// How long confirmed tombstones are kept before pruning
    pub tombstone_retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            auth_token: None,
            sync_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
            collections: Vec::new(),
            tombstone_retention: Duration::from_secs(DEFAULT_TOMBSTONE_RETENTION_SECS),
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("remote_url", &self.remote_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .field("max_in_flight", &self.max_in_flight)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("pull_page_size", &self.pull_page_size)
            .field("collections", &self.collections)
            .field("tombstone_retention", &self.tombstone_retention)
            .finish()
    }
}

impl SyncConfig {
    /// Create a configuration for the given remote
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: Some(remote_url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable periodic sync (triggers only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.clamp(1, 16);
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn with_pull_page_size(mut self, page_size: usize) -> Self {
        self.pull_page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Check if a remote is configured
    pub const fn is_configured(&self) -> bool {
        self.remote_url.is_some()
    }

    /// Load from `FIELDSYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let remote_url = normalize_text_option(lookup("FIELDSYNC_REMOTE_URL"));
        if let Some(url) = remote_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "FIELDSYNC_REMOTE_URL must start with http:// or https://".to_string(),
                ));
            }
        }
        let auth_token = normalize_text_option(lookup("FIELDSYNC_AUTH_TOKEN"));

        let interval_secs = parse_in_range(
            &lookup,
            "FIELDSYNC_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            0..=86_400,
        )?;
        let request_timeout_secs = parse_in_range(
            &lookup,
            "FIELDSYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1..=300,
        )?;
        let max_in_flight = parse_in_range(
            &lookup,
            "FIELDSYNC_MAX_IN_FLIGHT",
            DEFAULT_MAX_IN_FLIGHT as u64,
            1..=16,
        )?;
        let backoff_base_ms = parse_in_range(
            &lookup,
            "FIELDSYNC_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE_MS,
            10..=60_000,
        )?;
        let backoff_max_secs = parse_in_range(
            &lookup,
            "FIELDSYNC_BACKOFF_MAX_SECS",
            DEFAULT_BACKOFF_MAX_SECS,
            1..=86_400,
        )?;
        let pull_page_size = parse_in_range(
            &lookup,
            "FIELDSYNC_PULL_PAGE_SIZE",
            DEFAULT_PULL_PAGE_SIZE as u64,
            1..=1_000,
        )?;

        let collections = normalize_text_option(lookup("FIELDSYNC_COLLECTIONS"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(|name| {
                        validate_collection(name).map_err(|_| {
                            Error::Config(format!(
                                "FIELDSYNC_COLLECTIONS contains invalid collection name '{name}'"
                            ))
                        })?;
                        Ok(name.to_string())
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            remote_url: remote_url.map(|url| url.trim_end_matches('/').to_string()),
            auth_token,
            sync_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_in_flight: usize::try_from(max_in_flight).unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_max: Duration::from_secs(backoff_max_secs),
            pull_page_size: usize::try_from(pull_page_size).unwrap_or(DEFAULT_PULL_PAGE_SIZE),
            collections,
            tombstone_retention: defaults.tombstone_retention,
        })
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    let invalid = || {
        Error::Config(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<u64>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_map(pairs: &[(&str, &str)]) -> Result<SyncConfig> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_are_local_only() {
        let config = from_map(&[]).unwrap();
        assert!(!config.is_configured());
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
        assert!(config.collections.is_empty());
    }

    #[test]
    fn parses_full_environment() {
        let config = from_map(&[
            ("FIELDSYNC_REMOTE_URL", " https://sync.example.com/ "),
            ("FIELDSYNC_AUTH_TOKEN", "token"),
            ("FIELDSYNC_SYNC_INTERVAL_SECS", "0"),
            ("FIELDSYNC_MAX_IN_FLIGHT", "8"),
            ("FIELDSYNC_BACKOFF_BASE_MS", "250"),
            ("FIELDSYNC_COLLECTIONS", "jobs, leads,,inventory"),
        ])
        .unwrap();

        assert_eq!(config.remote_url.as_deref(), Some("https://sync.example.com"));
        assert!(config.sync_interval.is_none());
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.collections, vec!["jobs", "leads", "inventory"]);
    }

    #[test]
    fn rejects_out_of_range_values_by_name() {
        let err = from_map(&[("FIELDSYNC_MAX_IN_FLIGHT", "64")]).unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_MAX_IN_FLIGHT"));

        let err = from_map(&[("FIELDSYNC_PULL_PAGE_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_PULL_PAGE_SIZE"));

        let err = from_map(&[("FIELDSYNC_REMOTE_URL", "sync.example.com")]).unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_REMOTE_URL"));

        let err = from_map(&[("FIELDSYNC_COLLECTIONS", "Jobs")]).unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_COLLECTIONS"));
    }

    #[test]
    fn debug_redacts_token() {
        let config = SyncConfig::new("https://sync.example.com").with_auth_token("secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn builder_clamps_concurrency() {
        assert_eq!(SyncConfig::default().with_max_in_flight(0).max_in_flight, 1);
        assert_eq!(SyncConfig::default().with_max_in_flight(99).max_in_flight, 16);
    }
}

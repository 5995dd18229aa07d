//! Environment-backed runtime configuration for the transport.

use std::{env, fmt, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{connection::TrackerThresholds, retry::RetryPolicy};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POLL_ACTIVE_MS: u64 = 2_000;
const DEFAULT_POLL_BASE_MS: u64 = 3_000;
const DEFAULT_POLL_INACTIVE_MS: u64 = 10_000;
const DEFAULT_POLL_MAX_MS: u64 = 30_000;
const DEFAULT_POLL_BACKOFF_MULTIPLIER: f64 = 1.5;
const DEFAULT_HIDDEN_RECHECK_MS: u64 = 5_000;
const DEFAULT_SEND_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_SEND_RETRY_MAX_MS: u64 = 8_000;
const DEFAULT_SEND_MAX_RETRIES: u32 = 4;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 5_000;
const DEFAULT_DEDUPE_CAPACITY: usize = 1_000;
const DEFAULT_CACHE_TTL_MS: u64 = 60_000;
const DEFAULT_LIST_LIMIT: u16 = 50;
const DEFAULT_MESSAGE_LOG_MAX_ITEMS: usize = 1_000;

/// Poll cadence tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Cadence while the user is typing or just sent a message.
    pub active: Duration,
    /// Cadence while there was general activity recently.
    pub base: Duration,
    /// Cadence while the visible page is idle.
    pub inactive: Duration,
    /// Upper bound for every delay; also the hidden-page cadence.
    pub max: Duration,
    /// Growth factor of the error backoff.
    pub backoff_multiplier: f64,
    /// How often a hidden page re-checks visibility.
    pub hidden_recheck: Duration,
    /// Keystrokes within this window count as typing.
    pub typing_window: Duration,
    /// A sent message within this window keeps the active cadence.
    pub sent_window: Duration,
    /// Any activity within this window keeps the base cadence.
    pub activity_window: Duration,
    /// Page size requested from list-since.
    pub list_limit: u16,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            active: Duration::from_millis(DEFAULT_POLL_ACTIVE_MS),
            base: Duration::from_millis(DEFAULT_POLL_BASE_MS),
            inactive: Duration::from_millis(DEFAULT_POLL_INACTIVE_MS),
            max: Duration::from_millis(DEFAULT_POLL_MAX_MS),
            backoff_multiplier: DEFAULT_POLL_BACKOFF_MULTIPLIER,
            hidden_recheck: Duration::from_millis(DEFAULT_HIDDEN_RECHECK_MS),
            typing_window: Duration::from_secs(5),
            sent_window: Duration::from_secs(30),
            activity_window: Duration::from_secs(60),
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl PollConfig {
    /// Error backoff for the poll loop: `base * multiplier^errors` within `[base, max]`.
    pub fn backoff_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base.as_millis() as u64, self.max.as_millis() as u64)
            .with_multiplier(self.backoff_multiplier)
    }
}

/// Runtime configuration of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Backend base URL used by the HTTP backend.
    pub base_url: Option<String>,
    /// Fixed per-request timeout.
    pub request_timeout: Duration,
    pub poll: PollConfig,
    /// Backoff and retry budget of the send pipeline.
    pub send_retry: RetryPolicy,
    /// Period of the offline drain timer.
    pub drain_interval: Duration,
    /// Size of the retained completed-id set.
    pub dedupe_capacity: usize,
    /// Lifetime of a session cache entry.
    pub cache_ttl: Duration,
    pub tracker: TrackerThresholds,
    /// Per-session cap of the in-memory message log.
    pub message_log_max_items: usize,
    /// Capacity of the broadcast event channel.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            poll: PollConfig::default(),
            send_retry: RetryPolicy::new(DEFAULT_SEND_RETRY_BASE_MS, DEFAULT_SEND_RETRY_MAX_MS)
                .with_multiplier(2.0)
                .with_jitter(0.1)
                .with_max_retries(DEFAULT_SEND_MAX_RETRIES),
            drain_interval: Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS),
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            tracker: TrackerThresholds::default(),
            message_log_max_items: DEFAULT_MESSAGE_LOG_MAX_ITEMS,
            event_buffer: 512,
        }
    }
}

impl TransportConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("COURIER_BASE_URL", &mut lookup);

        let request_timeout = parse_millis(
            "COURIER_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let active = parse_millis("COURIER_POLL_ACTIVE_MS", DEFAULT_POLL_ACTIVE_MS, &mut lookup)?;
        let base = parse_millis("COURIER_POLL_BASE_MS", DEFAULT_POLL_BASE_MS, &mut lookup)?;
        let inactive = parse_millis(
            "COURIER_POLL_INACTIVE_MS",
            DEFAULT_POLL_INACTIVE_MS,
            &mut lookup,
        )?;
        let max = parse_millis("COURIER_POLL_MAX_MS", DEFAULT_POLL_MAX_MS, &mut lookup)?;
        let backoff_multiplier = parse_with_default(
            "COURIER_POLL_BACKOFF_MULTIPLIER",
            DEFAULT_POLL_BACKOFF_MULTIPLIER,
            &mut lookup,
        )?;
        let hidden_recheck = parse_millis(
            "COURIER_HIDDEN_RECHECK_MS",
            DEFAULT_HIDDEN_RECHECK_MS,
            &mut lookup,
        )?;
        let list_limit = parse_with_default("COURIER_LIST_LIMIT", DEFAULT_LIST_LIMIT, &mut lookup)?;

        let send_retry_base = parse_with_default(
            "COURIER_SEND_RETRY_BASE_MS",
            DEFAULT_SEND_RETRY_BASE_MS,
            &mut lookup,
        )?;
        let send_retry_max = parse_with_default(
            "COURIER_SEND_RETRY_MAX_MS",
            DEFAULT_SEND_RETRY_MAX_MS,
            &mut lookup,
        )?;
        let send_max_retries = parse_with_default(
            "COURIER_SEND_MAX_RETRIES",
            DEFAULT_SEND_MAX_RETRIES,
            &mut lookup,
        )?;
        let drain_interval = parse_millis(
            "COURIER_DRAIN_INTERVAL_MS",
            DEFAULT_DRAIN_INTERVAL_MS,
            &mut lookup,
        )?;
        let dedupe_capacity = parse_with_default(
            "COURIER_DEDUPE_CAPACITY",
            DEFAULT_DEDUPE_CAPACITY,
            &mut lookup,
        )?;
        let cache_ttl = parse_millis("COURIER_CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS, &mut lookup)?;

        if max < base {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_POLL_MAX_MS",
                value: max.as_millis().to_string(),
                reason: "must be at least COURIER_POLL_BASE_MS".to_owned(),
            });
        }
        if backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_POLL_BACKOFF_MULTIPLIER",
                value: backoff_multiplier.to_string(),
                reason: "must be at least 1.0".to_owned(),
            });
        }
        if send_retry_max < send_retry_base {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_SEND_RETRY_MAX_MS",
                value: send_retry_max.to_string(),
                reason: "must be at least COURIER_SEND_RETRY_BASE_MS".to_owned(),
            });
        }
        if dedupe_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_DEDUPE_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if list_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_LIST_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let defaults = Self::default();
        Ok(Self {
            base_url,
            request_timeout,
            poll: PollConfig {
                active,
                base,
                inactive,
                max,
                backoff_multiplier,
                hidden_recheck,
                list_limit,
                ..defaults.poll
            },
            send_retry: RetryPolicy::new(send_retry_base, send_retry_max)
                .with_multiplier(defaults.send_retry.multiplier())
                .with_jitter(defaults.send_retry.jitter_ratio())
                .with_max_retries(send_max_retries),
            drain_interval,
            dedupe_capacity,
            cache_ttl,
            ..defaults
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.clone(),
        reason: err.to_string(),
    })
}

fn parse_millis<F>(key: &'static str, default_ms: u64, lookup: &mut F) -> Result<Duration, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let millis = parse_with_default(key, default_ms, lookup)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be greater than 0".to_owned(),
        });
    }
    Ok(Duration::from_millis(millis))
}

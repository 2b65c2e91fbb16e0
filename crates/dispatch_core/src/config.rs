//! Engine configuration.
//!
//! Every field has a default, so a config can come from a partial JSON file, from
//! `DISPATCH_*` environment variables, or be built in code with the `with_*` helpers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::retry::RetryPolicy;
use crate::tracking::TrackingConfig;

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FAST_POLL_MS: u64 = 3_000;
const DEFAULT_SLOW_POLL_MS: u64 = 10_000;
const DEFAULT_BOUNDARY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BOUNDARY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_BULK_PARALLELISM: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Base URL of the backend REST API.
    pub base_url: String,
    /// Bearer token forwarded on every backend call.
    pub bearer_token: Option<String>,
    pub request_timeout_ms: u64,
    /// Poll interval while the vehicle is moving.
    pub fast_poll_ms: u64,
    /// Poll interval once the vehicle has stopped.
    pub slow_poll_ms: u64,
    pub boundary_max_attempts: u32,
    pub boundary_backoff_ms: u64,
    /// Upper bound on concurrent assignments during bulk auto-assign.
    pub bulk_parallelism: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            fast_poll_ms: DEFAULT_FAST_POLL_MS,
            slow_poll_ms: DEFAULT_SLOW_POLL_MS,
            boundary_max_attempts: DEFAULT_BOUNDARY_MAX_ATTEMPTS,
            boundary_backoff_ms: DEFAULT_BOUNDARY_BACKOFF_MS,
            bulk_parallelism: DEFAULT_BULK_PARALLELISM,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DispatchError::InvalidPayload(format!("cannot read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            DispatchError::InvalidPayload(format!("invalid config {}: {err}", path.display()))
        })
    }

    /// Overlay `DISPATCH_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> DispatchResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with `DISPATCH_*` environment variables.
    pub fn from_env() -> DispatchResult<Self> {
        Self::default().with_env_overrides()
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> DispatchResult<Self> {
        if let Some(url) = lookup("DISPATCH_BASE_URL") {
            self.base_url = url;
        }
        if let Some(token) = lookup("DISPATCH_BEARER_TOKEN") {
            self.bearer_token = Some(token);
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_FAST_POLL_MS")? {
            self.fast_poll_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_SLOW_POLL_MS")? {
            self.slow_poll_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_BOUNDARY_MAX_ATTEMPTS")? {
            self.boundary_max_attempts = value;
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_BOUNDARY_BACKOFF_MS")? {
            self.boundary_backoff_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "DISPATCH_BULK_PARALLELISM")? {
            self.bulk_parallelism = value;
        }
        Ok(self)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_poll_intervals_ms(mut self, fast_ms: u64, slow_ms: u64) -> Self {
        self.fast_poll_ms = fast_ms;
        self.slow_poll_ms = slow_ms;
        self
    }

    pub fn with_bulk_parallelism(mut self, parallelism: usize) -> Self {
        self.bulk_parallelism = parallelism;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn boundary_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.boundary_max_attempts,
            Duration::from_millis(self.boundary_backoff_ms),
        )
    }

    pub fn tracking(&self) -> TrackingConfig {
        TrackingConfig {
            fast_interval: Duration::from_millis(self.fast_poll_ms),
            slow_interval: Duration::from_millis(self.slow_poll_ms),
            request_timeout: self.request_timeout(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> DispatchResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            DispatchError::InvalidPayload(format!("{key} has an invalid value `{raw}`"))
        }),
    }
}

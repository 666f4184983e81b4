//! JSON configuration shared by responders and requesters.
//!
//! Every field is optional; a missing field takes the library default, so
//! `{}` is a valid config. Durations are integer milliseconds.
//!
//! # Example
//!
//! ```
//! use multicast_lookup::config::DiscoveryConfig;
//!
//! let config = DiscoveryConfig::from_json_str(r#"{
//!     "group": "239.255.0.9",
//!     "port": 12000,
//!     "timeout_ms": 250,
//!     "max_attempts": 3
//! }"#).unwrap();
//!
//! assert_eq!(config.multicast.port, 12000);
//! assert_eq!(config.lookup_options().retry.max_attempts, 3);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedup::{DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_WINDOW};
use crate::error::{DiscoveryError, Result};
use crate::reply::DEFAULT_REPLY_QUEUE;
use crate::requester::{LookupOptions, RequesterBuilder};
use crate::responder::ResponderBuilder;
use crate::retry::{Backoff, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::transport::MulticastOptions;

/// Settings for one discovery domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Group, port, interface, TTL, loopback and reply host.
    #[serde(flatten)]
    pub multicast: MulticastOptions,

    /// Per-attempt lookup window.
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Return once this many responders answered.
    pub enough_replies: Option<usize>,

    /// Responder duplicate-suppression window; 0 disables it.
    pub dedup_window_ms: u64,
    pub dedup_capacity: usize,
    pub reply_queue: usize,
    pub answer_own_queries: bool,

    pub node_id: Option<String>,
    pub responder_id: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast: MulticastOptions::default(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed,
            enough_replies: None,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            reply_queue: DEFAULT_REPLY_QUEUE,
            answer_own_queries: true,
            node_id: None,
            responder_id: None,
        }
    }
}

impl DiscoveryConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded discovery config from {}", path.display());
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multicast.group.is_multicast() {
            return Err(DiscoveryError::InvalidConfig(format!(
                "group {} is not a multicast address",
                self.multicast.group
            )));
        }
        if self.multicast.port == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        self.lookup_options().validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout_per_attempt: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }

    pub fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            retry: self.retry_policy(),
            enough: self.enough_replies,
        }
    }

    fn dedup_window(&self) -> Option<Duration> {
        (self.dedup_window_ms > 0).then(|| Duration::from_millis(self.dedup_window_ms))
    }

    /// Requester builder carrying these settings as its defaults.
    pub fn requester_builder(&self) -> RequesterBuilder {
        let mut builder = RequesterBuilder::new()
            .multicast(self.multicast.clone())
            .timeout(Duration::from_millis(self.timeout_ms))
            .max_attempts(self.max_attempts)
            .backoff(self.backoff);
        if let Some(count) = self.enough_replies {
            builder = builder.enough_replies(count);
        }
        if let Some(id) = &self.node_id {
            builder = builder.node_id(id.clone());
        }
        builder
    }

    /// Responder builder with these settings. The caller still supplies a
    /// resolver.
    pub fn responder_builder(&self) -> ResponderBuilder {
        let mut builder = ResponderBuilder::new()
            .multicast(self.multicast.clone())
            .dedup_window(self.dedup_window())
            .dedup_capacity(self.dedup_capacity)
            .reply_queue(self.reply_queue)
            .answer_own_queries(self.answer_own_queries);
        if let Some(id) = &self.node_id {
            builder = builder.node_id(id.clone());
        }
        if let Some(id) = &self.responder_id {
            builder = builder.responder_id(id.clone());
        }
        builder
    }
}

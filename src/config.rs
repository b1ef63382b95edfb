//! Configuration for the operation engine

use crate::error::{MdnsError, Result};
use crate::types::DiscoveryMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default readiness-wait timeout. Long enough to mean "wait until something happens".
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(100_000_000);

/// Configuration shared by every operation an orchestrator starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single readiness wait before it is re-entered
    wait_timeout: Duration,
    /// How much a discovery result is populated before delivery
    discovery_mode: DiscoveryMode,
    /// Attempts at creating a resolver daemon before submission fails
    daemon_retries: u32,
    /// Delay between daemon creation attempts
    daemon_retry_delay: Duration,
    /// Registration domain; empty lets the resolver pick its default
    domain: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            discovery_mode: DiscoveryMode::Resolve,
            daemon_retries: 3,
            daemon_retry_delay: Duration::from_millis(100),
            domain: String::new(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness-wait timeout
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Get the readiness-wait timeout
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Set the discovery mode
    pub fn with_discovery_mode(mut self, mode: DiscoveryMode) -> Self {
        self.discovery_mode = mode;
        self
    }

    /// Get the discovery mode
    pub fn discovery_mode(&self) -> DiscoveryMode {
        self.discovery_mode
    }

    /// Set the number of daemon creation attempts
    pub fn with_daemon_retries(mut self, retries: u32) -> Self {
        self.daemon_retries = retries;
        self
    }

    /// Get the number of daemon creation attempts
    pub fn daemon_retries(&self) -> u32 {
        self.daemon_retries
    }

    /// Set the delay between daemon creation attempts
    pub fn with_daemon_retry_delay(mut self, delay: Duration) -> Self {
        self.daemon_retry_delay = delay;
        self
    }

    /// Get the delay between daemon creation attempts
    pub fn daemon_retry_delay(&self) -> Duration {
        self.daemon_retry_delay
    }

    /// Set the registration domain
    pub fn with_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.domain = domain.into();
        self
    }

    /// Get the registration domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout.is_zero() {
            return Err(MdnsError::configuration("Wait timeout must be greater than 0"));
        }

        if self.daemon_retries == 0 {
            return Err(MdnsError::configuration(
                "At least one daemon creation attempt is required",
            ));
        }

        if self.domain.contains("..") {
            return Err(MdnsError::configuration(format!(
                "Domain '{}' contains an empty label",
                self.domain
            )));
        }

        Ok(())
    }
}

use std::time::Duration;

use super::types::{Version, MDFU_PROTOCOL_VERSION};
use crate::error::{Error, Result};

/// Host side session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MdfuConfig {
    /// Transport level retries per command.
    pub retries: usize,
    /// Client resend requests tolerated per command.
    pub resend_limit: usize,
    /// Response timeout used until the client reports its own.
    pub fallback_timeout: Duration,
    /// Newest client protocol version accepted.
    pub max_protocol_version: Version,
}

impl Default for MdfuConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            resend_limit: 5,
            fallback_timeout: Duration::from_secs(10),
            max_protocol_version: MDFU_PROTOCOL_VERSION,
        }
    }
}

impl MdfuConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_resend_limit(mut self, limit: usize) -> Self {
        self.resend_limit = limit;
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    pub fn with_max_protocol_version(mut self, version: Version) -> Self {
        self.max_protocol_version = version;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fallback_timeout.is_zero() {
            return Err(Error::Configuration(
                "Fallback timeout must be larger than zero".into(),
            ));
        }
        Ok(())
    }
}

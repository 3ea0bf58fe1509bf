//! Server configuration

use crate::smtp::error::SmtpLimits;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name announced in the greeting and HELO replies
    pub hostname: String,
    /// Largest body accepted, in bytes. `None` means unbounded.
    pub max_message_size: Option<usize>,
    /// How long a read may block before the connection is dropped.
    /// `None` and zero both mean no limit.
    pub idle_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_max_message_size(mut self, max: Option<usize>) -> Self {
        self.max_message_size = max;
        self
    }

    /// A zero timeout is treated as no timeout
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            max_message_size: Some(SmtpLimits::MAX_DATA_SIZE),
            idle_timeout: None,
        }
    }
}

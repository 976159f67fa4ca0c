//! Native connection configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Time allowed for the close frame to be delivered before the transport is torn down.
pub const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Kind of data frame emitted by `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// Binary frames. Any byte sequence is allowed.
    #[default]
    Binary,
    /// Text frames. Every written buffer must be valid UTF-8.
    Text,
}

/// Configuration for a native stream connection.
#[derive(Clone, Debug)]
pub struct ConnConfig {
    /// Frame type used for outbound data.
    pub message_type: MessageType,
    /// Grace period for delivering the close frame.
    pub close_timeout: Duration,
    /// Reason text sent in the close frame.
    pub close_reason: String,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            message_type: MessageType::Binary,
            close_timeout: GRACEFUL_CLOSE_TIMEOUT,
            close_reason: "closed".to_string(),
        }
    }
}

impl ConnConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outbound frame type.
    #[must_use]
    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Set the close frame grace period.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the close frame reason.
    #[must_use]
    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = reason.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.close_timeout.is_zero() {
            return Err(Error::config("close timeout must be > 0"));
        }
        // Close frame payload is limited to 125 bytes, two of which hold the code.
        if self.close_reason.len() > 123 {
            return Err(Error::config("close reason must be at most 123 bytes"));
        }
        Ok(())
    }
}

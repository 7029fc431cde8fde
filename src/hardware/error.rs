//! Communication error types and handling

use thiserror::Error;

/// Communication error types for radio and transport interfaces
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    /// Connection to the message bus failed or was lost
    #[error("Connection lost to {endpoint}")]
    ConnectionLost { endpoint: String },
    /// Timeout waiting for the link to come up
    #[error("Communication timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// Publishing a message failed
    #[error("Publish to {topic} failed: {details}")]
    PublishFailed { topic: String, details: String },
    /// Radio-stack failure
    #[error("Radio error: {details}")]
    RadioError { details: String },
    /// Configuration error
    #[error("Configuration error: invalid {parameter} = {value}")]
    ConfigurationError { parameter: String, value: String },
    /// Reconnect retries exhausted; the process must restart
    #[error("Link down for {elapsed_ms}ms after {attempts} attempts, restart required")]
    RestartRequired { attempts: u32, elapsed_ms: u64 },
}

/// Result type for communication operations
pub type CommResult<T> = Result<T, CommError>;

/// Error recovery strategy for communication failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryStrategy {
    /// Wait and then retry
    RetryWithDelay { delay_ms: u64 },
    /// Drop this message and continue
    Skip,
    /// Restart the process
    Restart,
    /// Fail permanently
    Fail,
}

impl CommError {
    /// Get the recommended recovery strategy for this error
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            CommError::ConnectionLost { .. } => RecoveryStrategy::RetryWithDelay { delay_ms: 500 },
            CommError::Timeout { .. } => RecoveryStrategy::RetryWithDelay { delay_ms: 100 },
            CommError::PublishFailed { .. } => RecoveryStrategy::Skip,
            CommError::RadioError { .. } => RecoveryStrategy::Restart,
            CommError::ConfigurationError { .. } => RecoveryStrategy::Fail,
            CommError::RestartRequired { .. } => RecoveryStrategy::Restart,
        }
    }

    /// Whether the error points at the message-bus connection rather than
    /// the message itself
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            CommError::ConnectionLost { .. } | CommError::Timeout { .. } | CommError::PublishFailed { .. }
        )
    }

    /// Check if this error is recoverable without restarting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.recovery_strategy(),
            RecoveryStrategy::RetryWithDelay { .. } | RecoveryStrategy::Skip
        )
    }
}

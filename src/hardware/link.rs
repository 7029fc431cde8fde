//! Transport link supervision
//!
//! Anchors publish over a message-bus connection that can drop. The policy is
//! fail-fast: retry connecting at a fixed interval for a bounded time, then
//! give up with [`CommError::RestartRequired`] so the process is restarted
//! rather than silently running without a transport.

use crate::hardware::{CommError, CommResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Message-bus connection as seen by an anchor
pub trait TransportLink {
    fn is_connected(&self) -> bool;

    /// Attempt a single connection
    fn connect(&mut self) -> CommResult<()>;

    /// Record that traffic over the link failed; the next
    /// `is_connected` reports `false` until a `connect` succeeds
    fn mark_lost(&mut self);

    /// Endpoint description used in logs
    fn endpoint(&self) -> String;
}

/// Bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay between connection attempts (ms)
    pub retry_interval_ms: u64,
    /// Total time to keep retrying before requesting a restart (ms)
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval_ms: 500,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Number of attempts that fit in the timeout (at least one)
    pub fn max_attempts(&self) -> u32 {
        let attempts = self.connect_timeout_ms / self.retry_interval_ms.max(1);
        attempts.clamp(1, u32::MAX as u64) as u32
    }
}

/// Applies a [`ReconnectPolicy`] to a [`TransportLink`]
#[derive(Debug, Clone, Default)]
pub struct LinkSupervisor {
    policy: ReconnectPolicy,
}

impl LinkSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Make sure `link` is connected, retrying within the policy budget.
    ///
    /// `wait` is called between attempts; production code passes
    /// `std::thread::sleep`, tests pass a recorder.
    pub fn ensure_connected<L, W>(&self, link: &mut L, mut wait: W) -> CommResult<()>
    where
        L: TransportLink + ?Sized,
        W: FnMut(Duration),
    {
        if link.is_connected() {
            return Ok(());
        }

        let max_attempts = self.policy.max_attempts();
        let mut elapsed_ms = 0u64;

        for attempt in 1..=max_attempts {
            match link.connect() {
                Ok(()) => {
                    info!(endpoint = %link.endpoint(), attempt, "transport connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(endpoint = %link.endpoint(), attempt, max_attempts, error = %e, "connect failed");
                }
            }

            if attempt < max_attempts {
                wait(Duration::from_millis(self.policy.retry_interval_ms));
                elapsed_ms += self.policy.retry_interval_ms;
            }
        }

        Err(CommError::RestartRequired {
            attempts: max_attempts,
            elapsed_ms,
        })
    }
}

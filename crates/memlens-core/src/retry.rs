//! Retry policies for callers of the resolvers.
//!
//! Nothing inside the engine or the resolvers retries on its own; these are
//! for the layer above, which keeps asking until the target has finished
//! loading.

use std::time::Duration;

use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};

/// Decides how long to wait before the next attempt
pub trait RetryStrategy: Send + Sync {
    /// Delay before attempt number `attempt + 1`, `None` to give up.
    ///
    /// `attempt` counts failed attempts so far, starting at 1.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Give up after the first failure
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Some(Duration::from_secs_f64(secs.min(self.max.as_secs_f64())))
    }
}

/// Keep calling `op` until it yields a value, the strategy gives up, or
/// `cancel` fires.
///
/// Returns `Error::Cancelled` on cancellation and `Error::NotFound` when the
/// strategy is exhausted.
pub fn wait_for_target<T, F>(
    strategy: &dyn RetryStrategy,
    cancel: &CancelSignal,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Option<T>,
{
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(value) = op() {
            if attempts > 0 {
                info!("{} found after {} attempts", what, attempts + 1);
            }
            return Ok(value);
        }
        attempts += 1;

        let Some(delay) = strategy.next_delay(attempts) else {
            debug!("Giving up on {} after {} attempts", what, attempts);
            return Err(Error::NotFound(what.to_string()));
        };

        if attempts == 1 {
            info!(
                "Waiting for target: {} not available, retrying in {:.1}s",
                what,
                delay.as_secs_f64()
            );
        } else {
            debug!(
                "Waiting for target: {} still not available, retrying in {:.1}s (attempt {})",
                what,
                delay.as_secs_f64(),
                attempts
            );
        }

        if cancel.wait(delay) {
            return Err(Error::Cancelled);
        }
    }
}

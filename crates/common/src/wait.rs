//! Poll-until-condition synchronization primitive
//!
//! Every blocking wait in the engine routes through [`await_condition`];
//! there are no ad-hoc sleeps anywhere else. A probe reports either a
//! satisfied condition or a "not yet" observation that becomes the timeout
//! diagnostic. Transient probe errors are absorbed as retry fuel; fatal
//! errors propagate immediately.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Poll spacing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Successive polls spaced by the poll interval
    Fixed,
    /// Interval doubles each retry, capped at `interval * 2^6`
    Exponential,
}

/// Wait parameters, passed by value into every wait call
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Backoff,
    /// Attempt cap; 0 means unbounded within the timeout
    pub max_retries: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            backoff: Backoff::Fixed,
            max_retries: 0,
        }
    }
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the next poll, given the number of completed attempts.
    /// Exponential doubling is capped at `2^6` so long waits stay responsive.
    pub fn delay_after(&self, completed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.poll_interval,
            Backoff::Exponential => {
                let exp = completed_attempts.saturating_sub(1).min(6);
                self.poll_interval * 2u32.pow(exp)
            }
        }
    }
}

/// Outcome of a single probe evaluation
pub enum Probe<T> {
    /// Condition satisfied, wait completes with this value
    Ready(T),
    /// Not yet; optionally carries the last observed state for diagnostics
    /// (e.g. best match score so far, partial OCR text)
    Pending(Option<String>),
}

impl<T> Probe<T> {
    pub fn pending(observed: impl Into<String>) -> Self {
        Probe::Pending(Some(observed.into()))
    }
}

/// Repeatedly evaluate `probe` until it is ready or the policy is exhausted.
///
/// The probe runs once immediately, then after each backoff delay. The last
/// delay is clamped to the remaining budget so a final probe still happens
/// at the timeout edge. Transient errors (see [`Error::is_transient`]) count
/// as a pending observation; any other error aborts the wait.
pub async fn await_condition<T, F, Fut>(policy: WaitPolicy, probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    await_condition_cancellable(policy, &CancellationToken::new(), probe).await
}

/// Like [`await_condition`], cancellable between poll iterations.
pub async fn await_condition_cancellable<T, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_observed: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { attempts });
        }

        attempts += 1;
        match probe().await {
            Ok(Probe::Ready(value)) => {
                trace!(attempts, elapsed = ?start.elapsed(), "condition satisfied");
                return Ok(value);
            }
            Ok(Probe::Pending(observed)) => {
                if observed.is_some() {
                    last_observed = observed;
                }
            }
            Err(e) if e.is_transient() => {
                trace!(attempts, error = %e, "transient probe failure");
                last_observed = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(Error::Timeout {
                attempts,
                elapsed,
                last_observed,
            });
        }
        if policy.max_retries > 0 && attempts >= policy.max_retries {
            return Err(Error::Timeout {
                attempts,
                elapsed,
                last_observed,
            });
        }

        let delay = policy.delay_after(attempts).min(policy.timeout - elapsed);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { attempts });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

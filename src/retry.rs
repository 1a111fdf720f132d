use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn linear(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn none() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay * (attempt + 1),
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are spent. `op` receives the zero-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, ImportError>
    where
        F: FnMut(u32) -> Result<T, ImportError>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries && err.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{label} failed (attempt {} of {}): {err}; retrying in {}ms",
                        attempt + 1,
                        self.retries + 1,
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(2, Duration::from_secs(2))
    }
}

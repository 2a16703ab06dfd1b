//! Exponential backoff polling and deadline helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use super::error::ResourceError;

/// Poll schedule doubling from `initial` up to `max`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    /// First delay between attempts.
    pub initial: Duration,
    /// Ceiling for the delay.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(32),
        }
    }
}

impl Backoff {
    /// Schedule with no delay, used by tests driving scripted clients.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Returns the delay preceding attempt number `attempt` (zero based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Calls `poll` until it yields a value, sleeping between attempts.
    ///
    /// The loop itself is unbounded; callers wrap it with [`within`].
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `poll`.
    pub async fn until<T, F, Fut>(&self, what: &str, mut poll: F) -> Result<T, ResourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ResourceError>>,
    {
        let mut attempt = 0;
        loop {
            if let Some(value) = poll().await? {
                return Ok(value);
            }
            let delay = self.delay(attempt);
            tracing::debug!(what, ?delay, "waiting");
            sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Bounds `future` by `limit`, mapping expiry to [`ResourceError::Timeout`].
///
/// # Errors
///
/// Returns the inner error, or a timeout naming `what`.
pub async fn within<T, Fut>(limit: Duration, what: &str, future: Fut) -> Result<T, ResourceError>
where
    Fut: Future<Output = Result<T, ResourceError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ResourceError::Timeout(what.to_owned()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2)]
    #[case(1, 4)]
    #[case(3, 16)]
    #[case(4, 32)]
    #[case(10, 32)]
    fn delay_doubles_up_to_cap(#[case] attempt: u32, #[case] seconds: u64) {
        assert_eq!(Backoff::default().delay(attempt), Duration::from_secs(seconds));
    }

    #[tokio::test]
    async fn until_returns_first_ready_value() {
        let mut calls = 0;
        let value = Backoff::immediate()
            .until("counter", || {
                calls += 1;
                let snapshot = calls;
                async move { Ok((snapshot == 3).then_some(snapshot)) }
            })
            .await;
        assert_eq!(value, Ok(3));
    }

    #[tokio::test]
    async fn within_reports_timeouts() {
        let result: Result<(), ResourceError> = within(
            Duration::from_millis(10),
            "machines",
            std::future::pending(),
        )
        .await;
        assert_eq!(result, Err(ResourceError::Timeout(String::from("machines"))));
    }
}

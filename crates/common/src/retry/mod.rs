use std::{future::Future, time::Duration};

use tracing::{error, warn};

pub mod policies;

/// Runs a fallible async operation with a backoff retry.
///
/// Retries the given `operation` up to `max_retries` times, or forever when
/// `max_retries` is `None`, sleeping between attempts according to the
/// provided [`Backoff`].
///
/// Logs a warning on each failure and an error if all retries are exhausted.
///
/// # Example
///
/// ```rust,no_run
/// use flashbake_common::retry::{policies::FixedInterval, retry_with_backoff};
///
/// async fn try_something() -> Result<(), &'static str> {
///     Err("failed to do something")
/// }
///
/// # async fn run() {
/// let result = retry_with_backoff("my_task", Some(3), &FixedInterval::new(500), try_something).await;
/// # }
/// ```
pub async fn retry_with_backoff<R, E, F, Fut>(
    name: &str,
    max_retries: Option<u32>,
    backoff: &impl Backoff,
    mut operation: F,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: std::fmt::Debug,
{
    let mut delay = backoff.base_delay_ms();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if max_retries.map_or(true, |max| attempt < max) => {
                attempt = attempt.saturating_add(1);
                warn!(
                    "Attempt {} failed with {:?} while running {}. Retrying in {}ms",
                    attempt, err, name, delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = backoff.next_delay_ms(delay);
            }
            Err(err) => {
                error!(
                    "Max retries exceeded while running {}, returning with the last error",
                    name
                );
                return Err(err);
            }
        }
    }
}

pub trait Backoff {
    /// Base delay in ms.
    fn base_delay_ms(&self) -> u64;

    /// Generates next delay given current delay.
    fn next_delay_ms(&self, curr_delay_ms: u64) -> u64;
}

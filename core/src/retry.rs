use std::future::Future;
use std::num::NonZeroU32;
use thiserror::Error;

/// The operation failed on every attempt
#[derive(Error, Debug)]
#[error("failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::error::Error> {
    pub attempts: u32,
    pub last: E,
}

/// Run `operation` until it succeeds, at most `max_attempts` times.
///
/// Retries are immediate. The operation receives the 1-based attempt number
/// and must not carry state between attempts.
pub async fn retry<T, E, F, Fut>(
    max_attempts: NonZeroU32,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.get();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                log::debug!("Retrying after attempt {}/{}: {}", attempt, max_attempts, err);
                attempt += 1;
            }
        }
    }
}

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based): exponential from `base`,
/// plus up to half of that again as jitter.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = exp.as_millis() as u64 / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    exp + Duration::from_millis(jitter)
}

/// Run `op` up to `attempts` times, sleeping with [`backoff_delay`] between
/// tries as long as `retryable` says the error is worth another go.
pub async fn retry<T, E, F, Fut, R>(
    attempts: u32,
    base: Duration,
    retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && retryable(&err) => {
                let delay = backoff_delay(attempt, base);
                tracing::warn!(attempt, ?delay, "retrying after error: {}", err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

//! Retrying fetches until they yield a value.

use std::{future::Future, time::Duration};

use backon::{Backoff, BackoffBuilder, ExponentialBuilder};
use tracing::{debug, trace};

use crate::error::FetchError;

const MIN_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(8);

fn build_backoff() -> impl Backoff {
    ExponentialBuilder::new()
        .with_min_delay(MIN_DELAY)
        .with_max_delay(MAX_DELAY)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Runs `fetch` until it yields a value, sleeping with exponential backoff
/// between attempts.
///
/// A missing value and a failed fetch are both treated as "try again";
/// the first value ever returned is final. The future never completes if
/// the value never appears, so callers that need a bound must apply their
/// own timeout.
pub(crate) async fn until_found<T, F, Fut>(fetch: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, FetchError>>,
{
    let mut backoff = build_backoff();
    loop {
        match fetch().await {
            Ok(Some(value)) => return value,
            Ok(None) => trace!("not found, retrying"),
            Err(err) => debug!("fetch failed, retrying: {err}"),
        }
        let delay = backoff.next().unwrap_or(MAX_DELAY);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_a_value_appears() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let count = attempts.clone();
        let value = until_found(move || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(FetchError::NotFound),
                    1 | 2 => Ok(None),
                    _ => Ok(Some(42u32)),
                }
            }
        })
        .await;
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}

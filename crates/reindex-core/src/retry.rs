//! Bounded retry for page fetches

use std::future::Future;

use crate::error::ReindexError;
use crate::source::TransportError;

/// Attempts per fetch, first attempt included.
pub const MAX_RETRIES: u32 = 3;

/// Run a fallible fetch until it succeeds or `MAX_RETRIES` attempts have failed.
///
/// Retries are immediate (no backoff). `retry_count` is bumped on every failure,
/// so after a successful call it holds the number of retries that were needed.
/// On exhaustion the last transport error is returned as
/// [`ReindexError::FetchExhausted`].
pub async fn fetch_with_retry<T, F, Fut>(
    label: &str,
    retry_count: &mut u32,
    mut attempt_fn: F,
) -> Result<T, ReindexError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                *retry_count += 1;
                if *retry_count < MAX_RETRIES {
                    log::warn!("{label}: {e}; retry {retry_count}/{MAX_RETRIES}");
                    continue;
                }
                log::error!("{label}: failed permanently after {retry_count} attempts: {e}");
                return Err(ReindexError::FetchExhausted {
                    label: label.to_string(),
                    attempts: *retry_count,
                    last: e,
                });
            }
        }
    }
}

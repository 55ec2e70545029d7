//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::trace;

use crate::error::{AdapterError, AdapterErrorKind};

/// Re-runs an attempt every `interval` until it succeeds, fails terminally, or
/// `timeout` elapses. Only errors flagged `retriable` are retried.
#[derive(Clone, Copy, Debug)]
pub struct Ticker {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Ticker {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub async fn tick<T, F, Fut>(&self, mut attempt: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;
        let mut last: Option<AdapterError> = None;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            // A zero budget still gets one full attempt.
            let outcome = if remaining.is_zero() {
                Ok(attempt().await)
            } else {
                timeout(remaining, attempt()).await
            };
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.retriable => {
                    trace!(target: "cdp-wait", attempts, %err, "attempt not ready");
                    last = Some(err);
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => break,
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(self.interval.min(remaining)).await;
        }

        let mut err = AdapterError::new(AdapterErrorKind::Timeout).with_hint(format!(
            "gave up after {attempts} attempts in {:?}",
            self.timeout
        ));
        if let Some(last) = last {
            err = err.with_data(serde_json::json!({ "last_error": last.to_string() }));
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_attempt_succeeds() {
        let calls = &AtomicU32::new(0);
        let ticker = Ticker::new(Duration::from_secs(2), Duration::from_millis(100));
        let started = Instant::now();
        let value = ticker
            .tick(|| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(AdapterError::not_found("#late"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let ticker = Ticker::new(Duration::from_millis(450), Duration::from_millis(100));
        let started = Instant::now();
        let err = ticker
            .tick(|| async { Err::<(), _>(AdapterError::invisible("#hidden")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert_eq!(started.elapsed(), Duration::from_millis(450));
        assert!(err.data.unwrap()["last_error"]
            .as_str()
            .unwrap()
            .contains("not visible"));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_stop_immediately() {
        let calls = &AtomicU32::new(0);
        let ticker = Ticker::new(Duration::from_secs(5), Duration::from_millis(100));
        let err = ticker
            .tick(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AdapterError::session_closed())
            })
            .await
            .unwrap_err();
        assert!(err.is_session_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_still_attempts_once() {
        let calls = &AtomicU32::new(0);
        let ticker = Ticker::new(Duration::ZERO, Duration::from_millis(100));

        let value = ticker
            .tick(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok::<_, AdapterError>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        calls.store(0, Ordering::SeqCst);
        let err = ticker
            .tick(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AdapterError::not_found("#missing"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.data.unwrap()["last_error"].as_str().unwrap().contains("#missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_are_cut_off() {
        let ticker = Ticker::new(Duration::from_millis(200), Duration::from_millis(50));
        let err = ticker
            .tick(|| async {
                sleep(Duration::from_secs(60)).await;
                Ok::<_, AdapterError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
    }
}

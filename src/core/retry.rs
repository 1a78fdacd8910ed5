//! Capped exponential backoff for node computations that make outbound calls.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::process_context::NodeContext;
use crate::error::{ErrorRetryability, NodeError, NodeResult};
use crate::value::{DataValue, Outputs};

/// Retry policy for outbound calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wall-clock ceiling across every attempt
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    10_000
}

fn default_max_elapsed_ms() -> u64 {
    300_000
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            max_elapsed_ms: default_max_elapsed_ms(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Delay before retry number `attempt` (0-based). A rate-limit response that
/// names its own delay wins over the computed backoff.
pub fn calculate_retry_interval(config: &RetryConfig, attempt: u32, error: &NodeError) -> u64 {
    if let NodeError::RateLimited {
        retry_after_ms: Some(retry_after),
    } = error
    {
        return *retry_after;
    }

    let exponent = attempt.min(i32::MAX as u32) as i32;
    let multiplied = config.initial_interval_ms as f64 * config.multiplier.powi(exponent);
    let interval = if config.jitter {
        let jitter = rand::random::<f64>() * multiplied * 0.1;
        multiplied + jitter
    } else {
        multiplied
    };

    (interval as u64).min(config.max_interval_ms)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, runs out of
/// attempts or time, or `signal` fires. `on_rate_limited` is called before
/// sleeping on a rate-limit failure.
pub async fn retry_with_policy<T, F, Fut>(
    config: &RetryConfig,
    signal: &CancellationToken,
    mut on_rate_limited: impl FnMut(&NodeError),
    mut op: F,
) -> NodeResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = NodeResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        if signal.is_cancelled() {
            return Err(NodeError::Aborted);
        }

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match error.retryability() {
            ErrorRetryability::NonRetryable => return Err(error),
            ErrorRetryability::RateLimited => on_rate_limited(&error),
            ErrorRetryability::Retryable => {}
        }

        if attempt >= config.max_retries {
            tracing::warn!(attempt, error = %error, "retry attempts exhausted");
            return Err(error);
        }
        let delay = calculate_retry_interval(config, attempt, &error);
        let elapsed = started.elapsed().as_millis() as u64;
        if elapsed.saturating_add(delay) > config.max_elapsed_ms {
            tracing::warn!(attempt, elapsed_ms = elapsed, error = %error, "retry time budget exhausted");
            return Err(error);
        }

        tracing::debug!(attempt, delay_ms = delay, error = %error, "retrying");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            _ = signal.cancelled() => return Err(NodeError::Aborted),
        }
        attempt += 1;
    }
}

/// [`retry_with_policy`] bound to a node: rate-limit retries surface as a
/// `{"status": "retrying"}` partial output.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    ctx: &NodeContext,
    op: F,
) -> NodeResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = NodeResult<T>>,
{
    retry_with_policy(
        config,
        ctx.signal(),
        |_| {
            let mut outputs = Outputs::new();
            outputs.insert("status".to_string(), DataValue::string("retrying"));
            ctx.emit_partial_output(outputs);
        },
        op,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            max_elapsed_ms: 10_000,
            initial_interval_ms: 1,
            max_interval_ms: 2,
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_interval_is_capped_exponential() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let err = NodeError::Transient("reset".into());
        assert_eq!(calculate_retry_interval(&config, 0, &err), 500);
        assert_eq!(calculate_retry_interval(&config, 2, &err), 2000);
        assert_eq!(calculate_retry_interval(&config, 20, &err), 60_000);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let config = RetryConfig::default();
        let err = NodeError::Transient("reset".into());
        for _ in 0..50 {
            let interval = calculate_retry_interval(&config, 1, &err);
            assert!((1000..=1100).contains(&interval), "{interval}");
        }
    }

    #[test]
    fn test_retry_after_wins() {
        let err = NodeError::RateLimited {
            retry_after_ms: Some(1234),
        };
        assert_eq!(calculate_retry_interval(&RetryConfig::default(), 3, &err), 1234);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let signal = CancellationToken::new();
        let c = calls.clone();
        let result = retry_with_policy(&fast(), &signal, |_| {}, move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NodeError::Transient("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let signal = CancellationToken::new();
        let c = calls.clone();
        let result: NodeResult<()> = retry_with_policy(&fast(), &signal, |_| {}, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async {
                Err(NodeError::ClientError {
                    status: 400,
                    message: "bad request".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(NodeError::ClientError { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_notifies_and_gives_up_after_max_retries() {
        let notified = Arc::new(AtomicU32::new(0));
        let signal = CancellationToken::new();
        let n = notified.clone();
        let result: NodeResult<()> = retry_with_policy(
            &fast(),
            &signal,
            move |_| {
                n.fetch_add(1, Ordering::SeqCst);
            },
            |_| async {
                Err(NodeError::RateLimited {
                    retry_after_ms: Some(1),
                })
            },
        )
        .await;
        assert!(matches!(result, Err(NodeError::RateLimited { .. })));
        assert_eq!(notified.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_cancelled_signal_aborts() {
        let signal = CancellationToken::new();
        signal.cancel();
        let result: NodeResult<()> =
            retry_with_policy(&fast(), &signal, |_| {}, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(NodeError::Aborted)));
    }
}

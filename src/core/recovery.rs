//! 重试策略与活动重试执行
//!
//! RetryPolicy 在调度时附加到每个 ActivityTask，由宿主执行（编排器逻辑从不自行重试）。
//! 瞬时错误与单次超时按指数退避重试；致命错误立即停止；预算耗尽后返回 ActivityFailure。

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::error::{ActivityError, ActivityFailure, FailureReason};

/// 单个活动的重试配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），至少 1
    pub max_attempts: u32,
    /// 首次重试前的等待（毫秒）
    pub first_retry_interval_ms: u64,
    /// 退避系数，至少 1.0
    pub backoff_coefficient: f64,
    /// 单次等待上限（毫秒）
    pub max_retry_interval_ms: u64,
    /// 单次尝试超时（毫秒），超时算作一次失败
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_retry_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            max_retry_interval_ms: 30_000,
            attempt_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, first_retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            first_retry_interval_ms: first_retry_interval.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_max_retry_interval(mut self, interval: Duration) -> Self {
        self.max_retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout_ms = attempt_timeout.as_millis() as u64;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms.max(1))
    }

    /// 第 `failed_attempt` 次失败后、下一次尝试前的等待：first × coeff^(n-1)，不超过上限
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let coefficient = self.backoff_coefficient.max(1.0);
        let millis = self.first_retry_interval_ms as f64 * coefficient.powi(exponent);
        let capped = millis.min(self.max_retry_interval_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// 按策略执行活动：`op` 接收当前尝试序号（从 1 开始）
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ActivityFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let outcome = match timeout(policy.attempt_timeout(), op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::Transient(format!(
                "attempt timed out after {}ms",
                policy.attempt_timeout_ms
            ))),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(activity = %label, attempt, "activity succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            tracing::error!(activity = %label, attempt, error = %err, "activity failed (fatal)");
            return Err(ActivityFailure {
                reason: FailureReason::Fatal,
                message: err.message().to_string(),
                attempts: attempt,
            });
        }

        if attempt >= max_attempts {
            tracing::error!(activity = %label, attempt, error = %err, "activity retries exhausted");
            return Err(ActivityFailure {
                reason: FailureReason::RetriesExhausted,
                message: err.message().to_string(),
                attempts: attempt,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            activity = %label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "activity attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
            .with_max_retry_interval(Duration::from_millis(5))
            .with_attempt_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_backoff_coefficient(2.0)
            .with_max_retry_interval(Duration::from_millis(350));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_counts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(3), "model_call", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ActivityError::Transient("rate limited".to_string())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.reason, FailureReason::RetriesExhausted);
        assert_eq!(failure.message, "rate limited");
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(5), "model_call", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ActivityError::Fatal("invalid api key".to_string())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().reason, FailureReason::Fatal);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let result = run_with_retry(&fast_policy(3), "tool_call", |attempt| async move {
            if attempt < 3 {
                Err(ActivityError::Transient("network".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_millis(10));
        let result: Result<(), _> = run_with_retry(&policy, "tool_call", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("timed out"));
    }
}

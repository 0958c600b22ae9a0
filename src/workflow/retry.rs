//! 重试策略
//!
//! 按错误分类决定同一阶段是否再试、等多久

use std::time::Duration;

use crate::config::Config;
use crate::error::{PublishError, RetryClass};

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待后重试
    Retry(Duration),
    /// 放弃当前 provider（或整个任务，取决于错误分类）
    GiveUp,
}

/// 指数退避重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 单个阶段最多尝试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            initial_delay: Duration::from_millis(config.backoff_initial_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// 第 n 次失败后的等待时间：min(initial × multiplier^(n−1), max)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// 某类错误在一个阶段内允许的尝试次数
    pub fn tries_allowed(&self, class: RetryClass) -> u32 {
        match class {
            RetryClass::Transient => self.max_retries,
            RetryClass::RetryOnce => self.max_retries.min(2),
            RetryClass::ProviderFatal | RetryClass::TaskFatal => 1,
        }
    }

    /// 已失败 `failures` 次之后的决策
    pub fn decide(&self, error: &PublishError, failures: u32) -> RetryDecision {
        if failures < self.tries_allowed(error.retry_class()) {
            RetryDecision::Retry(self.delay_for(failures))
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_errors_use_all_tries() {
        let policy = RetryPolicy::default();
        let err = PublishError::network("connection reset");
        assert!(matches!(policy.decide(&err, 1), RetryDecision::Retry(_)));
        assert!(matches!(policy.decide(&err, 2), RetryDecision::Retry(_)));
        assert_eq!(policy.decide(&err, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_authentication_retried_once() {
        let policy = RetryPolicy::default();
        let err = PublishError::Authentication("bad password".into());
        assert!(matches!(policy.decide(&err, 1), RetryDecision::Retry(_)));
        assert_eq!(policy.decide(&err, 2), RetryDecision::GiveUp);
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&PublishError::safety("wrong article"), 1),
            RetryDecision::GiveUp
        );
        let init = PublishError::Initialization {
            provider: crate::models::ProviderKind::Agent,
            message: "no llm".into(),
        };
        assert_eq!(policy.decide(&init, 1), RetryDecision::GiveUp);
    }
}

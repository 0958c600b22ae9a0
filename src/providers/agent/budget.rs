//! Token 预算与成本
//!
//! 每次模型调用前检查预算，调用后入账。超限返回 `TokenBudgetExceededError`。

use crate::error::{BudgetScope, PublishError};
use crate::services::TokenUsage;

/// 单价（美元 / 百万 token）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TokenPricing {
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.input_tokens as f64 * self.input_per_million / 1_000_000.0
            + usage.output_tokens as f64 * self.output_per_million / 1_000_000.0
    }
}

/// 会话级 + 单次操作级的 token 预算
#[derive(Debug, Clone)]
pub struct TokenBudget {
    operation_limit: u64,
    session_limit: u64,
    pricing: TokenPricing,
    operation_used: u64,
    session_used: u64,
    cost_usd: f64,
}

impl TokenBudget {
    pub fn new(operation_limit: u64, session_limit: u64, pricing: TokenPricing) -> Self {
        Self {
            operation_limit,
            session_limit,
            pricing,
            operation_used: 0,
            session_used: 0,
            cost_usd: 0.0,
        }
    }

    /// 新的一次操作（login / create_article / ...）开始
    pub fn begin_operation(&mut self) {
        self.operation_used = 0;
    }

    /// 下一次调用预计消耗 `estimate` 个 token，超出任一上限即拒绝
    pub fn ensure_capacity(&self, estimate: u64) -> Result<(), PublishError> {
        if self.session_used + estimate > self.session_limit {
            return Err(PublishError::TokenBudgetExceeded {
                scope: BudgetScope::Session,
                used: self.session_used,
                limit: self.session_limit,
            });
        }
        if self.operation_used + estimate > self.operation_limit {
            return Err(PublishError::TokenBudgetExceeded {
                scope: BudgetScope::Operation,
                used: self.operation_used,
                limit: self.operation_limit,
            });
        }
        Ok(())
    }

    /// 记录一次调用的实际用量
    pub fn record(&mut self, usage: TokenUsage) {
        self.operation_used += usage.total();
        self.session_used += usage.total();
        self.cost_usd += self.pricing.cost(usage);
    }

    pub fn session_used(&self) -> u64 {
        self.session_used
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICING: TokenPricing = TokenPricing {
        input_per_million: 3.0,
        output_per_million: 15.0,
    };

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn test_cost_uses_separate_rates() {
        let cost = PRICING.cost(usage(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_operation_limit_resets_per_operation() {
        let mut budget = TokenBudget::new(1_000, 10_000, PRICING);
        budget.record(usage(800, 100));
        assert!(matches!(
            budget.ensure_capacity(200),
            Err(PublishError::TokenBudgetExceeded {
                scope: BudgetScope::Operation,
                used: 900,
                limit: 1_000
            })
        ));

        budget.begin_operation();
        assert!(budget.ensure_capacity(200).is_ok());
        assert_eq!(budget.session_used(), 900);
    }

    #[test]
    fn test_session_limit_is_checked_before_call() {
        let mut budget = TokenBudget::new(5_000, 2_000, PRICING);
        budget.record(usage(1_500, 300));
        budget.begin_operation();
        let err = budget.ensure_capacity(500).unwrap_err();
        assert!(matches!(
            err,
            PublishError::TokenBudgetExceeded {
                scope: BudgetScope::Session,
                ..
            }
        ));
        assert_eq!(err.kind(), "TokenBudgetExceededError");
    }
}

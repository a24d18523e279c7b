//! Per-request token budget guarding context assembly.
//!
//! A [`TokenBudget`] is a bounded counter: `consumed` never exceeds `max`.
//! Each in-flight request owns its own budget; the type is deliberately not
//! thread-safe.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BudgetError {
    /// Consuming the requested amount would exceed the budget.
    #[error("over budget: requested {requested}, remaining {remaining} of {max}")]
    #[diagnostic(
        code(safetydesk::budget::over_budget),
        help("Stop accumulating context; the prompt is as large as it may get.")
    )]
    OverBudget {
        requested: u32,
        remaining: u32,
        max: u32,
    },
}

/// Bounded token counter for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    max: u32,
    consumed: u32,
}

impl TokenBudget {
    pub fn new(max: u32) -> Self {
        Self { max, consumed: 0 }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.consumed
    }

    /// Whether `amount` tokens can still be consumed.
    pub fn can_consume(&self, amount: u32) -> bool {
        amount <= self.remaining()
    }

    /// Consume `amount` tokens, failing without mutation when the budget
    /// would be exceeded.
    pub fn consume(&mut self, amount: u32) -> Result<(), BudgetError> {
        if !self.can_consume(amount) {
            return Err(BudgetError::OverBudget {
                requested: amount,
                remaining: self.remaining(),
                max: self.max,
            });
        }
        self.consumed += amount;
        Ok(())
    }

    /// Reset the counter to zero consumed.
    pub fn reset(&mut self) {
        self.consumed = 0;
    }
}

/// Estimate the token cost of a piece of text.
///
/// Whitespace-word count scaled by 4/3, matching the heuristic the prompt
/// assembly was tuned against. Empty text costs zero.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u32;
    (words * 4).div_ceil(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn consume_within_budget() {
        let mut budget = TokenBudget::new(100);
        assert!(budget.consume(60).is_ok());
        assert_eq!(budget.consumed(), 60);
        assert_eq!(budget.remaining(), 40);
    }

    #[test]
    fn over_budget_fails_without_mutation() {
        let mut budget = TokenBudget::new(100);
        budget.consume(90).unwrap();
        let err = budget.consume(20).unwrap_err();
        assert!(matches!(err, BudgetError::OverBudget { requested: 20, .. }));
        assert_eq!(budget.consumed(), 90);
    }

    #[test]
    fn reset_clears_consumption() {
        let mut budget = TokenBudget::new(10);
        budget.consume(10).unwrap();
        budget.reset();
        assert_eq!(budget.remaining(), 10);
    }

    #[test]
    fn estimate_scales_with_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("three short words"), 4);
        assert_eq!(estimate_tokens("one two three four five six"), 8);
    }

    proptest! {
        // After any sequence of successful consumes, the invariant holds and
        // a rejected consume leaves state untouched.
        #[test]
        fn consumed_never_exceeds_max(max in 0u32..10_000, amounts in proptest::collection::vec(0u32..500, 0..50)) {
            let mut budget = TokenBudget::new(max);
            for amount in amounts {
                let before = budget.consumed();
                match budget.consume(amount) {
                    Ok(()) => prop_assert_eq!(budget.consumed(), before + amount),
                    Err(_) => prop_assert_eq!(budget.consumed(), before),
                }
                prop_assert!(budget.consumed() <= budget.max());
            }
        }
    }
}

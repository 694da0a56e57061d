//! Bounded retry with fixed backoff.
//!
//! The adapter handshake is the only operation on the charge path allowed to
//! fail transiently and be reattempted; everything else either succeeds or
//! faults. [`Retry`] carries the attempt budget and inter-attempt backoff,
//! and the [`retry!`] macro re-evaluates a fallible `.await` expression until
//! it succeeds or the budget is spent. The budget counts *attempts*, so a
//! budget of 3 means at most three tries and two backoff sleeps.

use embassy_time::{Duration, Timer};

/// Attempt budget plus backoff for one retryable operation.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    budget: u8,
    backoff: Duration,
}

impl Retry {
    /// Policy with `budget` total attempts and `backoff_ms` between them.
    /// A zero budget is rounded up to one attempt.
    #[must_use]
    pub const fn new(budget: u8, backoff_ms: u64) -> Self {
        let budget = if budget == 0 { 1 } else { budget };
        Self {
            budget,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn budget(&self) -> u8 {
        self.budget
    }

    /// Sleep the inter-attempt backoff.
    pub async fn backoff_wait(&self) {
        Timer::after(self.backoff).await;
    }
}

/// Evaluate a fallible `.await` expression up to the policy's budget,
/// sleeping the backoff between attempts. Yields the last `Result`.
///
/// ```ignore
/// let retry = Retry::new(3, 50);
/// let cap = retry!(retry, adapter.request_output(9000, 3000).await)?;
/// ```
#[macro_export]
macro_rules! retry {
    ($policy:expr, $op:expr) => {{
        let policy = &$policy;
        let mut attempts: u8 = 1;
        let mut result = $op;
        while result.is_err() && attempts < policy.budget() {
            policy.backoff_wait().await;
            result = $op;
            attempts = attempts.saturating_add(1);
        }
        result
    }};
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]

    use super::*;
    use core::cell::Cell;

    struct Flaky {
        calls: Cell<u8>,
        succeed_on: u8,
    }

    impl Flaky {
        async fn poke(&self) -> Result<u8, ()> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n >= self.succeed_on {
                Ok(n)
            } else {
                Err(())
            }
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let op = Flaky {
            calls: Cell::new(0),
            succeed_on: 1,
        };
        let r = Retry::new(3, 0);
        assert_eq!(retry!(r, op.poke().await), Ok(1));
        assert_eq!(op.calls.get(), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let op = Flaky {
            calls: Cell::new(0),
            succeed_on: 3,
        };
        let r = Retry::new(3, 0);
        assert_eq!(retry!(r, op.poke().await), Ok(3));
        assert_eq!(op.calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_yields_last_error_after_exact_attempts() {
        let op = Flaky {
            calls: Cell::new(0),
            succeed_on: u8::MAX,
        };
        let r = Retry::new(3, 0);
        assert_eq!(retry!(r, op.poke().await), Err(()));
        assert_eq!(op.calls.get(), 3, "budget counts attempts, not retries");
    }

    #[tokio::test]
    async fn zero_budget_still_attempts_once() {
        let op = Flaky {
            calls: Cell::new(0),
            succeed_on: 1,
        };
        let r = Retry::new(0, 0);
        assert_eq!(retry!(r, op.poke().await), Ok(1));
    }
}

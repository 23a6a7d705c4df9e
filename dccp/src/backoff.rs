//! Exponential backoff used by the Request, PARTOPEN and Close
//! timers.

use futures_timer::Delay;
use std::time::Duration;

/// The total sleep budget of a backoff ran out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Expired;

/// A doubling retry timer with a per-retry cap and a total budget.
pub struct BackOff {
    period: u64,
    cap: u64,
    budget: u64,
    consumed: u64,
}

impl BackOff {
    /// Creates a backoff that starts at `first` nanoseconds, doubles
    /// up to `cap` per retry and refuses to sleep once `budget`
    /// nanoseconds have been consumed in total.
    pub fn new(first: u64, budget: u64, cap: u64) -> BackOff {
        BackOff {
            period: first.max(1),
            cap: cap.max(1),
            budget,
            consumed: 0,
        }
    }

    /// Sleeps for the current period, or reports expiry once the
    /// budget is gone.
    pub async fn sleep(&mut self) -> Result<(), Expired> {
        if self.consumed >= self.budget {
            return Err(Expired);
        }
        let d = self.period.min(self.budget - self.consumed);
        Delay::new(Duration::from_nanos(d)).await;
        self.consumed += d;
        self.period = self.period.saturating_mul(2).min(self.cap);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn test_expires_after_budget() {
        task::block_on(async {
            let mut b = BackOff::new(1_000_000, 5_000_000, 10_000_000);
            let mut fires = 0;
            while b.sleep().await.is_ok() {
                fires += 1;
            }
            // 1ms + 2ms + 2ms of remaining budget.
            assert_eq!(fires, 3);
            assert_eq!(b.sleep().await, Err(Expired));
        });
    }

    #[test]
    fn test_period_caps() {
        task::block_on(async {
            let mut b = BackOff::new(1_000_000, 100_000_000, 2_000_000);
            b.sleep().await.unwrap();
            b.sleep().await.unwrap();
            b.sleep().await.unwrap();
            assert_eq!(b.period, 2_000_000);
        });
    }
}

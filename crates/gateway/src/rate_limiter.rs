//! Fixed-window claim policy over the request ledger.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after_ms: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow)
    }
}

/// One claim per address per window. Pure: it reads the last claim
/// timestamp and never mutates anything.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }

    /// Allows when there is no prior claim or at least one full window has
    /// elapsed (`now - last == window` is allowed).
    pub fn allow(&self, last_claim_at: Option<i64>, now: i64) -> RateDecision {
        let Some(last) = last_claim_at else {
            return RateDecision::Allow;
        };

        let elapsed = now.saturating_sub(last);
        if elapsed >= self.window_ms {
            RateDecision::Allow
        } else {
            RateDecision::Deny {
                retry_after_ms: self.window_ms.saturating_sub(elapsed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn daily() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(86_400))
    }

    #[test]
    fn test_first_claim_allowed() {
        assert_eq!(daily().allow(None, 0), RateDecision::Allow);
    }

    #[test]
    fn test_inside_window_denied() {
        let decision = daily().allow(Some(0), 3_600_000);
        assert_eq!(
            decision,
            RateDecision::Deny {
                retry_after_ms: DAY_MS - 3_600_000
            }
        );
        assert!(!decision.is_allowed());

        // One millisecond short of the boundary
        assert!(!daily().allow(Some(0), DAY_MS - 1).is_allowed());
    }

    #[test]
    fn test_boundary_inclusive() {
        assert_eq!(daily().allow(Some(0), DAY_MS), RateDecision::Allow);
        assert_eq!(daily().allow(Some(1_000), 1_000 + DAY_MS), RateDecision::Allow);
    }

    #[test]
    fn test_clock_behind_last_claim_denied() {
        let decision = daily().allow(Some(10_000), 5_000);
        assert_eq!(
            decision,
            RateDecision::Deny {
                retry_after_ms: DAY_MS + 5_000
            }
        );
    }

    #[test]
    fn test_far_future_record_saturates() {
        let decision = daily().allow(Some(i64::MAX), 0);
        assert_eq!(decision, RateDecision::Deny { retry_after_ms: i64::MAX });

        let decision = daily().allow(Some(i64::MAX), i64::MIN);
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_window_roundtrip() {
        assert_eq!(daily().window(), Duration::from_secs(86_400));
    }
}

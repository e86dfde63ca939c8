//! Retry/backoff policy for the MR/PR clients (4.E). Only `429` and `5xx`
//! responses are retried; everything else (4xx auth/validation failures)
//! is returned to the caller on the first attempt.

use std::time::Duration;

use rand::Rng;

/// "Retried at most twice" means the initial attempt plus two retries:
/// three attempts total.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff capped at `max_delay`, with up to 20% jitter so
    /// concurrent retries from multiple workers don't all wake at once.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.2);
        let jitter = capped.mul_f64(jitter_frac);
        capped.saturating_sub(jitter)
    }

    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        status == 429 || (500..600).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_429_and_5xx() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(429, 0));
        assert!(policy.should_retry(500, 0));
        assert!(policy.should_retry(503, 1));
    }

    #[test]
    fn does_not_retry_4xx_other_than_429() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(401, 0));
        assert!(!policy.should_retry(404, 0));
        assert!(!policy.should_retry(422, 0));
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(500, 1));
        assert!(!policy.should_retry(500, 2));
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        let d0 = policy.calculate_delay(0);
        let d5 = policy.calculate_delay(5);
        assert!(d0 <= policy.max_delay);
        assert!(d5 <= policy.max_delay);
        assert!(d5 >= d0);
    }
}

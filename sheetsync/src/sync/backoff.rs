use rand::Rng;
use std::time::Duration;

const SHEET_FETCH_BASE: Duration = Duration::from_millis(500);
const SHEET_FETCH_MAX: Duration = Duration::from_secs(30);

/// Delay schedule for retrying sheet fetches.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn for_sheet_fetch() -> Self {
        Self::new(SHEET_FETCH_BASE, SHEET_FETCH_MAX, true)
    }

    /// Delay before retry number `attempt` (zero based). A server supplied
    /// `Retry-After` replaces the computed value as is; `max` only bounds the
    /// exponential schedule.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, retry_after, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            // keep at least half the step so retries never fire back to back
            rng.gen_range(exp / 2..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX: Duration = Duration::from_secs(30);
const DEFAULT_FACTOR: f64 = 2.0;

/// Pacing parameters for a retried operation.
///
/// `attempts` is interpreted by the caller: a consumer fetch loop treats it
/// as unused (retries are unbounded), while a commit loop treats it as an
/// exact ceiling, with 0 meaning "never attempt".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial: DEFAULT_INITIAL,
            max: DEFAULT_MAX,
            factor: DEFAULT_FACTOR,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Replaces zero-valued delay fields and a sub-1.0 growth factor with
    /// safe defaults, so a misconfigured policy can never produce a zero or
    /// unbounded wait. `attempts` is left untouched: 0 is a meaningful value.
    fn sanitized(mut self) -> Self {
        if self.initial.is_zero() {
            self.initial = DEFAULT_INITIAL;
        }
        if self.max.is_zero() {
            self.max = DEFAULT_MAX;
        }
        if self.factor < 1.0 {
            self.factor = DEFAULT_FACTOR;
        }
        if self.max < self.initial {
            self.max = self.initial;
        }
        self
    }
}

/// Exponential backoff state for one retry loop.
///
/// The stored delay grows deterministically on every failure signal and is
/// clamped to `[policy.initial, policy.max]`. When jitter is enabled only the
/// time actually slept is randomized; the stored delay is not, so growth is
/// reproducible across repeated failures.
///
/// Not shareable between loops: a fetch loop and a commit loop each own their
/// own instance.
pub struct Backoff {
    policy: RetryPolicy,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let policy = policy.sanitized();
        Self {
            delay: policy.initial,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The delay computed by the most recent failure signal (or `initial`
    /// if none has been observed yet).
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Registers a failure signal and sleeps for the resulting interval.
    ///
    /// Returns as soon as the cancellation token fires, without waiting out
    /// the rest of the interval. The delay is advanced before the sleep
    /// starts, so a cancelled wait still counts towards growth.
    pub async fn wait(&mut self, shutdown: &CancellationToken) {
        let wait = self.next_wait();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    /// Returns the delay to its initial value. Called after any successful
    /// operation so a transient blip does not inflate future retry latency.
    pub fn reset(&mut self) {
        self.delay = self.policy.initial;
    }

    /// Advances the stored delay and returns the duration to actually sleep,
    /// sampled uniformly from `(0, delay]` when jitter is enabled.
    fn next_wait(&mut self) -> Duration {
        let scaled = self.delay.as_secs_f64() * self.policy.factor;
        let next = if scaled.is_finite() {
            Duration::try_from_secs_f64(scaled).unwrap_or(self.policy.max)
        } else {
            self.policy.max
        };
        self.delay = next.min(self.policy.max);

        if self.policy.jitter {
            let ceiling = self.delay.as_nanos().max(1) as u64;
            Duration::from_nanos(rand::thread_rng().gen_range(1..=ceiling))
        } else {
            self.delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn policy(initial_ms: u64, max_ms: u64, factor: f64, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter,
        }
    }

    #[test]
    fn delay_grows_monotonically_under_cap() {
        let mut backoff = Backoff::new(policy(10, 80, 2.0, false));

        // delay after k failure signals is min(initial * factor^k, max)
        let expected_ms = [20, 40, 80, 80, 80];
        for (signal, expected) in expected_ms.iter().enumerate() {
            let wait = backoff.next_wait();
            assert_eq!(wait, Duration::from_millis(*expected), "signal {signal}");
            assert_eq!(backoff.current_delay(), wait);
        }
    }

    #[test]
    fn reset_returns_to_initial_not_a_decayed_value() {
        let mut backoff = Backoff::new(policy(10, 1000, 2.0, false));
        backoff.next_wait(); // 20ms
        backoff.next_wait(); // 40ms
        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::from_millis(10));

        // The next failure signal computes the same value as the first one
        // from a fresh sequence.
        assert_eq!(backoff.next_wait(), Duration::from_millis(20));
    }

    #[test]
    fn jitter_samples_stay_within_computed_delay() {
        let mut backoff = Backoff::new(policy(50, 50, 2.0, true));
        for _ in 0..1000 {
            let wait = backoff.next_wait();
            assert!(wait > Duration::ZERO);
            assert!(wait <= Duration::from_millis(50));
        }
    }

    #[test]
    fn jitter_does_not_affect_stored_delay() {
        let mut with_jitter = Backoff::new(policy(10, 80, 2.0, true));
        let mut without = Backoff::new(policy(10, 80, 2.0, false));
        for _ in 0..5 {
            with_jitter.next_wait();
            without.next_wait();
            assert_eq!(with_jitter.current_delay(), without.current_delay());
        }
    }

    #[test]
    fn zero_valued_policy_fields_get_safe_defaults() {
        let backoff = Backoff::new(RetryPolicy {
            attempts: 0,
            initial: Duration::ZERO,
            max: Duration::ZERO,
            factor: 0.0,
            jitter: false,
        });
        assert_eq!(backoff.policy().initial, Duration::from_secs(1));
        assert_eq!(backoff.policy().max, Duration::from_secs(30));
        assert_eq!(backoff.policy().factor, 2.0);
        // attempts is not sanitized
        assert_eq!(backoff.policy().attempts, 0);
    }

    #[test]
    fn max_is_raised_to_at_least_initial() {
        let mut backoff = Backoff::new(policy(100, 10, 2.0, false));
        assert_eq!(backoff.policy().max, Duration::from_millis(100));
        assert_eq!(backoff.next_wait(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn wait_returns_early_on_cancellation() {
        let mut backoff = Backoff::new(policy(5_000, 30_000, 2.0, false));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        backoff.wait(&token).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        // growth still happened even though the wait was cut short
        assert_eq!(backoff.current_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn wait_sleeps_the_computed_interval_without_jitter() {
        let mut backoff = Backoff::new(policy(10, 80, 2.0, false));
        let token = CancellationToken::new();

        let start = Instant::now();
        backoff.wait(&token).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}

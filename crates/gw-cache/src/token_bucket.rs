use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// A per-resource token bucket (spec §5): `try_remove_tokens` is
/// non-blocking, `remove_tokens` suspends until enough tokens have
/// refilled. Content always starts empty and only fills by elapsed-time
/// drip, as the spec requires.
pub struct TokenBucket {
    capacity: f64,
    tokens_per_interval: f64,
    interval: Duration,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(capacity: u32, tokens_per_interval: u32, interval: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            tokens_per_interval: tokens_per_interval as f64,
            interval,
            state: Mutex::new(State { tokens: 0.0, last_refill: Instant::now() }),
        }
    }

    fn refill_locked(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let rate = self.tokens_per_interval / self.interval.as_secs_f64();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Attempts to remove `count` tokens without blocking. Returns
    /// whether it succeeded.
    pub fn try_remove_tokens(&self, count: u32) -> bool {
        let count = count as f64;
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        if state.tokens >= count {
            state.tokens -= count;
            true
        } else {
            false
        }
    }

    /// Removes `count` tokens, sleeping until enough have refilled.
    pub async fn remove_tokens(&self, count: u32) {
        loop {
            if self.try_remove_tokens(count) {
                return;
            }
            tokio::time::sleep(self.interval / 4).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let bucket = TokenBucket::new(10, 10, Duration::from_secs(1));
        assert!(!bucket.try_remove_tokens(1));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(10, 100, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_remove_tokens(5));
    }

    #[test]
    fn caps_at_capacity() {
        let bucket = TokenBucket::new(2, 1000, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_remove_tokens(2));
        assert!(!bucket.try_remove_tokens(1));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_tokens_waits_for_refill() {
        let bucket = TokenBucket::new(5, 5, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(100)).await;
        bucket.remove_tokens(3).await;
    }
}

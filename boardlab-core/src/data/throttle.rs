//! Request throttle for the vendor API.
//!
//! Tushare enforces a per-minute request budget per token and answers with an
//! error code once it is exceeded. The throttle spaces requests inside a rolling
//! one-minute window, computes retry backoff, and latches a hard stop when the
//! vendor rejects the token so no further requests are sent.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct ThrottleState {
    sent: VecDeque<Instant>,
    consecutive_failures: u32,
    hard_stop: bool,
}

/// Per-minute budget plus hard stop, shared across a client's requests.
#[derive(Debug)]
pub struct RequestThrottle {
    state: Mutex<ThrottleState>,
    requests_per_minute: u32,
    base_delay: Duration,
}

impl RequestThrottle {
    pub fn new(requests_per_minute: u32, base_delay: Duration) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                sent: VecDeque::new(),
                consecutive_failures: 0,
                hard_stop: false,
            }),
            requests_per_minute: requests_per_minute.max(1),
            base_delay,
        }
    }

    /// Default budget for a basic Tushare account: 200 requests per minute.
    pub fn default_vendor() -> Self {
        Self::new(200, Duration::from_millis(500))
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        // A panic while holding the lock leaves plain counters behind; keep using them.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True unless the hard stop has latched.
    pub fn is_allowed(&self) -> bool {
        !self.lock().hard_stop
    }

    /// How long the caller must wait before the next request fits in the window.
    pub fn wait_time(&self, now: Instant) -> Duration {
        let mut state = self.lock();
        while state.sent.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
            state.sent.pop_front();
        }
        if state.sent.len() < self.requests_per_minute as usize {
            return Duration::ZERO;
        }
        state
            .sent
            .front()
            .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Block until the budget allows a request, then record it.
    pub fn acquire(&self) {
        loop {
            let wait = self.wait_time(Instant::now());
            if wait.is_zero() {
                break;
            }
            std::thread::sleep(wait);
        }
        self.lock().sent.push_back(Instant::now());
    }

    /// Delay before retry `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.base_delay * 2u32.pow(exp)
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn record_failure(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        state.consecutive_failures
    }

    /// Latch the hard stop (token rejected).
    pub fn halt(&self) {
        self.lock().hard_stop = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_open() {
        let t = RequestThrottle::new(10, Duration::from_millis(1));
        assert!(t.is_allowed());
        assert_eq!(t.wait_time(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn budget_exhaustion_requires_wait() {
        let t = RequestThrottle::new(2, Duration::from_millis(1));
        t.acquire();
        t.acquire();
        let wait = t.wait_time(Instant::now());
        assert!(wait > Duration::from_secs(59));
        assert!(wait <= WINDOW);
    }

    #[test]
    fn old_requests_leave_the_window() {
        let t = RequestThrottle::new(1, Duration::from_millis(1));
        t.acquire();
        let later = Instant::now() + WINDOW + Duration::from_millis(1);
        assert_eq!(t.wait_time(later), Duration::ZERO);
    }

    #[test]
    fn halt_latches() {
        let t = RequestThrottle::default_vendor();
        t.halt();
        assert!(!t.is_allowed());
    }

    #[test]
    fn backoff_doubles() {
        let t = RequestThrottle::new(10, Duration::from_millis(100));
        assert_eq!(t.backoff(1), Duration::from_millis(100));
        assert_eq!(t.backoff(2), Duration::from_millis(200));
        assert_eq!(t.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn success_resets_failures() {
        let t = RequestThrottle::new(10, Duration::from_millis(1));
        t.record_failure();
        assert_eq!(t.record_failure(), 2);
        t.record_success();
        assert_eq!(t.record_failure(), 1);
    }

    #[test]
    fn zero_budget_is_clamped() {
        assert_eq!(RequestThrottle::new(0, Duration::ZERO).requests_per_minute(), 1);
    }
}

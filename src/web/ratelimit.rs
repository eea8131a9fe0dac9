//! Per-IP sliding-window rate limiting for the ingestion endpoint.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sweep idle entries once the map grows past this many IPs.
const MAX_TRACKED_IPS: usize = 10_000;

pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request; false when the caller is over budget.
    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap();

        if hits.len() > MAX_TRACKED_IPS {
            let window = self.window;
            hits.retain(|_, q| {
                q.back()
                    .map(|t| now.duration_since(*t) < window)
                    .unwrap_or(false)
            });
        }

        let queue = hits.entry(ip).or_default();
        while let Some(&front) = queue.front() {
            if now.duration_since(front) >= self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.max_requests {
            return false;
        }
        queue.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn test_budget_exhaustion() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let base = Instant::now();

        assert!(limiter.allow_at(ip(1), base));
        assert!(limiter.allow_at(ip(1), base));
        assert!(limiter.allow_at(ip(1), base));
        assert!(!limiter.allow_at(ip(1), base));

        // Independent budget per IP.
        assert!(limiter.allow_at(ip(2), base));
    }

    #[test]
    fn test_window_expiry_frees_budget() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let base = Instant::now();

        assert!(limiter.allow_at(ip(1), base));
        assert!(limiter.allow_at(ip(1), base));
        assert!(!limiter.allow_at(ip(1), base + Duration::from_secs(30)));

        // The first two hits age out of the window.
        assert!(limiter.allow_at(ip(1), base + Duration::from_secs(61)));
    }
}

//! Rate Limiter
//!
//! Token buckets keyed by `(scope, identity)`, used to throttle login
//! attempts and public join requests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TokenBucket {
    tokens: u32,
    max_tokens: u32,
    last_refill: Instant,
    refill_rate: Duration,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_rate: Duration) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            last_refill: Instant::now(),
            refill_rate,
        }
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        let refills = (elapsed.as_secs_f64() / self.refill_rate.as_secs_f64()) as u32;

        if refills > 0 {
            self.tokens = (self.tokens + refills).min(self.max_tokens);
            self.last_refill = Instant::now();
        }
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens == self.max_tokens
    }
}

#[derive(Debug, Clone, Copy)]
struct Limit {
    burst: u32,
    window: Duration,
}

pub struct RateLimiter {
    limits: HashMap<&'static str, Limit>,
    buckets: HashMap<(&'static str, String), TokenBucket>,
}

pub const LOGIN: &str = "login";
pub const JOIN_REQUEST: &str = "join_request";

impl RateLimiter {
    pub fn new(login_burst: u32) -> Self {
        let mut limits = HashMap::new();
        limits.insert(
            LOGIN,
            Limit {
                burst: login_burst.max(1),
                window: Duration::from_secs(60),
            },
        );
        limits.insert(
            JOIN_REQUEST,
            Limit {
                burst: 5,
                window: Duration::from_secs(60),
            },
        );
        Self {
            limits,
            buckets: HashMap::new(),
        }
    }

    /// Consume one token for `identity` in `scope`. Unknown scopes are not
    /// limited.
    pub fn check(&mut self, scope: &'static str, identity: &str) -> bool {
        let Some(limit) = self.limits.get(scope).copied() else {
            return true;
        };
        if self.buckets.len() > 10_000 {
            self.prune();
        }
        self.buckets
            .entry((scope, identity.to_lowercase()))
            .or_insert_with(|| {
                let per_token = limit.window / limit.burst;
                TokenBucket::new(limit.burst, per_token)
            })
            .try_consume()
    }

    /// Drop buckets that have fully refilled; they carry no state.
    fn prune(&mut self) {
        self.buckets.retain(|_, bucket| !bucket.is_full());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

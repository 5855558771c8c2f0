//! Per-session rate limiting.
//!
//! One token bucket per session id, lazily created on first call and
//! dropped when the session is removed. Buckets are independent: one
//! session draining its bucket never consumes another session's tokens.

use std::time::Instant;

use dashmap::DashMap;

use crate::{
    config::RateLimitConfig,
    error::{ServerError, ServerResult},
};

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: u32) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, rps: f64, burst: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rps).min(f64::from(burst));
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct SessionRateLimiter {
    buckets: DashMap<String, TokenBucket>,
    config: RateLimitConfig,
}

impl SessionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Take one token from the session's bucket.
    pub fn check(&self, session_id: &str) -> ServerResult<()> {
        let mut bucket = self
            .buckets
            .entry(session_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.burst));
        if bucket.try_take(self.config.rps, self.config.burst) {
            Ok(())
        } else {
            Err(ServerError::RateLimited {
                session_id: session_id.to_string(),
            })
        }
    }

    /// Forget a session's bucket (called when the session is removed).
    pub fn forget(&self, session_id: &str) {
        self.buckets.remove(session_id);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Observer dropping a session's bucket when the session ends.
pub struct RateLimiterHook {
    limiter: std::sync::Arc<SessionRateLimiter>,
}

impl RateLimiterHook {
    pub fn new(limiter: std::sync::Arc<SessionRateLimiter>) -> Self {
        Self { limiter }
    }
}

impl crate::hooks::ServerHook for RateLimiterHook {
    fn on_session_end(&self, session: &crate::session::Session, _duration: std::time::Duration) {
        self.limiter.forget(&session.id);
    }
}

use crate::error::PvpError;
use crate::ids::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const PRUNE_THRESHOLD: usize = 10_000;

/// One request per (user, action) per window. State is per process.
pub struct RateLimiter {
    window: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        RateLimiter {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, uid: &UserId, action: &str) -> Result<(), PvpError> {
        if self.window.is_zero() {
            return Ok(());
        }

        let key = format!("{}:{}", uid, action);
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(at) = last_seen.get(&key) {
            if now.duration_since(*at) < self.window {
                return Err(PvpError::RateLimited);
            }
        }

        if last_seen.len() >= PRUNE_THRESHOLD {
            last_seen.retain(|_, at| now.duration_since(*at) < self.window);
        }
        last_seen.insert(key, now);

        Ok(())
    }
}

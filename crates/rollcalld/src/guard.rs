//! Throttle for session-creation bursts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Throttling key: one cooldown slot per class a faculty teaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    pub faculty_id: String,
    pub subject: String,
    pub section: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Throttled { retry_after_secs: u64 },
}

/// Best-effort cooldown on session creation.
///
/// The timestamp updates unconditionally on allow — even if the creation
/// that follows fails — so a narrow false-rejection window exists and
/// callers retry after the cooldown. Not a transactional lock.
pub struct SessionCreationGuard {
    cooldown: Duration,
    last_creation: Mutex<HashMap<GuardKey, Instant>>,
}

impl SessionCreationGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_creation: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: GuardKey) -> GuardDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: GuardKey, now: Instant) -> GuardDecision {
        let mut map = self
            .last_creation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(last) = map.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                return GuardDecision::Throttled {
                    retry_after_secs: remaining.as_secs_f64().ceil() as u64,
                };
            }
        }

        map.insert(key, now);
        GuardDecision::Allowed
    }
}

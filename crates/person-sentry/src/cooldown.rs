use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-identity rate limit on alert emission.
///
/// The first query for an identity always passes; subsequent queries pass
/// only once strictly more than the configured interval has elapsed since
/// the last passing query for that identity. Every passing query re-arms
/// the timer.
#[derive(Debug)]
pub struct CooldownGate {
    interval: Duration,
    last_alert: HashMap<String, Instant>,
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_alert: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of identities currently tracked by the gate.
    pub fn tracked(&self) -> usize {
        self.last_alert.len()
    }

    /// Returns whether an alert for `person_id` may fire now, recording the
    /// emission time when it may.
    pub fn should_alert(&mut self, person_id: &str) -> bool {
        self.should_alert_at(person_id, Instant::now())
    }

    fn should_alert_at(&mut self, person_id: &str, now: Instant) -> bool {
        match self.last_alert.get(person_id) {
            Some(last) if now.duration_since(*last) <= self.interval => false,
            _ => {
                self.last_alert.insert(person_id.to_string(), now);
                true
            }
        }
    }
}

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_HIGHLIGHT_WINDOW: Duration = Duration::from_secs(3);

/// Per-key "just arrived" emphasis with a fixed decay window.
///
/// A key highlights at most once for its lifetime in `processed`; the flag is
/// idempotent, so redelivery neither restarts nor doubles the timer.
#[derive(Debug)]
pub struct HighlightTracker {
    window: Duration,
    processed: HashSet<String>,
    processed_order: VecDeque<String>,
    processed_cap: usize,
    active: HashMap<String, Instant>,
}

impl HighlightTracker {
    pub fn new(window: Duration, processed_cap: usize) -> Self {
        Self {
            window,
            processed: HashSet::new(),
            processed_order: VecDeque::new(),
            processed_cap: processed_cap.max(1),
            active: HashMap::new(),
        }
    }

    /// Returns true when `key` was never processed and is now highlighted
    /// until `now + window`.
    pub fn flag(&mut self, key: &str, now: Instant) -> bool {
        if self.processed.contains(key) {
            return false;
        }
        self.processed.insert(key.to_string());
        self.processed_order.push_back(key.to_string());
        while self.processed_order.len() > self.processed_cap {
            if let Some(old) = self.processed_order.pop_front() {
                self.processed.remove(&old);
            }
        }
        self.active.insert(key.to_string(), now + self.window);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.values().min().copied()
    }

    /// Drops every highlight whose window has elapsed and returns their keys.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let due: Vec<String> = self
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &due {
            self.active.remove(k);
        }
        due
    }

    /// Forgets pending highlights; processed keys are kept.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }
}

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CounterError, CounterStore, WindowHit};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    start: SystemTime,
    length: Duration,
}

impl Window {
    fn elapsed(&self, now: SystemTime) -> bool {
        now.duration_since(self.start)
            .map(|d| d >= self.length)
            .unwrap_or(false)
    }
}

/// Process-local counters. Each key's update runs under its shard lock,
/// so increments are atomic across worker threads.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, Window>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every window that has rolled over. Returns how many went.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.elapsed(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!("Purged {removed} rate-limit windows");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: SystemTime,
    ) -> Result<WindowHit, CounterError> {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            start: now,
            length: window,
        });
        if entry.elapsed(now) {
            entry.count = 0;
            entry.start = now;
        }
        entry.length = window;
        entry.count = entry.count.saturating_add(1);
        Ok(WindowHit {
            count: entry.count,
            reset_at: entry.start + entry.length,
        })
    }

    async fn release(&self, key: &str, now: SystemTime) -> Result<(), CounterError> {
        if let Some(mut entry) = self.windows.get_mut(key) {
            if !entry.elapsed(now) {
                entry.count = entry.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

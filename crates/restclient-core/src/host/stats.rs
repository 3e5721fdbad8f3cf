//! Per-host outcome counters recorded by the scheduler.

use std::collections::HashMap;
use std::time::Instant;

use super::HostKey;

/// Per-host statistics and observations.
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub last_throttled_at: Option<Instant>,
    pub throttled_events: u32,
    pub last_error_at: Option<Instant>,
    pub error_events: u32,
    pub last_success_at: Option<Instant>,
    pub success_events: u32,
    /// Connections opened for this host (lazy connects and replacements).
    pub connections_opened: u32,
}

/// In-memory table of per-host statistics, owned by one `JobRunner`.
#[derive(Debug, Default)]
pub struct HostStatsTable {
    entries: HashMap<HostKey, HostStats>,
}

impl HostStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry for the given key, if present.
    pub fn get(&self, key: &HostKey) -> Option<&HostStats> {
        self.entries.get(key)
    }

    fn entry_mut(&mut self, key: &HostKey) -> &mut HostStats {
        self.entries.entry(key.clone()).or_default()
    }

    /// Record that the host signalled throttling (e.g. HTTP 429 / 503).
    pub fn record_throttled(&mut self, key: &HostKey) {
        let entry = self.entry_mut(key);
        entry.throttled_events = entry.throttled_events.saturating_add(1);
        entry.last_throttled_at = Some(Instant::now());
    }

    /// Record a failed attempt (transport, protocol, status or job error).
    pub fn record_error(&mut self, key: &HostKey) {
        let entry = self.entry_mut(key);
        entry.error_events = entry.error_events.saturating_add(1);
        entry.last_error_at = Some(Instant::now());
    }

    /// Record a job that completed successfully.
    pub fn record_success(&mut self, key: &HostKey) {
        let entry = self.entry_mut(key);
        entry.success_events = entry.success_events.saturating_add(1);
        entry.last_success_at = Some(Instant::now());
    }

    pub fn record_connection_opened(&mut self, key: &HostKey, count: u32) {
        if count == 0 {
            return;
        }
        let entry = self.entry_mut(key);
        entry.connections_opened = entry.connections_opened.saturating_add(count);
    }
}

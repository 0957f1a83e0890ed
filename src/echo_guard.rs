// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Short-TTL id sets that stop the relay engine from reacting to its own
//! output. Purely in-memory: losing these on restart is
//! acceptable, the pair table makes re-processing idempotent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which echo-risk kind an id belongs to. Each kind has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EchoKind {
    Bridged,
    Edited,
    Deleted,
}

impl EchoKind {
    fn ttl(self) -> Duration {
        match self {
            EchoKind::Bridged => Duration::from_secs(60),
            EchoKind::Edited => Duration::from_secs(10),
            EchoKind::Deleted => Duration::from_secs(10),
        }
    }
}

/// Three TTL'd id sets (bridged/edited/deleted), behind one coarse mutex —
/// contention is negligible compared to the I/O the relay engine otherwise
/// does per message.
#[derive(Default)]
pub struct EchoGuard {
    entries: Mutex<HashMap<(EchoKind, String), Instant>>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` was just produced by the bridge itself and schedules its
    /// eviction after the kind's TTL elapses.
    pub fn mark(&self, kind: EchoKind, id: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap();
        self.sweep(&mut entries);
        entries.insert((kind, id.into()), Instant::now() + kind.ttl());
    }

    /// Returns true if `id` was marked under `kind` and hasn't expired yet.
    pub fn was(&self, kind: EchoKind, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        self.sweep(&mut entries);
        entries.contains_key(&(kind, id.to_string()))
    }

    fn sweep(&self, entries: &mut HashMap<(EchoKind, String), Instant>) {
        let now = Instant::now();
        entries.retain(|_, expires_at| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_reports() {
        let guard = EchoGuard::new();
        assert!(!guard.was(EchoKind::Bridged, "01HABC"));
        guard.mark(EchoKind::Bridged, "01HABC");
        assert!(guard.was(EchoKind::Bridged, "01HABC"));
    }

    #[test]
    fn kinds_are_independent() {
        let guard = EchoGuard::new();
        guard.mark(EchoKind::Edited, "m1");
        assert!(!guard.was(EchoKind::Deleted, "m1"));
        assert!(guard.was(EchoKind::Edited, "m1"));
    }

    #[test]
    fn expired_entries_are_dropped_on_sweep() {
        let guard = EchoGuard::new();
        guard
            .entries
            .lock()
            .unwrap()
            .insert((EchoKind::Deleted, "old".to_string()), Instant::now() - Duration::from_secs(1));
        assert!(!guard.was(EchoKind::Deleted, "old"));
    }
}

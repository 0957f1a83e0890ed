// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! TTL'd user/channel resolution caches.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// A single coarse-mutex TTL cache, favoring simplicity given that
/// contention here is dominated by I/O, not lock pressure.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.into(), Entry { value, expires_at: Instant::now() + self.ttl });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_ttl() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_millis(0));
        cache.insert("k", "v".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn returns_fresh_value() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }
}

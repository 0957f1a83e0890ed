use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chatbridge::store::Store;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique path under the system temp dir for each test's own database file.
/// `Store::open_in_memory` is `#[cfg(test)]`-gated inside the library crate
/// and so isn't reachable from here; a throwaway file gets the same isolation.
pub fn temp_db_path(label: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!("chatbridge_test_{label}_{nanos}_{n}.db"))
        .to_string_lossy()
        .into_owned()
}

pub async fn open_temp_store(label: &str) -> Store {
    Store::open(&temp_db_path(label)).await.expect("temp store should open")
}

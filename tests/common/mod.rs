#![allow(dead_code)]

use std::time::{Duration, SystemTime};

pub use dropship_test_utils::{init_tracing, with_timeout};

/// A fixed modification time `secs` after the epoch.
pub fn mtime(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

//! Per-user writer serialization.
//!
//! Uploads and deletes for the same user take that user's async mutex so
//! they apply one at a time.  Listings never lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Lazily created async mutex per user ID.
#[derive(Debug, Default)]
pub struct UserLocks {
    enabled: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive write access to `user_id`'s bucket.
    ///
    /// Returns `None` when serialization is disabled.
    pub async fn acquire(&self, user_id: &str) -> Option<OwnedMutexGuard<()>> {
        if !self.enabled {
            return None;
        }
        let lock = {
            let mut locks = self.locks.lock().expect("mutex poisoned");
            // Drop entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Some(lock.lock_owned().await)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().expect("mutex poisoned").len()
    }
}

// Per-user async mutexes. One entry per user id with a live or waiting
// lease; idle entries are pruned once the map grows past PRUNE_AT.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

const PRUNE_AT: usize = 1024;

#[derive(Default)]
pub struct UserLocks {
    map: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`. Waiters are served FIFO.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.map.lock();
            if map.len() >= PRUNE_AT {
                // Only the map holds an idle entry.
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-contest advance locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per contest id. Holding the guard serializes every
/// `advance` on that contest; other contests are unaffected.
#[derive(Debug, Default)]
pub struct ContestLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ContestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, contest_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(contest_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a finished or missing contest if nobody holds
    /// or awaits it.
    pub fn release(&self, contest_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(contest_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(contest_id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-id async locks

use std::sync::Arc;

use dashmap::DashMap;
use fe_core::Id;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per id, created on demand and dropped once unused
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<Id, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, id: Id) -> KeyedGuard<'_> {
        let lock = self.locks.entry(id).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyedGuard<'a> {
    locks: &'a DashMap<Id, Arc<Mutex<()>>>,
    id: Id,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Nobody else holds or waits on the mutex once only the map owns it
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

//! Named in-process locks. Background sweeps use them to make sure only one run of a job
//! is active; the completion path uses them to serialise per-user and per-program
//! read-modify-write of counters.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the lock named `key`
    pub async fn lock(&self, key: &str) -> KeyedLockGuard {
        let guard = self.entry(key).lock_owned().await;
        self.guard(key, guard)
    }

    /// Take the lock named `key` only if nobody holds it
    pub fn try_lock(&self, key: &str) -> Option<KeyedLockGuard> {
        let guard = self.entry(key).try_lock_owned().ok()?;
        Some(self.guard(key, guard))
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyedLockGuard {
        KeyedLockGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock; the map entry is dropped with the last guard so per-user keys do not pile up.
pub struct KeyedLockGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // The guard owns a clone of the mutex; release it before counting
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub fn user_progress_key(user_id: uuid::Uuid) -> String {
    format!("referral_progress:{user_id}")
}

pub fn program_completion_key(program_id: uuid::Uuid) -> String {
    format!("referral_program_completion:{program_id}")
}

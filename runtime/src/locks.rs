//! Per-key async locks.
//!
//! Admission for one `(business, date)` pair must be linearized while
//! different pairs proceed in parallel. [`KeyedLocks`] hands out one tokio
//! mutex per key and forgets the key once nobody holds or awaits it, so the
//! table only ever contains keys with admissions in flight.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One key's mutex and the number of tasks holding or awaiting it
#[derive(Debug, Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

type Table<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// A table of async mutexes indexed by key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Table<K>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters on the same key are served in FIFO order (tokio's mutex is
    /// fair). The lock is released when the guard is dropped. A waiter
    /// cancelled before it gets the lock, by a timeout for instance, gives
    /// up its place and its share of the table entry.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = table.entry(key.clone()).or_default();
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };
        let user = User {
            key,
            table: Arc::clone(&self.table),
        };

        let guard = mutex.lock_owned().await;

        KeyGuard { guard, user }
    }

    /// Number of keys currently held or awaited
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Registration of one task in a key's slot, undone on drop
#[derive(Debug)]
struct User<K>
where
    K: Eq + Hash,
{
    key: K,
    table: Table<K>,
}

impl<K> Drop for User<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = table.get_mut(&self.key).is_some_and(|slot| {
            slot.users = slot.users.saturating_sub(1);
            slot.users == 0
        });
        if idle {
            table.remove(&self.key);
        }
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
#[derive(Debug)]
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    // Fields drop in order: the mutex is released before the slot is left.
    guard: OwnedMutexGuard<()>,
    user: User<K>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    /// The locked key
    pub const fn key(&self) -> &K {
        &self.user.key
    }
}

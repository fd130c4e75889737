use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::recording::{RoomId, UserId};

/// A set of async mutexes, one per key, created on demand and dropped
/// once nobody holds or waits for them.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Weak<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until the lock for `key` is free and takes it. The lock is
    /// released when the guard is dropped.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;

            match locks.get(&key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    locks.retain(|_, lock| lock.strong_count() > 0);

                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(key, Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }

    /// The number of keys with a live lock.
    pub async fn len(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// The locks shared by everything that writes recordings.
#[derive(Default)]
pub struct Locks {
    /// At most one sync per user at a time.
    pub(crate) users: KeyedLocks<UserId>,

    /// Held by a sync from listing a room to applying the listing, and
    /// by every mutation of a recording in the room.
    pub(crate) rooms: KeyedLocks<RoomId>,
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }
}

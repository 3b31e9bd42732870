use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const SHARD_COUNT: usize = 16;

/// Hash-sharded keyed mutex map. The executor takes one lock per book key
/// (or UID) so all effects on a single book are strictly serialized while
/// distinct books proceed concurrently.
pub struct KeyedLocks {
    shards: Vec<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Arc<AsyncMutex<()>>>> {
        let mut hash = 0usize;
        for b in key.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(b as usize);
        }
        &self.shards[hash % SHARD_COUNT]
    }

    /// Acquire the lock for a key, waiting if another holder has it.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut shard = self.shard(key).lock();
            Arc::clone(
                shard
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

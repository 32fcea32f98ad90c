//! Process-wide snapshot cache for the active-rule map.
//!
//! Readers get an `Arc` to an immutable snapshot, so a concurrent
//! invalidation can never expose a torn view: a reader holds either the
//! old snapshot or the new one. The cache is a performance device only;
//! correctness comes from the unconditional invalidation on every rule
//! mutation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use sentinel_common::{Rule, SourceType};

/// Active rules grouped by source type, priority order within each group
pub type ActiveRuleMap = HashMap<SourceType, Vec<Rule>>;

struct Snapshot {
    loaded_at: Instant,
    rules: Arc<ActiveRuleMap>,
}

pub struct ActiveRuleCache {
    ttl: Duration,
    slot: RwLock<Option<Snapshot>>,
}

impl ActiveRuleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Current snapshot, unless absent or older than the TTL
    pub fn get(&self) -> Option<Arc<ActiveRuleMap>> {
        let guard = read_lock(&self.slot);
        guard
            .as_ref()
            .filter(|snapshot| snapshot.loaded_at.elapsed() < self.ttl)
            .map(|snapshot| Arc::clone(&snapshot.rules))
    }

    pub fn put(&self, rules: Arc<ActiveRuleMap>) {
        *write_lock(&self.slot) = Some(Snapshot {
            loaded_at: Instant::now(),
            rules,
        });
    }

    pub fn invalidate(&self) {
        *write_lock(&self.slot) = None;
    }
}

// A poisoned lock only means a panicking writer; the slot itself is
// always a consistent Option, so recover the guard.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! WaiterTables (§4.3): the correlator table and connection table.
//!
//! Each table gets its own lock; no operation ever composes both (§5). A
//! generic `WaiterTable<K>` backs both the `String`-keyed correlator table
//! and the `i64`-keyed connection table.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::block::DataBlock;

/// A mapping from key to pending [`DataBlock`], guarded by its own mutex.
#[derive(Debug)]
pub struct WaiterTable<K> {
    inner: Mutex<HashMap<K, Arc<DataBlock>>>,
}

impl<K> Default for WaiterTable<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        WaiterTable {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> WaiterTable<K>
where
    K: Eq + Hash + Clone,
{
    /// Register `block` under `key`. Returns the block previously
    /// registered under that key, if any (the dispatcher treats this as a
    /// conflict in `SYNC_CONN` mode, §4.5).
    pub fn insert(&self, key: K, block: Arc<DataBlock>) -> Option<Arc<DataBlock>> {
        self.inner.lock().unwrap().insert(key, block)
    }

    /// Register `block` under `key` only if `key` is not already
    /// occupied. Returns `block` back to the caller, untouched, if a
    /// waiter was already present -- used by `SYNC_CONN`/`NONPERS` so a
    /// concurrent second caller never clobbers the first's waiter (§4.5:
    /// "a prior waiter exists for that key -> fail BUSY").
    pub fn insert_if_absent(&self, key: K, block: Arc<DataBlock>) -> Result<(), Arc<DataBlock>> {
        let mut table = self.inner.lock().unwrap();
        if table.contains_key(&key) {
            Err(block)
        } else {
            table.insert(key, block);
            Ok(())
        }
    }

    /// Remove `key` without returning the block (idempotent: removing an
    /// absent key is a no-op).
    pub fn remove(&self, key: &K) {
        self.inner.lock().unwrap().remove(key);
    }

    /// Atomically remove and return the block registered under `key`, if
    /// any. The lock is held only for the duration of this call; the
    /// caller writes to the block's reply channel outside the lock (§5).
    pub fn take(&self, key: &K) -> Option<Arc<DataBlock>> {
        self.inner.lock().unwrap().remove(key)
    }

    /// Whether `key` currently has a registered waiter.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }

    /// Remove and return every block for which `matches(key, block)` holds.
    /// Used by a connection's close fan-out: the connection table matches
    /// by key (its own `id_comp`), the correlator table matches by the
    /// block's `net_conn_id` value instead, since its keys are
    /// correlators, not connection ids.
    pub fn drain_matching<F>(&self, mut matches: F) -> Vec<Arc<DataBlock>>
    where
        F: FnMut(&K, &Arc<DataBlock>) -> bool,
    {
        let mut table = self.inner.lock().unwrap();
        let keys: Vec<K> = table
            .iter()
            .filter(|(k, v)| matches(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| table.remove(&k))
            .collect()
    }
}

/// Correlator-keyed waiter table, used in `ASYNC_CORR` mode.
pub type CorrWaiterTable = WaiterTable<String>;
/// Connection-id-keyed waiter table, used in `SYNC_CONN` mode and for a
/// connection's close fan-out.
pub type ConnWaiterTable = WaiterTable<i64>;

#[cfg(test)]
mod test {
    use super::*;

    fn block() -> Arc<DataBlock> {
        Arc::new(DataBlock::new(vec![1], None, 0))
    }

    #[test]
    fn insert_then_take_is_atomic_remove_and_return() {
        let table: WaiterTable<String> = WaiterTable::default();
        let b = block();
        assert!(table.insert("A".into(), b.clone()).is_none());
        assert!(table.contains(&"A".to_string()));

        let taken = table.take(&"A".to_string()).unwrap();
        assert!(Arc::ptr_eq(&taken, &b));
        assert!(!table.contains(&"A".to_string()));
        // idempotent: already gone
        assert!(table.take(&"A".to_string()).is_none());
    }

    #[test]
    fn insert_reports_prior_waiter_for_busy_detection() {
        let table: WaiterTable<i64> = WaiterTable::default();
        assert!(table.insert(42, block()).is_none());
        assert!(table.insert(42, block()).is_some());
    }

    #[test]
    fn insert_if_absent_rejects_without_disturbing_the_first_waiter() {
        let table: WaiterTable<i64> = WaiterTable::default();
        let first = block();
        assert!(table.insert_if_absent(42, first.clone()).is_ok());

        let second = block();
        let rejected = table.insert_if_absent(42, second.clone()).unwrap_err();
        assert!(Arc::ptr_eq(&rejected, &second));

        let still_first = table.take(&42).unwrap();
        assert!(Arc::ptr_eq(&still_first, &first));
    }

    #[test]
    fn drain_matching_removes_only_matching_keys() {
        let table: WaiterTable<i64> = WaiterTable::default();
        table.insert(1, block());
        table.insert(2, block());
        table.insert(3, block());

        let drained = table.drain_matching(|k, _| *k != 2);
        assert_eq!(drained.len(), 2);
        assert!(table.contains(&2));
        assert!(!table.contains(&1));
        assert!(!table.contains(&3));
    }
}

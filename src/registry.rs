//! ConnRegistry (§4.2): a dual-indexed directory of live connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::{Connection, ConnState};

struct State {
    by_id: HashMap<u32, Arc<Connection>>,
    by_comp: HashMap<i64, Arc<Connection>>,
    /// Round-robin cursor into `by_id`'s keys for `pick_any`, so steady
    /// load does not starve any one live connection (§4.2).
    cursor: usize,
}

/// Directory of live connections indexed by short id and composite id. All
/// mutating operations -- and, for simplicity and since reads are cheap,
/// all reads too -- serialise on one lock (§4.2/§5): no lock-free reads are
/// required, and none are offered.
#[derive(Default)]
pub struct ConnRegistry {
    state: Mutex<State>,
}

impl Default for State {
    fn default() -> Self {
        State {
            by_id: HashMap::new(),
            by_comp: HashMap::new(),
            cursor: 0,
        }
    }
}

impl ConnRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to both indexes. Both indexes always point at the same
    /// connection for as long as it remains registered (§3 invariant).
    pub fn register(&self, conn: Arc<Connection>) {
        let mut state = self.state.lock().unwrap();
        state.by_id.insert(conn.id, conn.clone());
        state.by_comp.insert(conn.id_comp, conn);
    }

    /// Remove `conn` from both indexes. Idempotent.
    pub fn unregister(&self, conn: &Connection) {
        let mut state = self.state.lock().unwrap();
        state.by_id.remove(&conn.id);
        state.by_comp.remove(&conn.id_comp);
    }

    /// Look up a connection by its (reusable) short id. Callers that need
    /// to address a specific connection across calls must use
    /// [`Self::get_by_composite_id`] instead -- a bare short id alone
    /// cannot detect reuse (§4.5).
    pub fn get_by_short_id(&self, id: u32) -> Option<Arc<Connection>> {
        self.state.lock().unwrap().by_id.get(&id).cloned()
    }

    /// Look up a connection by its composite id, stable for the
    /// connection's entire lifetime.
    pub fn get_by_composite_id(&self, id_comp: i64) -> Option<Arc<Connection>> {
        self.state.lock().unwrap().by_comp.get(&id_comp).cloned()
    }

    /// Pick any one connection currently in the `Established` state,
    /// round-robin over short ids so no live connection starves under
    /// steady load. Returns `None` if no connection qualifies.
    pub fn pick_any(&self) -> Option<Arc<Connection>> {
        let mut state = self.state.lock().unwrap();
        let n = state.by_id.len();
        if n == 0 {
            return None;
        }

        let mut ids: Vec<u32> = state.by_id.keys().copied().collect();
        ids.sort_unstable();

        for offset in 0..n {
            let idx = (state.cursor + offset) % n;
            let id = ids[idx];
            if let Some(conn) = state.by_id.get(&id) {
                if conn.state() == ConnState::Established {
                    state.cursor = (idx + 1) % n;
                    return Some(conn.clone());
                }
            }
        }
        None
    }

    /// Number of connections currently registered. Derived from the
    /// directory itself, never tracked as a separate atomic (§5):
    /// consumers treat a value read without the lock as a hint only and
    /// re-check under the lock before acting (§4.2).
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().by_id.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::test_support::test_connection;

    #[test]
    fn register_then_lookup_by_both_indexes() {
        let registry = ConnRegistry::new();
        let conn = test_connection(1, 100, ConnState::Established);
        registry.register(conn.clone());

        assert!(registry.get_by_short_id(1).is_some());
        assert!(registry.get_by_composite_id(100).is_some());
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn unregister_removes_both_indexes_and_open_count() {
        let registry = ConnRegistry::new();
        let conn = test_connection(1, 100, ConnState::Established);
        registry.register(conn.clone());
        registry.unregister(&conn);

        assert!(registry.get_by_short_id(1).is_none());
        assert!(registry.get_by_composite_id(100).is_none());
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn pick_any_skips_non_established_connections() {
        let registry = ConnRegistry::new();
        registry.register(test_connection(1, 100, ConnState::Dialing));
        registry.register(test_connection(2, 200, ConnState::Established));

        let picked = registry.pick_any().unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn pick_any_round_robins_under_repeated_calls() {
        let registry = ConnRegistry::new();
        registry.register(test_connection(1, 100, ConnState::Established));
        registry.register(test_connection(2, 200, ConnState::Established));

        let first = registry.pick_any().unwrap().id;
        let second = registry.pick_any().unwrap().id;
        assert_ne!(first, second, "round robin must not starve either connection");
    }

    #[test]
    fn pick_any_on_empty_registry_returns_none() {
        let registry = ConnRegistry::new();
        assert!(registry.pick_any().is_none());
    }
}

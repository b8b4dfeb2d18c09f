//! C2 — the controller registry (spec §4.2).
//!
//! Maps device key to active session. The single admission barrier against
//! duplicate controllers; source of truth for "is device X connected."

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::Session;

pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Default)]
pub struct Registry {
    sessions: DashMap<String, Arc<Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Atomic test-and-set. The only admission barrier against duplicate
    /// controllers; on `AlreadyPresent` the incumbent is left untouched.
    pub fn try_insert(&self, device_key: String, session: Arc<Session>) -> InsertOutcome {
        match self.sessions.entry(device_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => InsertOutcome::AlreadyPresent,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                InsertOutcome::Inserted
            }
        }
    }

    /// Idempotent removal. Only removes if the stored session is the same
    /// instance — a late teardown must not evict a freshly reconnected
    /// session under the same key.
    pub fn remove(&self, device_key: &str, session: &Arc<Session>) {
        self.sessions.remove_if(device_key, |_, stored| Arc::ptr_eq(stored, session));
    }

    pub fn lookup(&self, device_key: &str) -> Option<Arc<Session>> {
        self.sessions.get(device_key).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_session(key: &str) -> Arc<Session> {
        Session::new_for_test(key.to_string())
    }

    #[tokio::test]
    async fn try_insert_is_atomic_test_and_set() {
        let registry = Registry::new();
        let s1 = dummy_session("k1");
        let s2 = dummy_session("k1");

        assert!(matches!(registry.try_insert("k1".to_string(), s1.clone()), InsertOutcome::Inserted));
        assert!(matches!(
            registry.try_insert("k1".to_string(), s2.clone()),
            InsertOutcome::AlreadyPresent
        ));
        assert!(Arc::ptr_eq(&registry.lookup("k1").unwrap(), &s1));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_instance_checked() {
        let registry = Registry::new();
        let s1 = dummy_session("k2");
        let s2 = dummy_session("k2");

        registry.try_insert("k2".to_string(), s1.clone());
        // A late teardown of a stale instance must not evict the current one.
        registry.remove("k2", &s2);
        assert!(registry.lookup("k2").is_some());

        registry.remove("k2", &s1);
        assert!(registry.lookup("k2").is_none());
        // idempotent
        registry.remove("k2", &s1);
        assert!(registry.lookup("k2").is_none());
    }
}

//! Per-`(key, version)` awareness sets for application and membership publications.

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::types::MemberId;

#[derive(Debug, Clone)]
struct AwareEntry {
    version: u64,
    ids: BTreeSet<MemberId>,
}

/// Tracks which members are known to have observed a given publication version.
///
/// Keyed per logical `key`, each holding exactly one live `(version, ids)`
/// pair; per-key critical sections mean updates to unrelated keys never
/// contend with each other.
pub struct PublicationStore {
    aware: DashMap<String, AwareEntry>,
}

impl Default for PublicationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicationStore {
    pub fn new() -> Self {
        Self { aware: DashMap::new() }
    }

    /// Merges `ids` into the awareness set for `(key, version)`.
    ///
    /// Returns whether the call changed the stored state: a new entry, a
    /// newer version replacing the old one, or new ids joining an
    /// equal-version entry all count; a stale (lower) version does not.
    pub fn update_aware(
        &self,
        key: &str,
        version: u64,
        ids: impl IntoIterator<Item = MemberId>,
    ) -> bool {
        let ids: BTreeSet<MemberId> = ids.into_iter().collect();
        match self.aware.get_mut(key) {
            None => {
                self.aware.insert(key.to_string(), AwareEntry { version, ids });
                true
            }
            Some(mut entry) => {
                if version > entry.version {
                    entry.version = version;
                    entry.ids = ids;
                    true
                } else if version == entry.version {
                    let before = entry.ids.len();
                    entry.ids.extend(ids);
                    entry.ids.len() != before
                } else {
                    false
                }
            }
        }
    }

    /// Returns the awareness set for `(key, version)` only if the stored
    /// version matches exactly.
    pub fn aware_of(&self, key: &str, version: u64) -> Option<BTreeSet<MemberId>> {
        self.aware
            .get(key)
            .filter(|e| e.version == version)
            .map(|e| e.ids.clone())
    }

    /// Releases all tracked entries.
    pub fn shutdown(&self) {
        self.aware.clear();
    }

    pub fn len(&self) -> usize {
        self.aware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aware.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_inserts() {
        let store = PublicationStore::new();
        assert!(store.update_aware("t", 7, [1, 2]));
        assert_eq!(store.aware_of("t", 7), Some(BTreeSet::from([1, 2])));
    }

    #[test]
    fn equal_version_unions() {
        let store = PublicationStore::new();
        store.update_aware("t", 7, [1]);
        assert!(store.update_aware("t", 7, [2]));
        assert_eq!(store.aware_of("t", 7), Some(BTreeSet::from([1, 2])));
    }

    #[test]
    fn equal_version_with_no_new_ids_reports_unchanged() {
        let store = PublicationStore::new();
        store.update_aware("t", 7, [1]);
        assert!(!store.update_aware("t", 7, [1]));
    }

    #[test]
    fn higher_version_replaces_wholesale() {
        let store = PublicationStore::new();
        store.update_aware("t", 7, [1, 2]);
        assert!(store.update_aware("t", 8, [3]));
        assert_eq!(store.aware_of("t", 8), Some(BTreeSet::from([3])));
        // Old version is no longer queryable.
        assert_eq!(store.aware_of("t", 7), None);
    }

    #[test]
    fn lower_version_is_dropped() {
        let store = PublicationStore::new();
        store.update_aware("t", 7, [1]);
        assert!(!store.update_aware("t", 6, [9]));
        assert_eq!(store.aware_of("t", 7), Some(BTreeSet::from([1])));
    }

    #[test]
    fn aware_of_unknown_version_is_none() {
        let store = PublicationStore::new();
        store.update_aware("t", 7, [1]);
        assert_eq!(store.aware_of("t", 8), None);
    }

    #[test]
    fn shutdown_clears_all_entries() {
        let store = PublicationStore::new();
        store.update_aware("a", 1, [1]);
        store.update_aware("b", 1, [2]);
        store.shutdown();
        assert!(store.is_empty());
        assert_eq!(store.aware_of("a", 1), None);
    }

    #[test]
    fn publish_success_satisfies_aware_of_invariant() {
        // After a successful publish to peer `p`, `awareOf(key, version)` on
        // the sender must contain `p.id`.
        let store = PublicationStore::new();
        let peer: MemberId = 4;
        store.update_aware("stream", 1, [peer]);
        assert!(store.aware_of("stream", 1).unwrap().contains(&peer));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_ids() -> impl Strategy<Value = BTreeSet<MemberId>> {
            prop::collection::btree_set(0u16..32, 0..6)
        }

        proptest! {
            #[test]
            fn merge_at_equal_version_is_commutative(a in arb_ids(), b in arb_ids()) {
                let s1 = PublicationStore::new();
                s1.update_aware("k", 10, a.clone());
                s1.update_aware("k", 10, b.clone());

                let s2 = PublicationStore::new();
                s2.update_aware("k", 10, b);
                s2.update_aware("k", 10, a);

                prop_assert_eq!(s1.aware_of("k", 10), s2.aware_of("k", 10));
            }

            #[test]
            fn merge_is_idempotent(a in arb_ids()) {
                let store = PublicationStore::new();
                store.update_aware("k", 10, a.clone());
                let first = store.aware_of("k", 10);
                store.update_aware("k", 10, a);
                prop_assert_eq!(first, store.aware_of("k", 10));
            }

            #[test]
            fn version_only_moves_forward(versions in prop::collection::vec(0u64..50, 1..10)) {
                let store = PublicationStore::new();
                let mut max_seen = None;
                for v in versions {
                    store.update_aware("k", v, [0u16]);
                    let stored = store.aware_of("k", v);
                    if Some(v) >= max_seen {
                        prop_assert!(stored.is_some());
                        max_seen = Some(v);
                    }
                }
            }
        }
    }
}

//! In-memory member map with the monotonic merge rule and cached snapshots.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::types::{Member, MemberId, MemberState};

/// Immutable, point-in-time projection of the member store.
///
/// Cached by [`MemberStore`] until the next accepted mutation; cheap to clone
/// (an `Arc` underneath) so readers never block a concurrent `put`.
#[derive(Debug, Clone, Default)]
pub struct MemberSnapshot {
    pub all: Vec<Member>,
    /// `VALID` or `DOWN`, i.e. not removed from the cluster view.
    pub alive: Vec<Member>,
    pub valid: Vec<Member>,
    pub valid_ids: BTreeSet<MemberId>,
    pub invalid_ids: BTreeSet<MemberId>,
}

impl MemberSnapshot {
    fn build(members: &HashMap<MemberId, Member>) -> Self {
        let mut all: Vec<Member> = members.values().cloned().collect();
        all.sort_by_key(|m| m.id);

        let mut snap = Self {
            all: all.clone(),
            ..Default::default()
        };
        for m in &all {
            match m.state {
                MemberState::Valid => {
                    snap.valid.push(m.clone());
                    snap.alive.push(m.clone());
                    snap.valid_ids.insert(m.id);
                }
                MemberState::Down => {
                    snap.alive.push(m.clone());
                    snap.invalid_ids.insert(m.id);
                }
                MemberState::Deleted => {
                    snap.invalid_ids.insert(m.id);
                }
            }
        }
        snap
    }
}

/// Single-writer, many-reader store of [`Member`] records.
///
/// All mutations serialize through one lock; `snapshot()` is wait-free once
/// the cache is populated, and concurrent readers racing a `put` observe
/// either the pre- or post-mutation snapshot atomically, never a partial one.
pub struct MemberStore {
    local_id: MemberId,
    members: Mutex<HashMap<MemberId, Member>>,
    cache: ArcSwapOption<MemberSnapshot>,
}

impl MemberStore {
    pub fn new(local_id: MemberId) -> Self {
        Self {
            local_id,
            members: Mutex::new(HashMap::new()),
            cache: ArcSwapOption::from(None),
        }
    }

    pub fn local_id(&self) -> MemberId {
        self.local_id
    }

    pub fn get(&self, id: MemberId) -> Option<Member> {
        self.members.lock().get(&id).cloned()
    }

    pub fn for_each(&self, mut visitor: impl FnMut(&Member)) {
        let guard = self.members.lock();
        let mut ids: Vec<_> = guard.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            visitor(&guard[&id]);
        }
    }

    /// Returns the cached snapshot, rebuilding it under the write lock if a
    /// prior `put` invalidated it.
    pub fn snapshot(&self) -> Arc<MemberSnapshot> {
        if let Some(cached) = self.cache.load_full() {
            return cached;
        }
        let guard = self.members.lock();
        let snap = Arc::new(MemberSnapshot::build(&guard));
        self.cache.store(Some(snap.clone()));
        snap
    }

    /// Merges `incoming` into the store per the member-store merge rule.
    ///
    /// Returns whether the stored state changed (used by the sync engine to
    /// decide whether to piggyback outgoing updates).
    pub fn put(&self, mut incoming: Member) -> bool {
        let local_id = self.local_id;
        let mut guard = self.members.lock();
        let changed = match guard.get_mut(&incoming.id) {
            None => {
                incoming.aware_ids.insert(local_id);
                guard.insert(incoming.id, incoming);
                true
            }
            Some(cur) => match incoming.last_modified.cmp(&cur.last_modified) {
                Ordering::Greater => {
                    let mut carried_keys: Vec<String> = cur
                        .key_chain
                        .iter()
                        .filter(|k| !incoming.key_chain.contains(k))
                        .cloned()
                        .collect();
                    carried_keys.extend(incoming.key_chain.into_iter());
                    incoming.key_chain = carried_keys;
                    incoming.aware_ids.insert(local_id);
                    incoming.aware_ids.insert(incoming.id);
                    *cur = incoming;
                    true
                }
                Ordering::Equal => {
                    let newly_aware = !incoming.aware_ids.is_subset(&cur.aware_ids);
                    cur.aware_ids.extend(incoming.aware_ids);
                    cur.aware_ids.insert(local_id);
                    cur.aware_ids.insert(cur.id);
                    newly_aware
                }
                Ordering::Less => {
                    tracing::debug!(
                        id = incoming.id,
                        incoming_last_modified = incoming.last_modified,
                        current_last_modified = cur.last_modified,
                        "dropping stale member update"
                    );
                    false
                }
            },
        };

        if changed {
            self.cache.store(None);
        }
        changed
    }
}

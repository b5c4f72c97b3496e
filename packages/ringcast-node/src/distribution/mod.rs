//! Target selection and fan-out for a single publish.
//!
//! Implements the four send-side selection strategies over a member
//! snapshot, then drives one sync session per selected target, bounded by
//! a configurable parallelism limit, and aggregates the per-target results.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream::{FuturesUnordered, StreamExt};
use ringcast_core::{Member, MemberId, MemberStore, Publication, PublicationStore, SyncType};
use tracing::{debug, info};

use crate::config::{AuthenticationConfig, ConnectionConfig};
use crate::connection::ConnectionRegistry;
use crate::sync::{SessionResult, SyncSession};

/// Key the distribution controller reports any-of success under, for
/// `RING`/`UNI_CAST_ONE_OF` strategies where only one peer's outcome matters.
pub const ANY_OF_KEY: &str = "-1";

/// Aggregated outcome of a publish, keyed by peer id (stringified), or
/// [`ANY_OF_KEY`] for any-of strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    pub outcomes: HashMap<String, bool>,
    pub failures: HashMap<String, String>,
}

impl PublishResult {
    fn record(&mut self, key: impl Into<String>, result: &SessionResult) {
        let key = key.into();
        self.outcomes.insert(key.clone(), result.success);
        if let Some(reason) = &result.reason {
            self.failures.insert(key, reason.clone());
        }
    }

    pub fn is_success(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.values().all(|ok| *ok)
    }
}

/// Persists the round-robin cursor used by `UNI_CAST_BALANCE` across calls.
pub struct DistributionController {
    self_id: MemberId,
    connection: ConnectionConfig,
    auth: AuthenticationConfig,
    priorities: Vec<MemberId>,
    balance_cursor: AtomicUsize,
}

impl DistributionController {
    pub fn new(
        self_id: MemberId,
        connection: ConnectionConfig,
        auth: AuthenticationConfig,
        priorities: Vec<MemberId>,
    ) -> Self {
        Self { self_id, connection, auth, priorities, balance_cursor: AtomicUsize::new(0) }
    }

    /// Runs one publish: selects targets for `sync_type`, fans out sync
    /// sessions bounded by `max_parallel_sessions`, and records successful
    /// peers into the publication's awareness set.
    pub async fn publish(
        &self,
        publication: &Publication,
        sync_type: SyncType,
        skip_ids: &BTreeSet<MemberId>,
        members: &MemberStore,
        publications: &PublicationStore,
        registry: &ConnectionRegistry,
    ) -> PublishResult {
        let snapshot = members.snapshot();
        let candidates: Vec<Member> = snapshot
            .alive
            .iter()
            .filter(|m| m.id != self.self_id && !skip_ids.contains(&m.id))
            .cloned()
            .collect();

        let targets = self.select_targets(sync_type, &candidates);
        if targets.is_empty() {
            debug!(?sync_type, "no eligible targets for publish");
            return PublishResult::default();
        }

        let aware_ids: Vec<MemberId> = publications
            .aware_of(&publication.key, publication.version)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();

        let sessions = match sync_type {
            SyncType::Ring => self.publish_ring(publication, targets, aware_ids, members, registry).await,
            SyncType::UniCastOneOf => self.publish_one_of(publication, targets, aware_ids, registry).await,
            SyncType::UniCast | SyncType::UniCastBalance => {
                self.publish_broadcast(publication, targets, aware_ids, registry).await
            }
        };

        // Any-of strategies report every target under the same key, so the
        // result map alone can't tell us which peer actually acknowledged;
        // track that from the session outcomes themselves instead.
        let any_of_keyed = matches!(sync_type, SyncType::Ring | SyncType::UniCastOneOf);
        let mut result = PublishResult::default();
        if sessions.is_empty() && any_of_keyed {
            result.outcomes.insert(ANY_OF_KEY.to_string(), false);
        }
        for r in &sessions {
            let key = if any_of_keyed { ANY_OF_KEY.to_string() } else { r.peer_id.to_string() };
            result.record(key, r);
        }

        for r in &sessions {
            if r.success {
                publications.update_aware(&publication.key, publication.version, [r.peer_id]);
            }
        }

        result
    }

    /// Orders candidates for `RING`/`UNI_CAST_ONE_OF`; for balanced unicast
    /// picks a rotating subset; for plain unicast returns everyone.
    fn select_targets(&self, sync_type: SyncType, candidates: &[Member]) -> Vec<Member> {
        match sync_type {
            SyncType::Ring => {
                let mut ordered = candidates.to_vec();
                ordered.sort_by_key(|m| m.id);
                ordered
            }
            SyncType::UniCastOneOf => {
                let mut ordered = candidates.to_vec();
                ordered.sort_by_key(|m| self.priority_rank(m.id));
                ordered
            }
            SyncType::UniCast => candidates.to_vec(),
            SyncType::UniCastBalance => {
                if candidates.is_empty() {
                    return Vec::new();
                }
                let subset_size = (candidates.len() / 2).max(1);
                let mut ordered = candidates.to_vec();
                ordered.sort_by_key(|m| m.id);
                let start = self.balance_cursor.fetch_add(subset_size, Ordering::Relaxed) % ordered.len();
                (0..subset_size).map(|i| ordered[(start + i) % ordered.len()].clone()).collect()
            }
        }
    }

    /// Lower is higher priority; unlisted ids sort after all listed ones, tied
    /// among themselves by id.
    fn priority_rank(&self, id: MemberId) -> (usize, MemberId) {
        match self.priorities.iter().position(|p| *p == id) {
            Some(rank) => (rank, id),
            None => (self.priorities.len(), id),
        }
    }

    async fn publish_broadcast(
        &self,
        publication: &Publication,
        targets: Vec<Member>,
        aware_ids: Vec<MemberId>,
        registry: &ConnectionRegistry,
    ) -> Vec<SessionResult> {
        let limit = self.connection.max_parallel_sessions.max(1);
        let mut results = Vec::new();
        let mut pending = targets.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < limit {
                let Some(mut target) = pending.next() else { break };
                let aware = aware_ids.clone();
                let pub_clone = publication.clone();
                let session = SyncSession::new(self.self_id, self.connection.clone(), self.auth.clone());
                in_flight.push(async move { session.run_publication_sync(&mut target, &pub_clone, aware, registry).await });
            }
            match in_flight.next().await {
                Some(r) => results.push(r),
                None => break,
            }
        }
        results
    }

    async fn publish_one_of(
        &self,
        publication: &Publication,
        targets: Vec<Member>,
        aware_ids: Vec<MemberId>,
        registry: &ConnectionRegistry,
    ) -> Vec<SessionResult> {
        let mut attempts = Vec::new();
        for mut target in targets {
            let session = SyncSession::new(self.self_id, self.connection.clone(), self.auth.clone());
            let r = session.run_publication_sync(&mut target, publication, aware_ids.clone(), registry).await;
            let succeeded = r.success;
            attempts.push(r);
            if succeeded {
                break;
            }
        }
        attempts
    }

    async fn publish_ring(
        &self,
        publication: &Publication,
        targets: Vec<Member>,
        aware_ids: Vec<MemberId>,
        members: &MemberStore,
        registry: &ConnectionRegistry,
    ) -> Vec<SessionResult> {
        let mut visited = BTreeSet::new();
        let local_id = members.local_id();
        let start = targets.iter().position(|m| m.id > local_id).unwrap_or(0);
        let ordered: Vec<Member> = targets
            .iter()
            .cloned()
            .cycle()
            .skip(start)
            .take(targets.len())
            .collect();

        let mut attempts = Vec::new();
        for mut target in ordered {
            if !visited.insert(target.id) {
                continue;
            }
            let session = SyncSession::new(self.self_id, self.connection.clone(), self.auth.clone());
            let r = session.run_publication_sync(&mut target, publication, aware_ids.clone(), registry).await;
            let succeeded = r.success;
            attempts.push(r);
            if succeeded && !publication.ring_propagating {
                break;
            }
        }
        if attempts.is_empty() {
            info!(key = %publication.key, "ring forwarding found no reachable peer");
        }
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcast_core::{MemberState, SyncAddress};

    fn member(id: MemberId) -> Member {
        Member::new(id, MemberState::Valid, false, vec![], vec![SyncAddress::new("127.0.0.1", 7000 + id)], 1)
    }

    fn controller(priorities: Vec<MemberId>) -> DistributionController {
        DistributionController::new(1, ConnectionConfig::default(), AuthenticationConfig::default(), priorities)
    }

    #[test]
    fn ring_selection_sorts_by_id() {
        let ctrl = controller(vec![]);
        let candidates = vec![member(3), member(1), member(2)];
        let selected = ctrl.select_targets(SyncType::Ring, &candidates);
        assert_eq!(selected.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn one_of_selection_honors_priority_order() {
        let ctrl = controller(vec![4, 3, 2, 1]);
        let candidates = vec![member(1), member(2), member(3)];
        let selected = ctrl.select_targets(SyncType::UniCastOneOf, &candidates);
        assert_eq!(selected.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn unlisted_priorities_sort_after_listed_ones() {
        let ctrl = controller(vec![2]);
        let candidates = vec![member(1), member(2), member(3)];
        let selected = ctrl.select_targets(SyncType::UniCastOneOf, &candidates);
        assert_eq!(selected[0].id, 2);
    }

    #[test]
    fn unicast_selects_every_candidate() {
        let ctrl = controller(vec![]);
        let candidates = vec![member(1), member(2), member(3)];
        let selected = ctrl.select_targets(SyncType::UniCast, &candidates);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn balance_selection_is_a_strict_subset_and_rotates() {
        let ctrl = controller(vec![]);
        let candidates = vec![member(1), member(2), member(3), member(4)];
        let first = ctrl.select_targets(SyncType::UniCastBalance, &candidates);
        assert_eq!(first.len(), 2);
        let second = ctrl.select_targets(SyncType::UniCastBalance, &candidates);
        assert_ne!(first.iter().map(|m| m.id).collect::<Vec<_>>(), second.iter().map(|m| m.id).collect::<Vec<_>>());
    }

    #[test]
    fn publish_result_success_requires_nonempty_all_true() {
        let mut result = PublishResult::default();
        assert!(!result.is_success());
        result.outcomes.insert("1".into(), true);
        result.outcomes.insert("2".into(), true);
        assert!(result.is_success());
        result.outcomes.insert("3".into(), false);
        assert!(!result.is_success());
    }
}

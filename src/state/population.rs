use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tracing::warn;

use crate::db::ResponderKey;
use crate::types::{Responder, Uid};

// ---------------------------------------------------------------------------
// PopulationStore
// ---------------------------------------------------------------------------

/// Last known responder population, keyed by uid. Replaced wholesale on every refresh.
#[derive(Default)]
pub struct PopulationStore {
    responders: DashMap<Uid, Responder>,
}

/// What changed between two population snapshots.
#[derive(Debug, Default, PartialEq)]
pub struct PopulationDiff {
    pub added: usize,
    pub removed: usize,
    /// uids whose identity changed, i.e. a new registrant took the slot.
    pub replaced: usize,
}

impl PopulationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Swap in a fresh snapshot. Entries absent from `fresh` are dropped.
    pub fn replace(&self, fresh: Vec<Responder>) -> PopulationDiff {
        let fresh_uids: HashSet<Uid> = fresh.iter().map(|r| r.uid).collect();
        let mut diff = PopulationDiff::default();

        self.responders.retain(|uid, _| {
            let keep = fresh_uids.contains(uid);
            if !keep {
                diff.removed += 1;
            }
            keep
        });

        for responder in fresh {
            match self.responders.insert(responder.uid, responder.clone()) {
                None => diff.added += 1,
                Some(old) if old.identity != responder.identity => diff.replaced += 1,
                Some(_) => {}
            }
        }
        diff
    }

    pub fn get(&self, uid: Uid) -> Option<Responder> {
        self.responders.get(&uid).map(|r| r.clone())
    }

    /// Snapshot ordered by uid.
    pub fn all(&self) -> Vec<Responder> {
        let mut out: Vec<Responder> = self.responders.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|r| r.uid);
        out
    }

    pub fn find_by_identity(&self, identity: &str) -> Option<Responder> {
        self.responders
            .iter()
            .find(|e| e.value().identity == identity)
            .map(|e| e.value().clone())
    }

    /// (uid, identity) pairs considered active for cleanup.
    pub fn active_keys(&self) -> HashSet<ResponderKey> {
        self.responders
            .iter()
            .map(|e| (*e.key(), e.value().identity.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    pub fn serving_count(&self) -> usize {
        self.responders.iter().filter(|e| e.value().is_serving).count()
    }
}

// ---------------------------------------------------------------------------
// LeagueCommitments
// ---------------------------------------------------------------------------

/// uid → leagues the responder has committed to predict.
#[derive(Default)]
pub struct LeagueCommitments {
    inner: Mutex<HashMap<Uid, Vec<String>>>,
}

impl LeagueCommitments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recovers from a poisoned lock.
    fn map(&self) -> MutexGuard<'_, HashMap<Uid, Vec<String>>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("League commitment lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Apply one commitment round in a single critical section.
    pub fn apply_round(&self, updates: HashMap<Uid, Vec<String>>) {
        self.map().extend(updates);
    }

    /// Drop uids that left the population.
    pub fn retain_uids(&self, live: &HashSet<Uid>) {
        self.map().retain(|uid, _| live.contains(uid));
    }

    pub fn leagues_for(&self, uid: Uid) -> Vec<String> {
        self.map().get(&uid).cloned().unwrap_or_default()
    }

    /// Uids committed to `league`, ascending.
    pub fn uids_for_league(&self, league: &str) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self
            .map()
            .iter()
            .filter(|(_, leagues)| leagues.iter().any(|l| l == league))
            .map(|(uid, _)| *uid)
            .collect();
        uids.sort_unstable();
        uids
    }
}

#[cfg(test)]
pub(crate) fn responder(uid: Uid, identity: &str, serving: bool, stake: f64) -> Responder {
    Responder {
        uid,
        identity: identity.to_string(),
        host: "127.0.0.1".to_string(),
        port: 8091,
        is_serving: serving,
        stake,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_reports_added_removed_and_replaced() {
        let store = PopulationStore::new();
        let first = store.replace(vec![
            responder(1, "a", true, 10.0),
            responder(2, "b", true, 10.0),
        ]);
        assert_eq!(first, PopulationDiff { added: 2, removed: 0, replaced: 0 });

        let second = store.replace(vec![
            responder(2, "b-new", true, 10.0),
            responder(3, "c", false, 10.0),
        ]);
        assert_eq!(second, PopulationDiff { added: 1, removed: 1, replaced: 1 });
        assert!(store.get(1).is_none());
        assert_eq!(store.get(2).unwrap().identity, "b-new");
        assert_eq!(store.serving_count(), 1);
    }

    #[test]
    fn active_keys_pair_uid_with_identity() {
        let store = PopulationStore::new();
        store.replace(vec![responder(5, "hk5", true, 1.0)]);
        let keys = store.active_keys();
        assert!(keys.contains(&(5, "hk5".to_string())));
        assert!(!keys.contains(&(5, "other".to_string())));
        assert_eq!(store.find_by_identity("hk5").map(|r| r.uid), Some(5));
    }

    #[test]
    fn commitments_apply_as_one_round() {
        let commitments = LeagueCommitments::new();
        commitments.apply_round(HashMap::from([
            (1, vec!["MLB".to_string()]),
            (2, vec!["MLB".to_string(), "NFL".to_string()]),
        ]));
        assert_eq!(commitments.uids_for_league("MLB"), vec![1, 2]);
        assert_eq!(commitments.uids_for_league("NFL"), vec![2]);

        commitments.apply_round(HashMap::from([(1, vec!["NFL".to_string()])]));
        assert_eq!(commitments.leagues_for(1), vec!["NFL".to_string()]);
        assert_eq!(commitments.leagues_for(2).len(), 2);

        commitments.retain_uids(&HashSet::from([1]));
        assert!(commitments.leagues_for(2).is_empty());
    }

    #[test]
    fn commitments_survive_a_poisoned_lock() {
        let commitments = LeagueCommitments::new();
        commitments.apply_round(HashMap::from([
            (1, vec!["MLB".to_string()]),
            (2, vec!["NFL".to_string()]),
        ]));

        let shared = Arc::clone(&commitments);
        let _ = std::thread::spawn(move || {
            let _guard = shared.inner.lock().unwrap();
            panic!("writer died mid-update");
        })
        .join();
        assert!(commitments.inner.is_poisoned());

        commitments.retain_uids(&HashSet::from([1]));
        assert!(commitments.leagues_for(2).is_empty());
        commitments.apply_round(HashMap::from([(3, vec!["MLB".to_string()])]));
        assert_eq!(commitments.uids_for_league("MLB"), vec![1, 3]);
    }
}

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Responder, Uid};

/// Serving and not over the stake ceiling. Heavier stakes belong to coordinators, not predictors.
pub fn is_eligible(responder: &Responder, stake_ceiling: f64) -> bool {
    responder.is_serving && responder.stake <= stake_ceiling
}

/// Pick responders for one request.
///
/// With `k > 0` at most `k` responders are returned: eligible ones outside `exclude` first
/// (randomly chosen), then backfill from excluded-but-eligible ones if that was not enough.
/// With `k <= 0` every eligible responder outside `exclude` is returned, with no backfill.
/// An empty result is a valid outcome.
pub fn select_responders<R: Rng + ?Sized>(
    population: &[Responder],
    stake_ceiling: f64,
    exclude: &HashSet<Uid>,
    k: i64,
    rng: &mut R,
) -> Vec<Responder> {
    let (mut preferred, mut backfill): (Vec<&Responder>, Vec<&Responder>) = population
        .iter()
        .filter(|r| is_eligible(r, stake_ceiling))
        .partition(|r| !exclude.contains(&r.uid));

    preferred.shuffle(rng);
    backfill.shuffle(rng);

    if k <= 0 {
        return preferred.into_iter().cloned().collect();
    }
    preferred
        .into_iter()
        .chain(backfill)
        .cloned()
        .take(usize::try_from(k).unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::population::responder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn population() -> Vec<Responder> {
        vec![
            responder(0, "coordinator", true, 50_000.0),
            responder(1, "a", true, 10.0),
            responder(2, "b", true, 10.0),
            responder(3, "c", false, 10.0),
            responder(4, "d", true, 10.0),
            responder(5, "e", true, 10.0),
        ]
    }

    #[test]
    fn never_returns_ineligible_responders() {
        let mut rng = StdRng::seed_from_u64(7);
        let picked = select_responders(&population(), 1000.0, &HashSet::new(), 0, &mut rng);
        let uids: HashSet<Uid> = picked.iter().map(|r| r.uid).collect();
        assert_eq!(uids, HashSet::from([1, 2, 4, 5]));
    }

    #[test]
    fn returns_at_most_k_and_prefers_non_excluded() {
        let exclude = HashSet::from([1, 2]);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select_responders(&population(), 1000.0, &exclude, 2, &mut rng);
            let uids: HashSet<Uid> = picked.iter().map(|r| r.uid).collect();
            assert_eq!(uids, HashSet::from([4, 5]));
        }
    }

    #[test]
    fn backfills_from_excluded_when_short() {
        let exclude = HashSet::from([1, 2, 4]);
        let mut rng = StdRng::seed_from_u64(3);
        let picked = select_responders(&population(), 1000.0, &exclude, 3, &mut rng);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].uid, 5);
        assert!(picked[1..].iter().all(|r| exclude.contains(&r.uid)));
    }

    #[test]
    fn non_positive_k_returns_every_eligible_responder_outside_exclude() {
        let exclude = HashSet::from([4]);
        for k in [0, -1] {
            let mut rng = StdRng::seed_from_u64(11);
            let picked = select_responders(&population(), 1000.0, &exclude, k, &mut rng);
            let uids: HashSet<Uid> = picked.iter().map(|r| r.uid).collect();
            assert_eq!(uids, HashSet::from([1, 2, 5]));
        }
    }

    #[test]
    fn own_uid_is_not_selected_with_default_k() {
        let population = vec![responder(0, "self", true, 1.0), responder(1, "a", true, 1.0)];
        let mut rng = StdRng::seed_from_u64(5);
        let picked = select_responders(&population, 1000.0, &HashSet::from([0]), 0, &mut rng);
        assert_eq!(picked.iter().map(|r| r.uid).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn same_seed_same_selection() {
        let pick = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            select_responders(&population(), 1000.0, &HashSet::new(), 2, &mut rng)
                .into_iter()
                .map(|r| r.uid)
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(42), pick(42));
    }

    #[test]
    fn empty_population_is_not_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_responders(&[], 1000.0, &HashSet::new(), 5, &mut rng).is_empty());
    }
}

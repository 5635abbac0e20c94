use std::collections::{HashMap, HashSet};

use rand::thread_rng;
use tracing::{debug, info, warn};

use crate::config::{is_known_league, COMMITMENT_ROUTE};
use crate::dispatch::{Dispatcher, Reply};
use crate::error::Result;
use crate::selector::select_responders;
use crate::state::LeagueCommitments;
use crate::types::{CommitmentEnvelope, Responder, Uid};

/// Read one commitment reply. Unknown league names are dropped, not fatal.
pub fn accept_commitment(reply: &Reply, addressed: &[Responder]) -> Option<(Uid, Vec<String>)> {
    let identity = reply.sender_identity.as_deref()?;
    let sender = addressed.iter().find(|r| r.identity == identity)?;
    let envelope: CommitmentEnvelope = serde_json::from_value(reply.body.clone()?).ok()?;
    let leagues = envelope.leagues?;

    let (known, unknown): (Vec<String>, Vec<String>) =
        leagues.into_iter().partition(|l| is_known_league(l));
    if !unknown.is_empty() {
        warn!(uid = sender.uid, ?unknown, "Dropping unknown leagues from commitment");
    }
    Some((sender.uid, known))
}

/// Ask every eligible responder which leagues it covers and apply the answers in one update.
pub async fn run_commitment_round(
    dispatcher: &Dispatcher,
    population: &[Responder],
    stake_ceiling: f64,
    exclude: &HashSet<Uid>,
    commitments: &LeagueCommitments,
) -> Result<usize> {
    let targets = {
        let mut rng = thread_rng();
        select_responders(population, stake_ceiling, exclude, 0, &mut rng)
    };
    if targets.is_empty() {
        debug!("No eligible responders for a commitment round");
        return Ok(0);
    }

    let body = serde_json::to_value(CommitmentEnvelope::default())?;
    let asked = targets.len();
    let outcomes = dispatcher.dispatch(targets, COMMITMENT_ROUTE, &body).await;

    let updates: HashMap<Uid, Vec<String>> = outcomes
        .iter()
        .filter_map(|o| {
            let reply = o.reply.as_ref()?;
            accept_commitment(reply, std::slice::from_ref(&o.responder))
        })
        .collect();

    let applied = updates.len();
    commitments.apply_round(updates);
    info!(asked, applied, "League commitment round complete");
    Ok(applied)
}

//! Accept or reject responder replies to a prediction request.
//!
//! [`validate`] is a pure predicate over (reply, request, addressed responders, now).
//! Rejected replies are treated exactly like no reply at all.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::{DispatchOutcome, Reply};
use crate::types::{PredictionEnvelope, PredictionRequest, Prediction, Responder, Uid};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("reply body could not be decoded: {0}")]
    Malformed(String),
    #[error("reply carries no sender identity")]
    MissingIdentity,
    #[error("sender {0} was not addressed by this request")]
    UnknownSender(String),
    #[error("probabilityChoice is missing")]
    MissingChoice,
    #[error("probability is missing")]
    MissingProbability,
    #[error("probabilityChoice {0} is not a known side")]
    UnknownChoice(String),
    #[error("probability {0} is not a number in [0, 1]")]
    ProbabilityOutOfRange(String),
    #[error("match already kicked off")]
    AfterKickoff,
    #[error("echoed field `{0}` differs from the request")]
    FieldMismatch(&'static str),
    #[error("closingEdge was set by the responder")]
    ClosingEdgeSet,
}

/// Validate one reply. `addressed` holds the responders the reply may have come from; a
/// dispatch round passes only the responder that was actually called.
pub fn validate(
    reply: &Reply,
    request: &PredictionRequest,
    addressed: &[Responder],
    now: DateTime<Utc>,
) -> Result<Prediction, Rejection> {
    let body = reply
        .body
        .as_ref()
        .ok_or_else(|| Rejection::Malformed("not JSON".to_string()))?;
    let envelope: PredictionEnvelope =
        serde_json::from_value(body.clone()).map_err(|e| Rejection::Malformed(e.to_string()))?;
    let echoed = envelope.match_prediction;

    let identity = reply
        .sender_identity
        .as_deref()
        .ok_or(Rejection::MissingIdentity)?;
    let sender = addressed
        .iter()
        .find(|r| r.identity == identity)
        .ok_or_else(|| Rejection::UnknownSender(identity.to_string()))?;

    let choice_field = echoed.probability_choice.as_ref().ok_or(Rejection::MissingChoice)?;
    let probability_value = match &echoed.probability {
        None | Some(Value::Null) => return Err(Rejection::MissingProbability),
        Some(v) => v,
    };

    let probability_choice = choice_field
        .resolve()
        .ok_or_else(|| Rejection::UnknownChoice(format!("{choice_field:?}")))?;

    let probability = probability_value
        .as_f64()
        .filter(|p| p.is_finite() && (0.0..=1.0).contains(p))
        .ok_or_else(|| Rejection::ProbabilityOutOfRange(probability_value.to_string()))?;

    if now >= request.kickoff {
        return Err(Rejection::AfterKickoff);
    }

    let sent = &request.payload;
    if echoed.match_id != sent.match_id {
        return Err(Rejection::FieldMismatch("matchId"));
    }
    if echoed.match_date != sent.match_date {
        return Err(Rejection::FieldMismatch("matchDate"));
    }
    if echoed.sport != sent.sport {
        return Err(Rejection::FieldMismatch("sport"));
    }
    if echoed.league != sent.league {
        return Err(Rejection::FieldMismatch("league"));
    }
    if echoed.home_team_name != sent.home_team_name {
        return Err(Rejection::FieldMismatch("homeTeamName"));
    }
    if echoed.away_team_name != sent.away_team_name {
        return Err(Rejection::FieldMismatch("awayTeamName"));
    }

    if !matches!(echoed.closing_edge, None | Some(Value::Null)) {
        return Err(Rejection::ClosingEdgeSet);
    }

    Ok(Prediction {
        prediction_id: None,
        responder_uid: sender.uid,
        responder_identity: sender.identity.clone(),
        match_id: sent.match_id.clone(),
        match_date: request.kickoff,
        sport: sent.sport,
        league: sent.league.clone(),
        home_team_name: sent.home_team_name.clone(),
        away_team_name: sent.away_team_name.clone(),
        window: request.kind.window_label().to_string(),
        app_request_id: request.kind.app_request_id().map(str::to_string),
        probability_choice,
        probability,
        prediction_date: now,
        is_scored: false,
        scored_date: None,
        closing_edge: None,
    })
}

/// Per-dispatch validation result.
#[derive(Debug, Default)]
pub struct ValidatedRound {
    pub accepted: Vec<Prediction>,
    /// Responders that replied but were rejected.
    pub rejected: Vec<(Uid, Rejection)>,
    /// Responders that never replied.
    pub silent: Vec<Uid>,
}

/// Validate every outcome of one dispatch, logging each rejection with scores redacted.
pub fn validate_round(
    outcomes: &[DispatchOutcome],
    request: &PredictionRequest,
    now: DateTime<Utc>,
) -> ValidatedRound {
    let mut round = ValidatedRound::default();

    for outcome in outcomes {
        let Some(reply) = &outcome.reply else {
            round.silent.push(outcome.responder.uid);
            continue;
        };
        // The claimed identity is checked against the responder that was called, not the round.
        match validate(reply, request, std::slice::from_ref(&outcome.responder), now) {
            Ok(prediction) => {
                debug!(
                    uid = prediction.responder_uid,
                    match_id = %prediction.match_id,
                    window = %prediction.window,
                    "Accepted prediction"
                );
                round.accepted.push(prediction);
            }
            Err(rejection) => {
                warn!(
                    uid = outcome.responder.uid,
                    match_id = %request.payload.match_id,
                    reply = ?redacted_body(reply),
                    "Rejected reply: {rejection}"
                );
                round.rejected.push((outcome.responder.uid, rejection));
            }
        }
    }
    round
}

fn redacted_body(reply: &Reply) -> Option<Value> {
    let body = reply.body.as_ref()?;
    match serde_json::from_value::<PredictionEnvelope>(body.clone()) {
        Ok(env) => serde_json::to_value(env.match_prediction.redacted()).ok(),
        Err(_) => Some(Value::String("<undecodable>".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::population::responder;
    use crate::types::{
        format_match_date, MatchPredictionPayload, PredictionWindow, ProbabilityChoice,
        RequestKind, Sport,
    };
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 15, 30, 0).unwrap()
    }

    fn request() -> PredictionRequest {
        PredictionRequest {
            kind: RequestKind::Scheduled(PredictionWindow::Hours24),
            kickoff: kickoff(),
            payload: MatchPredictionPayload {
                match_id: "m1".to_string(),
                match_date: format_match_date(&kickoff()),
                sport: Sport::Baseball,
                league: "MLB".to_string(),
                home_team_name: "Yankees".to_string(),
                away_team_name: "Red Sox".to_string(),
                home_team_score: None,
                away_team_score: None,
                probability_choice: None,
                probability: None,
                closing_edge: None,
            },
        }
    }

    fn echoed(choice: Value, probability: Value) -> Value {
        json!({
            "match_prediction": {
                "matchId": "m1",
                "matchDate": "2024-08-01 15:30:00",
                "sport": 3,
                "league": "MLB",
                "homeTeamName": "Yankees",
                "awayTeamName": "Red Sox",
                "probabilityChoice": choice,
                "probability": probability,
                "closingEdge": null
            }
        })
    }

    fn reply_from(identity: &str, body: Value) -> Reply {
        Reply { sender_identity: Some(identity.to_string()), body: Some(body) }
    }

    fn addressed() -> Vec<Responder> {
        vec![responder(7, "hk7", true, 1.0), responder(9, "hk9", true, 1.0)]
    }

    fn now() -> DateTime<Utc> {
        kickoff() - TimeDelta::hours(23)
    }

    #[test]
    fn in_range_probability_is_accepted() {
        let reply = reply_from("hk7", echoed(json!("AwayTeam"), json!(0.73)));
        let p = validate(&reply, &request(), &addressed(), now()).unwrap();
        assert_eq!(p.responder_uid, 7);
        assert_eq!(p.responder_identity, "hk7");
        assert_eq!(p.probability_choice, ProbabilityChoice::AwayTeam);
        assert!((p.probability - 0.73).abs() < 1e-12);
        assert_eq!(p.window, "24_hour");
        assert_eq!(p.prediction_date, now());
        assert_eq!(p.closing_edge, None);
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let reply = reply_from("hk7", echoed(json!("HomeTeam"), json!(1.2)));
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::ProbabilityOutOfRange(_))
        ));
        let reply = reply_from("hk7", echoed(json!("HomeTeam"), json!("0.5")));
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::ProbabilityOutOfRange(_))
        ));
    }

    #[test]
    fn free_label_choice_is_normalized() {
        let reply = reply_from("hk9", echoed(json!("HOME"), json!(0.6)));
        let p = validate(&reply, &request(), &addressed(), now()).unwrap();
        assert_eq!(p.probability_choice, ProbabilityChoice::HomeTeam);
        assert_eq!(p.responder_uid, 9);
    }

    #[test]
    fn closing_edge_from_responder_is_tampering() {
        let mut body = echoed(json!("HomeTeam"), json!(0.6));
        body["match_prediction"]["closingEdge"] = json!(0.05);
        let reply = reply_from("hk7", body);
        assert_eq!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::ClosingEdgeSet)
        );
    }

    #[test]
    fn identity_must_be_present_and_addressed() {
        let mut reply = reply_from("hk7", echoed(json!("HomeTeam"), json!(0.6)));
        reply.sender_identity = None;
        assert_eq!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::MissingIdentity)
        );
        let reply = reply_from("stranger", echoed(json!("HomeTeam"), json!(0.6)));
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::UnknownSender(_))
        ));
    }

    #[test]
    fn missing_or_unknown_choice_is_rejected() {
        let reply = reply_from("hk7", echoed(Value::Null, json!(0.6)));
        assert_eq!(validate(&reply, &request(), &addressed(), now()), Err(Rejection::MissingChoice));
        let reply = reply_from("hk7", echoed(json!("HomeTeam"), Value::Null));
        assert_eq!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::MissingProbability)
        );
        let reply = reply_from("hk7", echoed(json!("Over"), json!(0.6)));
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::UnknownChoice(_))
        ));
    }

    #[test]
    fn replies_at_or_after_kickoff_are_rejected() {
        let reply = reply_from("hk7", echoed(json!("HomeTeam"), json!(0.6)));
        assert_eq!(
            validate(&reply, &request(), &addressed(), kickoff()),
            Err(Rejection::AfterKickoff)
        );
    }

    #[test]
    fn echoed_identity_fields_must_match() {
        let mut body = echoed(json!("HomeTeam"), json!(0.6));
        body["match_prediction"]["league"] = json!("NFL");
        let reply = reply_from("hk7", body);
        assert_eq!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::FieldMismatch("league"))
        );

        let mut body = echoed(json!("HomeTeam"), json!(0.6));
        body["match_prediction"]["matchDate"] = json!("2024-08-01 16:30:00");
        let reply = reply_from("hk7", body);
        assert_eq!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::FieldMismatch("matchDate"))
        );
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let reply = Reply { sender_identity: Some("hk7".to_string()), body: None };
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::Malformed(_))
        ));
        let reply = reply_from("hk7", json!({"unexpected": true}));
        assert!(matches!(
            validate(&reply, &request(), &addressed(), now()),
            Err(Rejection::Malformed(_))
        ));
    }

    #[test]
    fn round_splits_accepted_rejected_and_silent() {
        let outcomes = vec![
            DispatchOutcome {
                responder: responder(7, "hk7", true, 1.0),
                reply: Some(reply_from("hk7", echoed(json!("HomeTeam"), json!(0.6)))),
            },
            DispatchOutcome {
                responder: responder(9, "hk9", true, 1.0),
                reply: Some(reply_from("hk9", echoed(json!("HomeTeam"), json!(7)))),
            },
            DispatchOutcome { responder: responder(11, "hk11", true, 1.0), reply: None },
        ];
        let round = validate_round(&outcomes, &request(), now());
        assert_eq!(round.accepted.len(), 1);
        assert_eq!(round.rejected.len(), 1);
        assert_eq!(round.rejected[0].0, 9);
        assert_eq!(round.silent, vec![11]);
    }

    #[test]
    fn reply_claiming_another_responders_identity_is_rejected() {
        let outcomes = vec![
            DispatchOutcome {
                responder: responder(7, "hk7", true, 1.0),
                reply: Some(reply_from("hk9", echoed(json!("HomeTeam"), json!(0.6)))),
            },
            DispatchOutcome { responder: responder(9, "hk9", true, 1.0), reply: None },
        ];
        let round = validate_round(&outcomes, &request(), now());
        assert!(round.accepted.is_empty());
        assert_eq!(round.rejected, vec![(7, Rejection::UnknownSender("hk9".to_string()))]);
        assert_eq!(round.silent, vec![9]);
    }
}

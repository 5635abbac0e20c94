use crate::types::{ProbabilityChoice, ScoreablePrediction};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeScore {
    /// Chosen-side probability minus the closing-line implied probability of the actual winner.
    pub edge: f64,
    /// 1 when the chosen side won (draw counts as a side), else 0.
    pub correct_winner: u8,
}

/// Market-implied probability of decimal odds. None for unusable odds.
pub fn implied_probability(decimal_odds: f64) -> Option<f64> {
    (decimal_odds.is_finite() && decimal_odds > 0.0).then(|| 1.0 / decimal_odds)
}

/// Pure and deterministic in its inputs.
pub fn calculate_edge(
    chosen: ProbabilityChoice,
    probability: f64,
    actual_winner: ProbabilityChoice,
    actual_winner_odds: Option<f64>,
) -> EdgeScore {
    let correct_winner = u8::from(chosen == actual_winner);
    let edge = actual_winner_odds
        .and_then(implied_probability)
        .map(|implied| probability - implied)
        .unwrap_or(0.0);
    EdgeScore { edge, correct_winner }
}

pub fn score_prediction(sp: &ScoreablePrediction) -> EdgeScore {
    calculate_edge(
        sp.prediction.probability_choice,
        sp.prediction.probability,
        sp.actual_winner(),
        sp.actual_winner_odds(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProbabilityChoice::*;

    #[test]
    fn edge_is_probability_minus_implied_winner_probability() {
        let s = calculate_edge(HomeTeam, 0.6, HomeTeam, Some(2.0));
        assert!((s.edge - 0.1).abs() < 1e-12);
        assert_eq!(s.correct_winner, 1);

        // Wrong side: still measured against the actual winner's closing line.
        let s = calculate_edge(HomeTeam, 0.6, AwayTeam, Some(1.25));
        assert!((s.edge - (0.6 - 0.8)).abs() < 1e-12);
        assert_eq!(s.correct_winner, 0);
    }

    #[test]
    fn draw_is_its_own_side() {
        assert_eq!(calculate_edge(Draw, 0.3, Draw, Some(3.0)).correct_winner, 1);
        assert_eq!(calculate_edge(HomeTeam, 0.3, Draw, Some(3.0)).correct_winner, 0);
    }

    #[test]
    fn unusable_odds_give_zero_edge() {
        assert_eq!(calculate_edge(HomeTeam, 0.6, HomeTeam, None).edge, 0.0);
        assert_eq!(calculate_edge(HomeTeam, 0.6, HomeTeam, Some(0.0)).edge, 0.0);
        assert_eq!(calculate_edge(HomeTeam, 0.6, HomeTeam, Some(f64::NAN)).edge, 0.0);
        assert_eq!(calculate_edge(HomeTeam, 0.6, HomeTeam, Some(-2.0)).edge, 0.0);
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let a = calculate_edge(AwayTeam, 0.55, AwayTeam, Some(1.91));
        let b = calculate_edge(AwayTeam, 0.55, AwayTeam, Some(1.91));
        assert_eq!(a, b);
        assert!(a.correct_winner == 0 || a.correct_winner == 1);
    }
}

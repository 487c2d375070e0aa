//! Deterministic metrics computed over a batch of scenario runs. These never
//! call an LM — they fold over what the runner already recorded, so the
//! numbers are reproducible across repeated `--runs`.

use crate::eval::runner::ScenarioResult;

/// Summary statistics over one or more scenario replays.
#[derive(Debug, Clone, Default)]
pub struct MetricsReport {
    /// Fraction of scenarios whose expectations all held.
    pub scenario_pass_rate: f64,
    /// Fraction of triggered turns whose applied-suggestion signature
    /// repeated one already applied earlier in the same run.
    pub duplicate_suggestion_rate: f64,
    /// Mean number of suggestions applied per triggered turn.
    pub mean_suggestions_per_turn: f64,
    /// Fraction of triggered turns that produced no applied suggestion.
    pub zero_suggestion_turn_rate: f64,
}

/// Fold a batch of scenario results into the four deterministic metrics.
pub fn compute_metrics(results: &[ScenarioResult]) -> MetricsReport {
    if results.is_empty() {
        return MetricsReport::default();
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    let scenario_pass_rate = passed as f64 / results.len() as f64;

    let triggered_turns: Vec<_> = results.iter().flat_map(|r| r.turns.iter()).filter(|t| t.triggered).collect();

    if triggered_turns.is_empty() {
        return MetricsReport { scenario_pass_rate, ..MetricsReport::default() };
    }

    let duplicate_count = triggered_turns.iter().filter(|t| t.was_duplicate).count();
    let duplicate_suggestion_rate = duplicate_count as f64 / triggered_turns.len() as f64;

    let total_suggestions: usize = triggered_turns.iter().map(|t| t.suggestions_applied.len()).sum();
    let mean_suggestions_per_turn = total_suggestions as f64 / triggered_turns.len() as f64;

    let zero_count = triggered_turns.iter().filter(|t| t.suggestions_applied.is_empty()).count();
    let zero_suggestion_turn_rate = zero_count as f64 / triggered_turns.len() as f64;

    MetricsReport {
        scenario_pass_rate,
        duplicate_suggestion_rate,
        mean_suggestions_per_turn,
        zero_suggestion_turn_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::runner::TurnRecord;
    use crate::incident::model::{Severity, Status};

    fn result(name: &str, passed: bool, turns: Vec<TurnRecord>) -> ScenarioResult {
        ScenarioResult {
            scenario_name: name.to_string(),
            turns,
            expectations_met: vec![passed],
            final_status: Status::Mitigating,
            final_severity: Severity::Medium,
        }
    }

    #[test]
    fn empty_batch_yields_zeroed_report() {
        let report = compute_metrics(&[]);
        assert_eq!(report.scenario_pass_rate, 0.0);
    }

    #[test]
    fn duplicate_and_zero_rates_computed_from_triggered_turns_only() {
        let results = vec![result(
            "s1",
            true,
            vec![
                TurnRecord { turn_index: 0, triggered: true, suggestions_applied: vec!["apply-status".to_string()], was_duplicate: false },
                TurnRecord { turn_index: 1, triggered: true, suggestions_applied: vec!["apply-status".to_string()], was_duplicate: true },
                TurnRecord { turn_index: 2, triggered: false, suggestions_applied: vec![], was_duplicate: false },
            ],
        )];
        let report = compute_metrics(&results);
        assert_eq!(report.duplicate_suggestion_rate, 0.5);
        assert_eq!(report.zero_suggestion_turn_rate, 0.0);
        assert_eq!(report.mean_suggestions_per_turn, 1.0);
    }
}

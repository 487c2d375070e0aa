//! Scenario fixtures replayed by the evaluation harness: a seed incident, a
//! scripted sequence of turns, and the expectations those turns should
//! eventually satisfy — grounded in the teacher's step/task-tracking shape
//! (`planner.rs`) applied to incident replay instead of plan execution.
//!
//! The 7 built-in scenarios below transcribe the seven literal scenario
//! seeds into this crate's sequential-replay shape: each `trigger_suggestion`
//! turn runs one live Suggestion Engine call, so multi-turn seeds are
//! expressed as a scenario with more than one triggering turn rather than as
//! independent per-turn snapshots. `literal_expectations` carries each seed's
//! own "Should [NOT] suggest ..." wording verbatim for traceability; the
//! typed `expectations` are this crate's mechanical check of the same claim.

use crate::incident::event_log::Adapter;
use crate::incident::model::{Incident, Severity, Status};

/// One scripted input to replay against a running incident.
#[derive(Debug, Clone)]
pub struct ScenarioTurn {
    pub adapter: Adapter,
    pub content: String,
    /// `true` for an operator message (just appended); `false` for a
    /// turn that should also trigger a suggestion-engine pass.
    pub trigger_suggestion: bool,
}

/// A condition the harness checks against the incident's state after replay.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    StatusBecomes(Status),
    SeverityBecomes(Severity),
    AffectionPublished,
    /// No `AFFECTION_UPDATE` event was ever appended.
    NoAffectionPublished,
    SimilarIncidentFound(String),
    NoSuggestionMade,
}

/// A fully self-contained evaluation scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub seed: Incident,
    pub turns: Vec<ScenarioTurn>,
    pub expectations: Vec<Expectation>,
    /// The seed's own literal "Should [NOT] suggest ..." expectation strings.
    pub literal_expectations: Vec<&'static str>,
}

fn seed(id: &str, title: &str, severity: Severity) -> Incident {
    Incident {
        id: id.to_string(),
        created_at: chrono::Utc::now(),
        status: Status::Open,
        severity,
        title: title.to_string(),
        description: format!("scenario seed for {}", title),
        prompt: format!("investigate: {}", title),
        assignee: None,
        source: "pagerduty".to_string(),
    }
}

/// The fixed set of scenarios the harness can replay by name.
pub fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        // Seed 1: CDN outage, turn 1.
        Scenario {
            name: "cdn-outage-turn-1".to_string(),
            seed: seed("eval-cdn-outage", "CDN outage", Severity::Medium),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "EU CDN edge returning 503s for static assets".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "US-West CDN edge also throwing 503s, confirmed via synthetic checks".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "confirmed CDN 503s across both the EU and US-West edges".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::StatusBecomes(Status::Open), Expectation::AffectionPublished],
            literal_expectations: vec![
                "Should NOT suggest update_status(mitigating).",
                "Should NOT suggest update_status(resolved).",
                "Should suggest add_status_page_update (affectionStatus=investigating).",
            ],
        },
        // Seed 2: CDN outage, turn 2 — prior severity=high, affection=investigating, then a rollback report.
        Scenario {
            name: "cdn-outage-turn-2".to_string(),
            seed: seed("eval-cdn-outage-t2", "CDN outage", Severity::High),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "confirmed CDN 503s across both the EU and US-West edges, publishing a status page update"
                        .to_string(),
                    trigger_suggestion: true,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "Rolled back CDN config".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::StatusBecomes(Status::Mitigating)],
            literal_expectations: vec![
                "Should suggest update_status(mitigating).",
                "Should NOT suggest update_status(resolved).",
            ],
        },
        // Seed 3: CDN outage, turn 4 — prior mitigating, then confirmed recovery.
        Scenario {
            name: "cdn-outage-turn-4".to_string(),
            seed: seed("eval-cdn-outage-t4", "CDN outage", Severity::High),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "Rolled back CDN config, monitoring recovery".to_string(),
                    trigger_suggestion: true,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "All regions 200 OK".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "Confirmed working, error rate 0%".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::StatusBecomes(Status::Resolved)],
            literal_expectations: vec!["Should suggest update_status(resolved)."],
        },
        // Seed 4: internal demo DB corruption, turn 2 — no external impact.
        Scenario {
            name: "internal-demo-db-corruption-turn-2".to_string(),
            seed: seed("eval-internal-demo-db", "internal demo DB corruption", Severity::Medium),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Dashboard,
                    content: "demo DB corrupted, internal-only, no customer traffic touches this DB".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Dashboard,
                    content: "fix applied to the demo DB, internal only, verifying now".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::StatusBecomes(Status::Mitigating), Expectation::NoAffectionPublished],
            literal_expectations: vec![
                "Should suggest update_status(mitigating).",
                "Should NOT suggest add_status_page_update.",
            ],
        },
        // Seed 5: pending investigating spam — a standing investigating suggestion
        // with no matching status-page update, followed by internal chatter only.
        Scenario {
            name: "pending-investigating-spam".to_string(),
            seed: seed("eval-pending-investigating-spam", "elevated error rate", Severity::Low),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "looking into a possible issue, nothing confirmed yet".to_string(),
                    trigger_suggestion: true,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "still checking, nothing new to report".to_string(),
                    trigger_suggestion: true,
                },
                ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "still investigating, no update".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::NoAffectionPublished],
            literal_expectations: vec![
                "Should NOT suggest add_status_page_update given one pending investigating \
                 suggestion with no matching AFFECTION_UPDATE and only internal chatter since.",
            ],
        },
        // Seed 6: repeat suppression with a stale target — a pending mitigating
        // suggestion old enough (by both clock and event count) to repeat.
        Scenario {
            name: "repeat-suppression-with-stale-target".to_string(),
            seed: seed("eval-repeat-suppression-stale", "elevated 500s", Severity::Medium),
            turns: {
                let mut turns = vec![ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "confirmed elevated 500s, rolling back now".to_string(),
                    trigger_suggestion: true,
                }];
                for _ in 0..20 {
                    turns.push(ScenarioTurn {
                        adapter: Adapter::Slack,
                        content: "still monitoring, no change".to_string(),
                        trigger_suggestion: false,
                    });
                }
                turns.push(ScenarioTurn {
                    adapter: Adapter::Slack,
                    content: "still seeing the same symptoms, reapplying the rollback".to_string(),
                    trigger_suggestion: true,
                });
                turns
            },
            expectations: vec![Expectation::StatusBecomes(Status::Mitigating)],
            literal_expectations: vec![
                "Should suggest update_status(mitigating) again despite a prior pending \
                 suggestion, because it is older than 10 minutes and at least 20 events have \
                 elapsed (stale-target exception) and current evidence still warrants it.",
            ],
        },
        // Seed 7: noisy false alarm, turn 2.
        Scenario {
            name: "noisy-false-alarm-turn-2".to_string(),
            seed: seed("eval-noisy-false-alarm", "ambiguous alerts", Severity::Low),
            turns: vec![
                ScenarioTurn {
                    adapter: Adapter::Fire,
                    content: "elevated error rate alert, investigating".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Fire,
                    content: "false alarm across the board".to_string(),
                    trigger_suggestion: false,
                },
                ScenarioTurn {
                    adapter: Adapter::Fire,
                    content: "everything stable".to_string(),
                    trigger_suggestion: true,
                },
            ],
            expectations: vec![Expectation::StatusBecomes(Status::Resolved), Expectation::NoAffectionPublished],
            literal_expectations: vec![
                "Should suggest update_status(resolved).",
                "Should NOT suggest add_status_page_update.",
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scenarios_cover_seven_seeds() {
        assert_eq!(builtin_scenarios().len(), 7);
    }

    #[test]
    fn every_scenario_has_at_least_one_expectation() {
        for scenario in builtin_scenarios() {
            assert!(!scenario.expectations.is_empty(), "{} has no expectations", scenario.name);
            assert!(!scenario.literal_expectations.is_empty(), "{} has no literal expectations", scenario.name);
        }
    }
}

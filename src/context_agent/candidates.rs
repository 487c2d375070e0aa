//! Source of historical/open incidents a context agent may investigate,
//! abstracted behind a trait the same way [`ClientWrapper`](crate::client_wrapper::ClientWrapper)
//! abstracts the LM provider — callers substitute an in-memory fixture in
//! tests and the evaluation harness, and a real incident store in production.

use crate::incident::model::SimilarIncidentCandidate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;

/// Looks up candidate incidents that might be similar to a live incident.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Open incidents created after `since`, capped by the caller.
    async fn open_candidates(
        &self,
        incident_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SimilarIncidentCandidate>, Box<dyn Error + Send + Sync>>;

    /// Completed incidents resolved after `since`, capped by the caller.
    async fn completed_candidates(
        &self,
        incident_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SimilarIncidentCandidate>, Box<dyn Error + Send + Sync>>;
}

/// Fixed in-memory candidate list, used by tests and the evaluation harness
/// scenario fixtures where the candidate pool is part of the scenario seed.
pub struct StaticCandidateSource {
    pub candidates: Vec<SimilarIncidentCandidate>,
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn open_candidates(
        &self,
        incident_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SimilarIncidentCandidate>, Box<dyn Error + Send + Sync>> {
        use crate::incident::model::CandidateLifecycle;
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.id != incident_id && c.created_at >= since)
            .filter(|c| matches!(c.lifecycle, CandidateLifecycle::Open { .. }))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn completed_candidates(
        &self,
        incident_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SimilarIncidentCandidate>, Box<dyn Error + Send + Sync>> {
        use crate::incident::model::CandidateLifecycle;
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.id != incident_id && c.created_at >= since)
            .filter(|c| matches!(c.lifecycle, CandidateLifecycle::Completed { .. }))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::model::{CandidateLifecycle, Severity, Status};

    fn candidate(id: &str, open: bool) -> SimilarIncidentCandidate {
        SimilarIncidentCandidate {
            id: id.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            severity: Severity::Medium,
            lifecycle: if open {
                CandidateLifecycle::Open { status: Status::Mitigating }
            } else {
                CandidateLifecycle::Completed {
                    terminal_status: crate::incident::model::TerminalStatus::Resolved,
                    resolved_at: Utc::now(),
                }
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn splits_open_and_completed_candidates() {
        let source = StaticCandidateSource {
            candidates: vec![candidate("a", true), candidate("b", false), candidate("self", true)],
        };
        let open = source
            .open_candidates("self", Utc::now() - chrono::Duration::days(1), 20)
            .await
            .unwrap();
        let completed = source
            .completed_candidates("self", Utc::now() - chrono::Duration::days(1), 50)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(completed.len(), 1);
        assert!(open.iter().all(|c| c.id != "self"));
    }
}

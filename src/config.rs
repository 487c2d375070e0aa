//! Configuration for the incident ops core.
//!
//! Provides the [`IncidentOpsConfig`] struct for configuring event-log
//! storage, context-agent lookback, retry policy, and staleness thresholds.
//! Users construct this manually — no TOML/YAML parsing dependency is
//! introduced; scenario tests and the evaluation harness override fields
//! directly rather than loading a config file.
//!
//! # Example
//!
//! ```rust
//! use incident_ops_core::config::IncidentOpsConfig;
//! use std::path::PathBuf;
//!
//! // Use the defaults ("event_logs" in the current directory, 90-day lookback, ...)
//! let config = IncidentOpsConfig::default();
//!
//! // Or override individual fields for a test run
//! let config = IncidentOpsConfig {
//!     event_log_dir: PathBuf::from("/tmp/test_event_logs"),
//!     ..IncidentOpsConfig::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the incident ops core.
///
/// This struct is intentionally minimal; no config-file parsing dependencies
/// are introduced. Tests construct it with `..IncidentOpsConfig::default()`
/// to override only the fields a scenario cares about.
#[derive(Clone, Debug)]
pub struct IncidentOpsConfig {
    /// Directory where each incident's event log `.jsonl` file is stored.
    pub event_log_dir: PathBuf,

    /// How far back the Similar-Incidents Context Agent looks when selecting
    /// candidates (default 90 days).
    pub candidate_lookback: Duration,

    /// Maximum number of open incidents considered as similar-incident
    /// candidates.
    pub max_open_candidates: usize,

    /// Maximum number of completed incidents considered as similar-incident
    /// candidates.
    pub max_completed_candidates: usize,

    /// Maximum number of attempts the Prompt Workflow makes for a single
    /// step before abandoning it.
    pub max_retry_attempts: usize,

    /// Lower bound of the geometric backoff delay between retry attempts.
    pub retry_backoff_min: Duration,

    /// Upper bound of the geometric backoff delay between retry attempts.
    pub retry_backoff_max: Duration,

    /// Minimum age of an outstanding suggestion before it is considered
    /// stale enough to recompute.
    pub stale_suggestion_age: Duration,

    /// Minimum number of new events accumulated before an outstanding
    /// suggestion is considered stale enough to recompute.
    pub stale_suggestion_event_count: usize,
}

impl Default for IncidentOpsConfig {
    /// Create a config pointing at `"event_logs"` in the current working
    /// directory, with a 90-day candidate lookback, 20/50 open/completed
    /// candidate caps, 3 retry attempts, and 10-minute/20-event staleness
    /// thresholds.
    ///
    /// # Example
    ///
    /// ```rust
    /// use incident_ops_core::config::IncidentOpsConfig;
    /// use std::path::PathBuf;
    ///
    /// let config = IncidentOpsConfig::default();
    /// assert_eq!(config.event_log_dir, PathBuf::from("event_logs"));
    /// assert_eq!(config.max_open_candidates, 20);
    /// assert_eq!(config.max_completed_candidates, 50);
    /// ```
    fn default() -> Self {
        Self {
            event_log_dir: PathBuf::from("event_logs"),
            candidate_lookback: Duration::from_secs(90 * 24 * 60 * 60),
            max_open_candidates: 20,
            max_completed_candidates: 50,
            max_retry_attempts: 3,
            retry_backoff_min: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(8),
            stale_suggestion_age: Duration::from_secs(10 * 60),
            stale_suggestion_event_count: 20,
        }
    }
}

//! Persistent, hash-chained incident event log.
//!
//! [`IncidentEventLog`] is the append-only log of everything that has
//! happened to a single incident: status changes, severity changes, status-
//! page ("affection") updates, assignee changes, messages, and the context
//! agent's discoveries. Each [`AgentEvent`] is SHA-256 hash-chained to the
//! previous entry, so tampering with an earlier entry is detectable via
//! [`IncidentEventLog::verify_integrity`].
//!
//! Events are persisted as newline-delimited JSON (`.jsonl`) — one
//! [`AgentEvent`] per line, append-only. The filename is derived from the
//! incident's identifier.
//!
//! # Disk Format
//!
//! Each `.jsonl` file contains one JSON-serialized [`AgentEvent`] per line:
//!
//! ```text
//! {"id":0,"event_type":"INCIDENT_CREATED","event_data":{...},"created_at":"2025-07-01T12:00:00Z","adapter":"slack","event_metadata":null,"prev_hash":"","hash":"abc1..."}
//! {"id":1,"event_type":"STATUS_UPDATE","event_data":{"status":"mitigating"},"created_at":"2025-07-01T12:05:00Z","adapter":"slack","event_metadata":{"kind":"suggestion","agentSuggestionId":"sg-1"},"prev_hash":"abc1...","hash":"def2..."}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use incident_ops_core::incident::event_log::{Adapter, EventType, IncidentEventLog};
//! use std::path::PathBuf;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut log = IncidentEventLog::open(&PathBuf::from("event_logs"), "inc-42")?;
//!
//! log.append(
//!     EventType::IncidentCreated,
//!     serde_json::json!({ "title": "Checkout 500s" }),
//!     Adapter::Dashboard,
//!     None,
//! )?;
//!
//! assert!(log.verify_integrity());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Tag identifying the shape of an [`AgentEvent`]'s `event_data` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    IncidentCreated,
    MessageAdded,
    StatusUpdate,
    SeverityUpdate,
    AffectionUpdate,
    AssigneeUpdate,
    SimilarIncidentsDiscovered,
    SimilarIncident,
    ContextAgentTriggered,
}

/// Origin surface that produced an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Adapter {
    Slack,
    Dashboard,
    Fire,
}

/// A single append-only entry in an [`IncidentEventLog`].
///
/// `event_data`'s shape is determined by `event_type` and is left as
/// [`serde_json::Value`] rather than a closed enum of payload structs — new
/// event types can be added without a breaking change to every reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Monotonically increasing position; the log's total order.
    pub id: u64,
    /// Classification of the event.
    pub event_type: EventType,
    /// Payload whose shape is determined by `event_type`.
    pub event_data: serde_json::Value,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
    /// Surface that produced the event.
    pub adapter: Adapter,
    /// Optional free-form metadata. Suggestion-engine-originated events carry
    /// `kind="suggestion"` and a unique `agentSuggestionId` here.
    pub event_metadata: Option<HashMap<String, serde_json::Value>>,
    /// SHA-256 hex digest of the previous event (empty string for the first entry).
    pub prev_hash: String,
    /// SHA-256 hex digest of this event's canonical representation.
    pub hash: String,
}

impl AgentEvent {
    /// Dedupe key for insight/context events, if one was set in
    /// `event_metadata.dedupe_key`. Used by [`IncidentEventLog::append_deduped`]
    /// to prevent duplicate insertion of context-agent findings.
    pub fn dedupe_key(&self) -> Option<&str> {
        self.event_metadata
            .as_ref()?
            .get("dedupe_key")?
            .as_str()
    }
}

/// Append-only, SHA-256 hash-chained, disk-persisted log of a single
/// incident's events.
pub struct IncidentEventLog {
    events: Vec<AgentEvent>,
    file_path: PathBuf,
    auto_flush: bool,
}

impl IncidentEventLog {
    /// Open an existing log or create a new one for `incident_id`.
    ///
    /// If the `.jsonl` file already exists, all previously persisted events
    /// are loaded back into memory. If it does not exist, a new empty log is
    /// created; the file itself is created lazily on first append.
    pub fn open(log_dir: &PathBuf, incident_id: &str) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(event_log_filename(incident_id));

        let events = if file_path.exists() {
            let file = fs::File::open(&file_path)?;
            let reader = BufReader::new(file);
            let mut entries = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: AgentEvent = serde_json::from_str(&line).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("failed to parse event: {}", e),
                    )
                })?;
                entries.push(event);
            }
            entries
        } else {
            Vec::new()
        };

        Ok(Self {
            events,
            file_path,
            auto_flush: true,
        })
    }

    /// Append an event unconditionally, computing its hash chained to the
    /// previous entry and (when `auto_flush` is enabled) writing it to disk
    /// immediately.
    pub fn append(
        &mut self,
        event_type: EventType,
        event_data: serde_json::Value,
        adapter: Adapter,
        event_metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> io::Result<&AgentEvent> {
        let id = self.events.len() as u64;
        let prev_hash = self.events.last().map(|e| e.hash.clone()).unwrap_or_default();
        let created_at = Utc::now();
        let hash = compute_event_hash(
            id,
            &created_at,
            event_type,
            &event_data,
            adapter,
            &event_metadata,
            &prev_hash,
        );

        let event = AgentEvent {
            id,
            event_type,
            event_data,
            created_at,
            adapter,
            event_metadata,
            prev_hash,
            hash,
        };

        if self.auto_flush {
            self.flush_one(&event)?;
        }

        self.events.push(event);
        Ok(self.events.last().unwrap())
    }

    /// Append an event only if no existing event already carries the same
    /// `dedupe_key` in its `event_metadata`. Returns `true` if the event was
    /// inserted, `false` if an existing event matched and this one was
    /// suppressed. Used for the context agent's insight events, which may be
    /// recomputed and re-posted across retries.
    pub fn append_deduped(
        &mut self,
        dedupe_key: &str,
        event_type: EventType,
        event_data: serde_json::Value,
        adapter: Adapter,
        mut event_metadata: HashMap<String, serde_json::Value>,
    ) -> io::Result<bool> {
        if self
            .events
            .iter()
            .any(|e| e.dedupe_key() == Some(dedupe_key))
        {
            return Ok(false);
        }

        event_metadata.insert(
            "dedupe_key".to_string(),
            serde_json::Value::String(dedupe_key.to_string()),
        );
        self.append(event_type, event_data, adapter, Some(event_metadata))?;
        Ok(true)
    }

    fn flush_one(&self, event: &AgentEvent) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let json = serde_json::to_string(event)
            .map_err(|e| io::Error::other(format!("failed to serialize event: {}", e)))?;
        writeln!(file, "{}", json)
    }

    /// Walk the log and verify that every hash matches its recomputed value
    /// and that `prev_hash` chains correctly to the preceding entry.
    pub fn verify_integrity(&self) -> bool {
        let mut prev_hash = String::new();
        for event in &self.events {
            if event.prev_hash != prev_hash {
                return false;
            }
            let expected = compute_event_hash(
                event.id,
                &event.created_at,
                event.event_type,
                &event.event_data,
                event.adapter,
                &event.event_metadata,
                &event.prev_hash,
            );
            if event.hash != expected {
                return false;
            }
            prev_hash = event.hash.clone();
        }
        true
    }

    /// Return all events in the log, in their total order.
    pub fn events(&self) -> &[AgentEvent] {
        &self.events
    }

    /// Return events appended since (and including) the entry with `id >= since_id`.
    pub fn events_since(&self, since_id: u64) -> &[AgentEvent] {
        let start = self.events.partition_point(|e| e.id < since_id);
        &self.events[start..]
    }

    /// Return the file path used for persistence.
    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    /// Control whether appended events are immediately flushed to disk.
    pub fn set_auto_flush(&mut self, auto_flush: bool) {
        self.auto_flush = auto_flush;
    }
}

/// Compute the SHA-256 hex digest for an event's canonical fields.
fn compute_event_hash(
    id: u64,
    created_at: &DateTime<Utc>,
    event_type: EventType,
    event_data: &serde_json::Value,
    adapter: Adapter,
    event_metadata: &Option<HashMap<String, serde_json::Value>>,
    prev_hash: &str,
) -> String {
    let type_str = serde_json::to_string(&event_type).unwrap_or_default();
    let data_str = serde_json::to_string(event_data).unwrap_or_default();
    let adapter_str = serde_json::to_string(&adapter).unwrap_or_default();
    let metadata_str = event_metadata
        .as_ref()
        .map(|m| serde_json::to_string(m).unwrap_or_default())
        .unwrap_or_default();
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        id,
        created_at.to_rfc3339(),
        type_str,
        data_str,
        adapter_str,
        metadata_str,
        prev_hash
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the `.jsonl` filename for an incident's event log.
///
/// Format: `{safe_id}.jsonl`, with non-alphanumeric characters (other than
/// `-` and `_`) replaced by `_` for filesystem safety.
pub fn event_log_filename(incident_id: &str) -> String {
    let safe_id: String = incident_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.jsonl", safe_id)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MARKER_PRE: &str = "pre:mask_pii";
pub const MARKER_INTENT: &str = "intent:structured_output";
pub const MARKER_EXECUTOR_DONE: &str = "executor:done";
pub const MARKER_POLICY_OK: &str = "post:ok";
pub const MARKER_POLICY_VIOLATION: &str = "post:policy_violation";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub node_id: String,
    pub agent: String,
    pub attempt: u32,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }

    pub fn retry_in_ms(&self) -> Option<u64> {
        match &self.outcome {
            AttemptOutcome::Failed { retry_in_ms, .. } => *retry_in_ms,
            AttemptOutcome::Succeeded => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Stage {
        marker: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Attempt(AttemptRecord),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub seq: u64,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TranscriptEvent,
}

/// Append-only, single-writer event log for one request. Entries are kept in
/// the order they were recorded and carry a gap-free sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn stage(&mut self, marker: impl Into<String>) {
        self.push(TranscriptEvent::Stage { marker: marker.into(), detail: None });
    }

    pub fn stage_with_detail(&mut self, marker: impl Into<String>, detail: impl Into<String>) {
        self.push(TranscriptEvent::Stage { marker: marker.into(), detail: Some(detail.into()) });
    }

    pub fn record_attempt(&mut self, record: AttemptRecord) {
        self.push(TranscriptEvent::Attempt(record));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn markers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                TranscriptEvent::Stage { marker, .. } => Some(marker.as_str()),
                TranscriptEvent::Attempt(_) => None,
            })
            .collect()
    }

    pub fn attempts(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.entries.iter().filter_map(|entry| match &entry.event {
            TranscriptEvent::Attempt(record) => Some(record),
            TranscriptEvent::Stage { .. } => None,
        })
    }

    pub fn attempts_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a AttemptRecord> {
        self.attempts().filter(move |record| record.node_id == node_id)
    }

    fn push(&mut self, event: TranscriptEvent) {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(TranscriptEntry { seq, occurred_at: Utc::now(), event });
    }
}

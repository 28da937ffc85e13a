//! Tamper-evident semantic log entries for the audit trail.
//!
//! Each entry hashes its own canonical JSON form and chains to the previous
//! entry's hash. Canonical form: recursively key-sorted maps (serde_json's
//! default map ordering), compact encoding, signature and entry hash
//! excluded.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Types of events in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    TaskReceived,
    TaskDispatched,
    WorkerResult,
    EvaluationComplete,
    TaskComplete,
    TaskAbandoned,
    RevisionRequested,
}

impl LogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskReceived => "task_received",
            Self::TaskDispatched => "task_dispatched",
            Self::WorkerResult => "worker_result",
            Self::EvaluationComplete => "evaluation_complete",
            Self::TaskComplete => "task_complete",
            Self::TaskAbandoned => "task_abandoned",
            Self::RevisionRequested => "revision_requested",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "task_received" => Some(Self::TaskReceived),
            "task_dispatched" => Some(Self::TaskDispatched),
            "worker_result" => Some(Self::WorkerResult),
            "evaluation_complete" => Some(Self::EvaluationComplete),
            "task_complete" => Some(Self::TaskComplete),
            "task_abandoned" => Some(Self::TaskAbandoned),
            "revision_requested" => Some(Self::RevisionRequested),
            _ => None,
        }
    }
}

/// A semantic log entry capturing intent and reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticLog {
    pub id: String,
    pub event: LogEvent,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// Event-specific data map.
    pub data: Value,
    /// Supervisor's reasoning for the action.
    pub reasoning: String,
    /// Hash of the previous log entry; empty for the first entry.
    pub previous_hash: String,
    /// Base64 Ed25519 signature of the entry hash; empty when unsigned.
    pub signature: String,
}

impl SemanticLog {
    /// Create a new, unchained entry.
    pub fn new(
        event: LogEvent,
        task_id: impl Into<String>,
        data: Value,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            data,
            reasoning: reasoning.into(),
            previous_hash: String::new(),
            signature: String::new(),
        }
    }

    fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Dictionary form used for export and round-trip.
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "event": self.event.as_str(),
            "task_id": self.task_id,
            "timestamp": self.timestamp_iso(),
            "data": self.data,
            "reasoning": self.reasoning,
            "previous_hash": self.previous_hash,
            "signature": self.signature,
        })
    }

    /// Reconstruct an entry from its dictionary form.
    pub fn from_value(value: &Value) -> Option<Self> {
        let event = LogEvent::parse_str(value.get("event")?.as_str()?)?;
        let timestamp = DateTime::parse_from_rfc3339(value.get("timestamp")?.as_str()?)
            .ok()?
            .with_timezone(&Utc);
        Some(Self {
            id: value.get("id")?.as_str()?.to_string(),
            event,
            task_id: value.get("task_id")?.as_str()?.to_string(),
            timestamp,
            data: value.get("data").cloned().unwrap_or_else(|| json!({})),
            reasoning: value
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            previous_hash: value
                .get("previous_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            signature: value
                .get("signature")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// SHA-256 of the canonical JSON form, excluding the signature.
    pub fn compute_hash(&self) -> String {
        let content = json!({
            "id": self.id,
            "event": self.event.as_str(),
            "task_id": self.task_id,
            "timestamp": self.timestamp_iso(),
            "data": self.data,
            "reasoning": self.reasoning,
            "previous_hash": self.previous_hash,
        });
        let encoded = serde_json::to_string(&content).unwrap_or_default();
        let digest = Sha256::digest(encoded.as_bytes());
        digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trip() {
        for event in [
            LogEvent::TaskReceived,
            LogEvent::TaskDispatched,
            LogEvent::WorkerResult,
            LogEvent::EvaluationComplete,
            LogEvent::TaskComplete,
            LogEvent::TaskAbandoned,
            LogEvent::RevisionRequested,
        ] {
            assert_eq!(LogEvent::parse_str(event.as_str()), Some(event));
        }
    }

    #[test]
    fn value_round_trip_preserves_semantics() {
        let entry = SemanticLog::new(
            LogEvent::TaskDispatched,
            "org/repo#42",
            json!({"minion_id": "minion-a", "issue": 42}),
            "capacity available",
        );
        let restored = SemanticLog::from_value(&entry.to_value()).unwrap();
        assert_eq!(restored.id, entry.id);
        assert_eq!(restored.event, entry.event);
        assert_eq!(restored.task_id, entry.task_id);
        assert_eq!(restored.data, entry.data);
        assert_eq!(restored.reasoning, entry.reasoning);
        assert_eq!(restored.timestamp_iso(), entry.timestamp_iso());
        assert_eq!(restored.compute_hash(), entry.compute_hash());
    }

    #[test]
    fn hash_is_stable_and_signature_independent() {
        let mut entry = SemanticLog::new(
            LogEvent::TaskComplete,
            "org/repo#7",
            json!({"pr_number": 100}),
            "all checks passed",
        );
        let before = entry.compute_hash();
        entry.signature = "c2lnbmF0dXJl".to_string();
        assert_eq!(entry.compute_hash(), before);
        assert_eq!(before.len(), 64);
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let entry = SemanticLog::new(LogEvent::TaskReceived, "t1", json!({}), "queued");
        let mut tampered = entry.clone();
        tampered.reasoning = "altered".to_string();
        assert_ne!(entry.compute_hash(), tampered.compute_hash());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Chunk,
    Final,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Start => write!(f, "start"),
            EventKind::Chunk => write!(f, "chunk"),
            EventKind::Final => write!(f, "final"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

/// A sequenced event as it goes over the wire:
/// `{"type": .., "jobId": .., "ts": .., "seq": .., ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Channel the event was published on (a job id or workflow id).
    pub job_id: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    /// Per-channel sequence number, starting at 1.
    pub seq: u64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StreamEvent {
    /// Serialize to the JSON text frame sent to subscribers.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Build an event payload from a JSON object literal. Non-object values are
/// wrapped under `"data"`.
pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

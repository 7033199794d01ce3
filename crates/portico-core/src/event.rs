//! Event values flowing through the bus.
//!
//! Events carry a dotted topic name (`auth.after_register`,
//! `extension.installed`) and an arbitrary JSON payload. Handlers never
//! mutate an event; each dispatch receives its own clone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key identifying the component that published an event.
pub const META_SOURCE: &str = "source";

/// An immutable event value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: String,

    /// Dotted topic name, e.g. `user.created`.
    pub name: String,

    /// Event payload.
    pub payload: serde_json::Value,

    /// Creation timestamp (unix millis).
    pub created_at: i64,

    /// Optional metadata map (source component, correlation ids, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event with the given topic name and payload.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the publishing component.
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with_meta(META_SOURCE, source)
    }

    /// The publishing component, if recorded.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_source_metadata() {
        let event = Event::new("user.created", serde_json::json!({"id": 1}))
            .with_source("auth");

        assert_eq!(event.source(), Some("auth"));
        assert_eq!(event.name, "user.created");
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = Event::new("extension.installed", serde_json::json!({"slug": "x"}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "extension.installed");
        assert_eq!(parsed.id, event.id);
    }
}

//! Events embedded in intake submissions and the log they are appended to.

pub mod writer;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

pub use writer::{spawn_writer, EventQueue, WriteError};

/// Field added to every event naming the submission section it came from.
pub const SOURCE_FIELD: &str = "source";
/// Where an event's own `source` field is moved to.
pub const SHADOWED_SOURCE_FIELD: &str = "_source";

/// One event object tagged with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub source: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Tags `fields` with `source`, moving any existing `source` field aside.
    pub fn new(source: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        if let Some(original) = fields.remove(SOURCE_FIELD) {
            fields.insert(SHADOWED_SOURCE_FIELD.to_string(), original);
        }
        Self {
            source: source.into(),
            fields,
        }
    }
}

/// Extracts events from a `source -> [event objects]` mapping.
///
/// Sources that are not lists and entries that are not objects are skipped.
pub fn extract_events(value: &Value) -> Vec<Event> {
    let Value::Object(sources) = value else {
        debug!("events are not a mapping, skipping");
        return Vec::new();
    };

    let mut events = Vec::new();
    for (source, entries) in sources {
        let Value::Array(entries) = entries else {
            debug!(source = %source, "event source is not a list, skipping");
            continue;
        };
        for entry in entries {
            match entry {
                Value::Object(fields) => events.push(Event::new(source.as_str(), fields.clone())),
                _ => debug!(source = %source, "event is not an object, skipping"),
            }
        }
    }
    events
}

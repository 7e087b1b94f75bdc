//! JSON envelope wrapping retrieved values and accumulated errors.
//!
//! ```text
//! { "data": { "<extension>": { "<source>": <value>, ... } }, "errors": [ ... ] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SERIALIZE_FAILED: &str = r#"{"data":{},"errors":["Failed to serialize envelope"]}"#;

/// Response for one poll request or one push cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Map<String, Value>,
    pub errors: Vec<String>,
}

impl Envelope {
    /// Envelope with an empty data object for `extension`.
    pub fn new(extension: &str) -> Self {
        let mut data = Map::new();
        data.insert(extension.to_string(), Value::Object(Map::new()));
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// Envelope carrying only an error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: Map::new(),
            errors: vec![message.into()],
        }
    }

    /// Write a source value under `data.<extension>.<source>`.
    pub fn insert(&mut self, extension: &str, source: &str, value: Value) {
        let entry = self
            .data
            .entry(extension.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(sources) = entry {
            sources.insert(source.to_string(), value);
        }
    }

    /// Value stored for a source, if any. A stored JSON null is `Some(&Null)`.
    pub fn get(&self, extension: &str, source: &str) -> Option<&Value> {
        self.data.get(extension)?.get(source)
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors_mut(&mut self) -> &mut Vec<String> {
        &mut self.errors
    }

    /// Serialize to the wire JSON text.
    pub fn to_json(&self) -> String {
        // A string-keyed map and a string list always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| SERIALIZE_FAILED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_envelope_shape() {
        let envelope = Envelope::new("win_simple_perf");
        let parsed: Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(parsed, json!({"data": {"win_simple_perf": {}}, "errors": []}));
    }

    #[test]
    fn test_null_is_distinct_from_absent() {
        let mut envelope = Envelope::new("ext");
        envelope.insert("ext", "nothing", Value::Null);

        assert_eq!(envelope.get("ext", "nothing"), Some(&Value::Null));
        assert_eq!(envelope.get("ext", "missing"), None);

        let parsed: Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert!(parsed["data"]["ext"].as_object().unwrap().contains_key("nothing"));
        assert!(!parsed["data"]["ext"].as_object().unwrap().contains_key("missing"));
    }

    #[test]
    fn test_wire_text_reads_back() {
        let mut envelope = Envelope::new("ext");
        envelope.insert("ext", "cpu", json!({"load": 0.5}));
        envelope.push_error("disk offline");

        let read: Envelope = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(read, envelope);
    }

    #[test]
    fn test_error_envelope() {
        let envelope = Envelope::error("Unknown extension foo");
        assert!(envelope.data.is_empty());
        assert_eq!(envelope.errors, vec!["Unknown extension foo"]);
    }
}

//! Subscription filters.
//!
//! A filter is a set of `key == value` pairs evaluated against the top-level
//! fields of a broadcast payload. An empty filter matches every payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Equality predicate over payload fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    /// Create an empty filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required `key == value` pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether the filter has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up the required value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Check whether a payload satisfies every entry of this filter.
    ///
    /// A key missing from the payload never matches, and a payload that is
    /// not a JSON object only matches the empty filter.
    pub fn matches(&self, payload: &Value) -> bool {
        if self.0.is_empty() {
            return true;
        }

        let Some(fields) = payload.as_object() else {
            return false;
        };

        self.0
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_anything() {
        let filter = Filter::new();
        assert!(filter.matches(&json!({"lotId": "lot-001"})));
        assert!(filter.matches(&json!({})));
        assert!(filter.matches(&json!("not an object")));
    }

    #[test]
    fn test_filter_matches_equal_value() {
        let filter = Filter::new().with("lotId", "lot-001");
        assert!(filter.matches(&json!({"lotId": "lot-001", "occupancy": 40})));
    }

    #[test]
    fn test_filter_rejects_different_value() {
        let filter = Filter::new().with("lotId", "lot-001");
        assert!(!filter.matches(&json!({"lotId": "lot-002", "occupancy": 40})));
    }

    #[test]
    fn test_filter_rejects_missing_key() {
        let filter = Filter::new().with("lotId", "lot-001");
        assert!(!filter.matches(&json!({"occupancy": 40})));
        assert!(!filter.matches(&json!([1, 2, 3])));
    }

    #[test]
    fn test_filter_requires_every_entry() {
        let filter = Filter::new().with("lotId", "lot-001").with("level", 2);
        assert!(filter.matches(&json!({"lotId": "lot-001", "level": 2})));
        assert!(!filter.matches(&json!({"lotId": "lot-001", "level": 3})));
    }

    #[test]
    fn test_filter_deserializes_from_object() {
        let filter: Filter = serde_json::from_value(json!({"lotId": "lot-001"})).unwrap();
        assert_eq!(filter.get("lotId"), Some(&json!("lot-001")));
    }
}

use std::collections::BTreeMap;

use serde_json::Value;

use super::decode::Document;

/// Moves every recognized root key out of `doc`, returning `(canonical_path, value)`.
///
/// Iterates the table rather than the document, so the result never depends on
/// document key order.
pub fn classify_root(doc: &mut Document, table: &BTreeMap<String, String>) -> Vec<(String, Value)> {
    let mut matched = Vec::new();
    for (key, path) in table {
        if let Some(value) = doc.remove(key) {
            matched.push((path.clone(), value));
        }
    }
    matched
}

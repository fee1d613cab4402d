use std::collections::BTreeMap;

use serde_json::Value;

use super::record::{MetricRecord, RowBuilder};

/// Field name used when a metric name has no dot at all.
pub const DEFAULT_FIELD: &str = "value";

/// Splits a dotted metric path into `(group, field)`.
///
/// Three or more segments: the first two form the group and the remainder is
/// one opaque field (`system.load.norm.1` -> `system.load`, `norm.1`).
/// Two segments: `(first, second)`. No dot: the whole name with [`DEFAULT_FIELD`].
pub fn group_of(path: &str) -> (&str, &str) {
    let Some(first_dot) = path.find('.') else {
        return (path, DEFAULT_FIELD);
    };

    let rest = &path[first_dot + 1..];
    match rest.find('.') {
        Some(second_dot) => {
            let split = first_dot + 1 + second_dot;
            (&path[..split], &path[split + 1..])
        }
        None => (&path[..first_dot], rest),
    }
}

/// Packs sibling scalars into one wide row per group.
#[derive(Debug, Default)]
pub struct GroupedValues {
    groups: BTreeMap<String, BTreeMap<String, Value>>,
}

impl GroupedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value under its canonical dotted path. A later value for the same
    /// field replaces the earlier one.
    pub fn insert(&mut self, path: &str, value: Value) {
        let (group, field) = group_of(path);
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// One single-row record per group, stamped with the request time and host.
    pub fn into_records(self, time: u64, host: &str) -> Vec<MetricRecord> {
        self.groups
            .into_iter()
            .map(|(group, fields)| {
                RowBuilder::wide(time, host)
                    .fields(fields.iter())
                    .into_record(group)
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for GroupedValues {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut grouped = Self::new();
        for (path, value) in iter {
            grouped.insert(&path, value);
        }
        grouped
    }
}

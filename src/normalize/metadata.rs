use serde_json::Value;
use tracing::debug;

use super::lenient::parse_string;
use super::record::{MetricRecord, RowBuilder};

/// Record name for host identity and host tags.
pub const METADATA_RECORD: &str = "host.metadata";
/// Record name for platform and interpreter versions.
pub const SYSTEM_STATS_RECORD: &str = "host.system_stats";

const TAG_SEPARATOR: &str = ",";
const STATS_SEPARATOR: &str = "-";

/// Maps `meta` and `host-tags` into a single `host.metadata` row.
///
/// List values in `meta` are joined with `,`. Each host-tag group becomes a
/// `tags_<group>` column holding its tags joined with `,`.
pub fn map_metadata(
    time: u64,
    host: &str,
    meta: Option<&Value>,
    host_tags: Option<&Value>,
) -> Option<MetricRecord> {
    let mut row = RowBuilder::wide(time, host);
    let mut populated = false;

    if let Some(meta) = meta {
        match meta {
            Value::Object(fields) => {
                for (name, value) in fields {
                    if let Some(value) = flatten(value, TAG_SEPARATOR) {
                        row = row.field(name, value);
                        populated = true;
                    }
                }
            }
            _ => debug!("meta is not a mapping, skipping"),
        }
    }

    if let Some(host_tags) = host_tags {
        match host_tags {
            Value::Object(groups) => {
                for (group, tags) in groups {
                    if let Some(tags) = flatten(tags, TAG_SEPARATOR) {
                        row = row.field(&format!("tags_{group}"), tags);
                        populated = true;
                    }
                }
            }
            _ => debug!("host-tags is not a mapping, skipping"),
        }
    }

    populated.then(|| row.into_record(METADATA_RECORD))
}

/// Maps `systemStats` into a `host.system_stats` row. Version lists such as
/// `nixV` are joined with `-`.
pub fn map_system_stats(time: u64, host: &str, stats: &Value) -> Option<MetricRecord> {
    let Value::Object(fields) = stats else {
        debug!("systemStats is not a mapping, skipping");
        return None;
    };

    let mut row = RowBuilder::wide(time, host);
    let mut populated = false;
    for (name, value) in fields {
        if let Some(value) = flatten(value, STATS_SEPARATOR) {
            row = row.field(name, value);
            populated = true;
        }
    }

    populated.then(|| row.into_record(SYSTEM_STATS_RECORD))
}

/// Collapses a value into something a single column can hold. Scalars pass
/// through, lists are joined, objects keep their JSON text and nulls are dropped.
fn flatten(value: &Value, separator: &str) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(Value::from(join(items, separator))),
        Value::Object(_) => Some(Value::from(value.to_string())),
        scalar => Some(scalar.clone()),
    }
}

fn join(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Array(nested) => join(nested, separator),
            other => parse_string(Some(other)).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_map_metadata_joins_lists_with_commas() {
        let meta = json!({
            "socket-fqdn": "web-1.example.com",
            "timezones": ["UTC", "CET"],
            "hostname": "web-1",
        });
        let host_tags = json!({"system": ["env:prod", "role:web"], "google cloud platform": []});

        let record = map_metadata(1, "web-1", Some(&meta), Some(&host_tags)).expect("record");

        assert_eq!(record.name, "host.metadata");
        assert_eq!(record.value(0, "timezones"), Some(&json!("UTC,CET")));
        assert_eq!(record.value(0, "socket-fqdn"), Some(&json!("web-1.example.com")));
        assert_eq!(record.value(0, "_hostname"), Some(&json!("web-1")));
        assert_eq!(record.value(0, "tags_system"), Some(&json!("env:prod,role:web")));
        assert_eq!(record.value(0, "tags_google cloud platform"), Some(&json!("")));
        assert_eq!(record.rows[0].len(), record.columns.len());
    }

    #[test]
    fn test_map_metadata_absent() {
        assert!(map_metadata(1, "h", None, None).is_none());
        assert!(map_metadata(1, "h", Some(&json!({})), Some(&json!("junk"))).is_none());
    }

    #[test]
    fn test_map_system_stats_joins_with_hyphen() {
        let stats = json!({
            "machine": "x86_64",
            "cpuCores": 4,
            "nixV": ["debian", "8.1", ""],
            "macV": ["", ["", "", ""], ""],
            "fbsdV": null,
        });

        let record = map_system_stats(1, "h", &stats).expect("record");

        assert_eq!(record.name, "host.system_stats");
        assert_eq!(record.value(0, "nixV"), Some(&json!("debian-8.1-")));
        assert_eq!(record.value(0, "macV"), Some(&json!("----")));
        assert_eq!(record.value(0, "cpuCores"), Some(&json!(4)));
        assert!(record.column_index("fbsdV").is_none());
    }
}

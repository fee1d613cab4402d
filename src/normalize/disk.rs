use serde_json::Value;
use tracing::debug;

use super::lenient::{lenient_i64, lenient_string, percent_fraction};
use super::record::{MetricRecord, HOST_COLUMN, TIME_COLUMN};

/// Record name for filesystem usage.
pub const DISK_RECORD: &str = "system.disk";
/// Record name for inode usage.
pub const INODE_RECORD: &str = "system.fs.inodes";

/// Maps a disk or inode usage table into one record with a row per device.
///
/// Each entry is a positional tuple laid out as `columns`. Size columns are
/// parsed as integers and `in_use` arrives as a percent string that becomes a
/// 0..1 fraction. Entries that are not lists are skipped.
pub fn map_disk_table(
    name: &str,
    time: u64,
    host: &str,
    columns: &[String],
    table: &Value,
) -> Option<MetricRecord> {
    let Value::Array(entries) = table else {
        debug!(record = name, "disk table is not a list, skipping");
        return None;
    };

    let mut record_columns = vec![TIME_COLUMN.to_string(), HOST_COLUMN.to_string()];
    record_columns.extend(columns.iter().cloned());
    let mut record = MetricRecord::new(name, record_columns);

    for entry in entries {
        let Value::Array(fields) = entry else {
            debug!(record = name, "disk entry is not a tuple, skipping");
            continue;
        };

        let mut row = Vec::with_capacity(columns.len() + 2);
        row.push(Value::from(time));
        row.push(Value::from(host));
        for (idx, column) in columns.iter().enumerate() {
            row.push(disk_field(column, fields.get(idx)));
        }
        record.push_values(row);
    }

    if record.is_empty() {
        return None;
    }
    Some(record)
}

fn disk_field(column: &str, raw: Option<&Value>) -> Value {
    match column {
        "total" | "used" | "free" => Value::from(lenient_i64(raw)),
        "in_use" => Value::from(percent_fraction(raw)),
        _ => Value::from(lenient_string(raw)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::tables::MappingTables;

    fn columns() -> Vec<String> {
        MappingTables::default().disk_columns
    }

    #[test]
    fn test_map_disk_table() {
        let table = json!([
            ["/dev/sda1", "41284928", "17336680", "21850712", "42%", "/"],
            ["tmpfs", 1024, 0, 1024, "0%", "/run"],
        ]);

        let record =
            map_disk_table(DISK_RECORD, 1_000, "web-1", &columns(), &table).expect("record");

        assert_eq!(record.name, "system.disk");
        assert_eq!(
            record.columns,
            vec!["time", "hostname", "device", "total", "used", "free", "in_use", "mount"]
        );
        assert_eq!(record.rows.len(), 2);
        assert_eq!(record.value(0, "device"), Some(&json!("/dev/sda1")));
        assert_eq!(record.value(0, "total"), Some(&json!(41_284_928)));
        assert_eq!(record.value(0, "in_use"), Some(&json!(0.42)));
        assert_eq!(record.value(1, "in_use"), Some(&json!(0.0)));
        assert_eq!(record.value(1, "mount"), Some(&json!("/run")));
    }

    #[test]
    fn test_map_disk_table_lenient_fields() {
        let table = json!([["/dev/sdb", "lots", null, "1", "n/a%"]]);

        let record =
            map_disk_table(INODE_RECORD, 1, "h", &columns(), &table).expect("record");

        assert_eq!(record.rows[0].len(), record.columns.len());
        assert_eq!(record.value(0, "total"), Some(&json!(0)));
        assert_eq!(record.value(0, "used"), Some(&json!(0)));
        assert_eq!(record.value(0, "in_use"), Some(&json!(0.0)));
        assert_eq!(record.value(0, "mount"), Some(&json!("")));
    }

    #[test]
    fn test_map_disk_table_skips_non_tuples() {
        let table = json!(["garbage", {"device": "sda"}]);
        assert!(map_disk_table(DISK_RECORD, 1, "h", &columns(), &table).is_none());
        assert!(map_disk_table(DISK_RECORD, 1, "h", &columns(), &json!({})).is_none());
    }
}

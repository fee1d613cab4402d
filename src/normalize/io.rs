use serde_json::Value;
use tracing::debug;

use super::lenient::lenient_f64;
use super::record::{MetricRecord, HOST_COLUMN, TIME_COLUMN};

/// Record name for per-device IO statistics.
pub const IO_RECORD: &str = "system.io";

/// Maps `device -> {raw iostat field -> value}` into one record with a row per device.
///
/// `fields` lists `(canonical column, raw field name)` pairs in output order.
/// Every value is parsed as `f64`; missing or unparseable fields become `0.0`.
pub fn map_io_stats(
    time: u64,
    host: &str,
    fields: &[(String, String)],
    stats: &Value,
) -> Option<MetricRecord> {
    let Value::Object(devices) = stats else {
        debug!("io stats are not a mapping, skipping");
        return None;
    };

    let mut columns = vec![
        TIME_COLUMN.to_string(),
        HOST_COLUMN.to_string(),
        "device".to_string(),
    ];
    columns.extend(fields.iter().map(|(canonical, _)| canonical.clone()));
    let mut record = MetricRecord::new(IO_RECORD, columns);

    for (device, raw) in devices {
        let Value::Object(raw) = raw else {
            debug!(device = %device, "io stats entry is not a mapping, skipping");
            continue;
        };

        let mut row = Vec::with_capacity(fields.len() + 3);
        row.push(Value::from(time));
        row.push(Value::from(host));
        row.push(Value::from(device.as_str()));
        for (_, raw_name) in fields {
            row.push(Value::from(lenient_f64(raw.get(raw_name))));
        }
        record.push_values(row);
    }

    if record.is_empty() {
        return None;
    }
    Some(record)
}

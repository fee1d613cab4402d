use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::lenient::{lenient_f64, lenient_i64, lenient_string};
use super::record::{MetricRecord, HOST_COLUMN, TIME_COLUMN};

/// Record name for aggregated process snapshots.
pub const PROCESS_RECORD: &str = "processes";
/// Bucket and family shared by every kernel thread.
pub const KERNEL_FAMILY: &str = "kernel";

const COMMAND_COLUMN: &str = "command";

/// Family label of a command line: basename of the executable, or `kernel`
/// for bracketed kernel threads.
pub fn process_family(command: &str) -> &str {
    if command.starts_with('[') {
        return KERNEL_FAMILY;
    }
    let executable = match command.find(|c| c == ' ' || c == '\t') {
        Some(idx) if idx > 0 => &command[..idx],
        _ => command,
    };
    match executable.rfind('/') {
        Some(idx) => &executable[idx + 1..],
        None => executable,
    }
}

/// Bucket key: the literal command, with all kernel threads collapsed.
pub fn aggregation_key(command: &str) -> &str {
    if command.starts_with('[') {
        KERNEL_FAMILY
    } else {
        command
    }
}

#[derive(Debug)]
struct ProcessBucket {
    family: String,
    count: u64,
    latest: Vec<Value>,
    pct_cpu: f64,
    pct_mem: f64,
}

/// Aggregates a `{host, processes: [...]}` snapshot into one row per bucket.
///
/// A bucket keeps the most recent sample folded into it plus a running count,
/// and is emitted only when its cpu or memory share reaches `threshold`.
pub fn map_processes(
    time: u64,
    fallback_host: &str,
    columns: &[String],
    threshold: f64,
    snapshot: &Value,
) -> Option<MetricRecord> {
    let Value::Object(snapshot) = snapshot else {
        debug!("process snapshot is not a mapping, skipping");
        return None;
    };
    let Some(Value::Array(processes)) = snapshot.get("processes") else {
        debug!("process snapshot has no process list, skipping");
        return None;
    };
    let host = match snapshot.get("host").and_then(Value::as_str) {
        Some(host) if !host.is_empty() => host,
        _ => fallback_host,
    };

    let command_idx = columns.iter().position(|c| c == COMMAND_COLUMN);
    let mut buckets: BTreeMap<String, ProcessBucket> = BTreeMap::new();

    for process in processes {
        let Value::Array(fields) = process else {
            debug!("process entry is not a tuple, skipping");
            continue;
        };

        let command = command_idx
            .map(|idx| lenient_string(fields.get(idx)))
            .unwrap_or_default();
        let mut pct_cpu = 0.0;
        let mut pct_mem = 0.0;
        let mut latest = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let value = process_field(column, fields.get(idx));
            match column.as_str() {
                "pct_cpu" => pct_cpu = value.as_f64().unwrap_or_default(),
                "pct_mem" => pct_mem = value.as_f64().unwrap_or_default(),
                _ => {}
            }
            latest.push(value);
        }

        let bucket = buckets
            .entry(aggregation_key(&command).to_string())
            .or_insert_with(|| ProcessBucket {
                family: process_family(&command).to_string(),
                count: 0,
                latest: Vec::new(),
                pct_cpu: 0.0,
                pct_mem: 0.0,
            });
        bucket.count += 1;
        bucket.latest = latest;
        bucket.pct_cpu = pct_cpu;
        bucket.pct_mem = pct_mem;
    }

    let mut record_columns = vec![
        TIME_COLUMN.to_string(),
        HOST_COLUMN.to_string(),
        "family".to_string(),
        "count".to_string(),
    ];
    record_columns.extend(columns.iter().cloned());
    let mut record = MetricRecord::new(PROCESS_RECORD, record_columns);

    let total = buckets.len();
    for (key, bucket) in buckets {
        if bucket.pct_cpu < threshold && bucket.pct_mem < threshold {
            continue;
        }
        debug!(bucket = %key, count = bucket.count, "emitting process bucket");
        let mut row = Vec::with_capacity(columns.len() + 4);
        row.push(Value::from(time));
        row.push(Value::from(host));
        row.push(Value::from(bucket.family));
        row.push(Value::from(bucket.count));
        row.extend(bucket.latest);
        record.push_values(row);
    }
    debug!(
        buckets = total,
        emitted = record.rows.len(),
        threshold,
        "aggregated process snapshot"
    );

    if record.is_empty() {
        return None;
    }
    Some(record)
}

fn process_field(column: &str, raw: Option<&Value>) -> Value {
    match column {
        "pid" | "vsz" | "rss" => Value::from(lenient_i64(raw)),
        "pct_cpu" | "pct_mem" => Value::from(lenient_f64(raw)),
        _ => Value::from(lenient_string(raw)),
    }
}

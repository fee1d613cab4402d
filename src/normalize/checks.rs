use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::lenient::{epoch_millis, lenient_i64, lenient_string, parse_string};
use super::record::{explode_tags, MetricRecord, RowBuilder};

/// Record name for agent check instance results.
pub const AGENT_CHECK_RECORD: &str = "agent.checks";
/// Record name for service check runs.
pub const SERVICE_CHECK_RECORD: &str = "service.checks";

/// One service check run, as posted to `/api/v1/check_run` or embedded in an
/// intake submission under `service_checks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceCheck {
    #[serde(default)]
    pub check: String,
    #[serde(default)]
    pub host_name: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Maps `[[check, source_type, instance_id, status, message, metadata?], ...]`
/// into one record per check instance.
pub fn map_agent_checks(time: u64, host: &str, checks: &Value) -> Vec<MetricRecord> {
    let Value::Array(entries) = checks else {
        debug!("agent checks are not a list, skipping");
        return Vec::new();
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(tuple) = entry else {
            debug!("agent check entry is not a tuple, skipping");
            continue;
        };

        let mut row = RowBuilder::wide(time, host)
            .field("check", Value::from(lenient_string(tuple.first())))
            .field("source_type", Value::from(lenient_string(tuple.get(1))))
            .field("instance_id", Value::from(lenient_i64(tuple.get(2))))
            .field("status", Value::from(lenient_string(tuple.get(3))))
            .field("message", Value::from(check_message(tuple.get(4))));

        if let Some(Value::Object(metadata)) = tuple.get(5) {
            for (key, value) in metadata {
                match parse_string(Some(value)) {
                    Ok(value) => row = row.field(key, Value::from(value)),
                    Err(e) => debug!(key = %key, error = %e, "dropping check metadata"),
                }
            }
        }

        records.push(row.into_record(AGENT_CHECK_RECORD));
    }
    records
}

/// Multi-line messages arrive as a list of lines.
fn check_message(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| lenient_string(Some(line)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => lenient_string(other),
    }
}

/// Decodes the `service_checks` entry of an intake submission. Entries that
/// are not check objects are skipped.
pub fn service_checks_from_value(value: &Value) -> Vec<ServiceCheck> {
    let Value::Array(entries) = value else {
        debug!("service checks are not a list, skipping");
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match ServiceCheck::deserialize(entry) {
            Ok(check) => Some(check),
            Err(e) => {
                debug!(error = %e, "skipping malformed service check");
                None
            }
        })
        .collect()
}

/// Maps service check runs, one record per run.
///
/// `host_name` fills the host slot and `timestamp` seconds become
/// milliseconds; the fallbacks apply when either is missing.
pub fn map_service_checks(
    checks: &[ServiceCheck],
    fallback_time: u64,
    fallback_host: &str,
) -> Vec<MetricRecord> {
    checks
        .iter()
        .map(|check| {
            let time = epoch_millis(check.timestamp.map(Value::from).as_ref())
                .unwrap_or(fallback_time);
            let host = check
                .host_name
                .as_deref()
                .filter(|h| !h.is_empty())
                .unwrap_or(fallback_host);
            let tags = explode_tags(check.tags.iter().flatten().map(String::as_str));

            RowBuilder::wide(time, host)
                .field("check", Value::from(check.check.as_str()))
                .field("status", Value::from(check.status.unwrap_or_default()))
                .field(
                    "message",
                    Value::from(check.message.clone().unwrap_or_default()),
                )
                .tags(&tags)
                .into_record(SERVICE_CHECK_RECORD)
        })
        .collect()
}

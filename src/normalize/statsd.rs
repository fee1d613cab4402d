use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::lenient::epoch_millis;
use super::record::{
    explode_tags, MetricRecord, RowBuilder, HOST_COLUMN, TIME_COLUMN, VALUE_COLUMN,
};

/// Prefix of every record produced from a statsd series.
pub const STATSD_PREFIX: &str = "statsd.";

/// One series of the `/api/v1/series` envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsdSeries {
    #[serde(default)]
    pub metric: String,
    /// `[epoch_seconds, value]` pairs.
    #[serde(default)]
    pub points: Vec<Vec<Value>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Maps statsd series in submission order, one record per series.
///
/// A series without a host inherits the last host seen in an earlier series.
/// Hosts never flow backwards, so leading hostless series keep an empty host
/// unless a `hostname` tag provides one.
pub fn map_series(series: &[StatsdSeries]) -> Vec<MetricRecord> {
    let mut sticky_host = String::new();
    let mut records = Vec::with_capacity(series.len());

    for s in series {
        if let Some(host) = s.host.as_deref().filter(|h| !h.is_empty()) {
            sticky_host = host.to_string();
        }
        if s.points.is_empty() {
            debug!(metric = %s.metric, "statsd series without points, skipping");
            continue;
        }

        let tags = explode_tags(s.tags.iter().flatten().map(String::as_str));
        let interval = Value::from(s.interval.unwrap_or(0.0));
        let kind = Value::from(s.kind.clone().unwrap_or_default());

        let mut record = MetricRecord::new(
            format!("{STATSD_PREFIX}{}", s.metric),
            vec![
                TIME_COLUMN.to_string(),
                VALUE_COLUMN.to_string(),
                HOST_COLUMN.to_string(),
            ],
        );
        for point in &s.points {
            let time = epoch_millis(point.first()).unwrap_or_else(|| {
                debug!(metric = %s.metric, "statsd point timestamp unusable, using 0");
                0
            });
            let value = point.get(1).cloned().unwrap_or(Value::Null);
            record.push_row(
                RowBuilder::narrow(time, value, &sticky_host)
                    .field("metric_interval", interval.clone())
                    .field("metric_type", kind.clone())
                    .tags(&tags)
                    .finish(),
            );
        }
        records.push(record);
    }

    records
}

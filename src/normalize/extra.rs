use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::group::group_of;
use super::lenient::{epoch_millis, parse_string};
use super::record::{
    explode_tags, MetricRecord, RowBuilder, Tags, HOST_COLUMN, TIME_COLUMN, VALUE_COLUMN,
};

/// Key of the tag attribute carrying `"key:value"` strings.
const TAG_LIST_KEY: &str = "tags";

#[derive(Debug)]
struct Sample {
    time: u64,
    value: Value,
    tags: Tags,
}

#[derive(Debug)]
struct FieldSamples {
    name: String,
    group: String,
    field: String,
    first_seen: usize,
    samples: Vec<Sample>,
}

/// Maps the `[[name, epoch_seconds, value, {attributes}], ...]` list.
///
/// A metric observed once folds into its group's wide row. One observed more
/// than once becomes its own narrow record named after the metric, one row per
/// sample. Distinct names can share a `(group, field)` slot (`uptime` and
/// `uptime.value`); only the first to arrive takes the slot, the others get
/// narrow records of their own.
pub fn map_extra_metrics(fallback_time: u64, host: &str, metrics: &Value) -> Vec<MetricRecord> {
    let Value::Array(entries) = metrics else {
        debug!("extra metrics are not a list, skipping");
        return Vec::new();
    };

    let mut metrics_by_name: BTreeMap<String, FieldSamples> = BTreeMap::new();
    for (seq, entry) in entries.iter().enumerate() {
        let Value::Array(tuple) = entry else {
            debug!("extra metric entry is not a tuple, skipping");
            continue;
        };
        let Some(name) = tuple.first().and_then(Value::as_str) else {
            debug!("extra metric without a name, skipping");
            continue;
        };
        let time = epoch_millis(tuple.get(1)).unwrap_or_else(|| {
            debug!(metric = name, "extra metric timestamp unusable, using request time");
            fallback_time
        });
        let value = tuple.get(2).cloned().unwrap_or(Value::Null);
        let tags = sample_tags(tuple.get(3));

        metrics_by_name
            .entry(name.to_string())
            .or_insert_with(|| {
                let (group, field) = group_of(name);
                FieldSamples {
                    name: name.to_string(),
                    group: group.to_string(),
                    field: field.to_string(),
                    first_seen: seq,
                    samples: Vec::new(),
                }
            })
            .samples
            .push(Sample { time, value, tags });
    }

    let mut ordered: Vec<FieldSamples> = metrics_by_name.into_values().collect();
    ordered.sort_by_key(|s| s.first_seen);

    let mut wide: BTreeMap<String, Vec<(String, FieldSamples)>> = BTreeMap::new();
    let mut narrow: Vec<FieldSamples> = Vec::new();
    for samples in ordered {
        let members = wide.entry(samples.group.clone()).or_default();
        let slot_taken = members.iter().any(|(field, _)| *field == samples.field);
        if samples.samples.len() == 1 && !slot_taken {
            members.push((samples.field.clone(), samples));
        } else {
            narrow.push(samples);
        }
    }
    wide.retain(|_, members| !members.is_empty());

    let mut records = Vec::with_capacity(wide.len() + narrow.len());
    for (group, members) in wide {
        records.push(wide_record(&group, host, members));
    }

    for series in narrow {
        debug!(
            metric = %series.name,
            samples = series.samples.len(),
            "extra metric fanned out to its own series"
        );
        records.push(narrow_record(host, series));
    }

    records
}

fn wide_record(group: &str, host: &str, members: Vec<(String, FieldSamples)>) -> MetricRecord {
    let mut time = None;
    let mut values = BTreeMap::new();
    let mut tags = Tags::new();
    // Members are in arrival order, so later tags overwrite earlier ones.
    for (field, series) in members {
        for sample in series.samples {
            time.get_or_insert(sample.time);
            values.insert(field.clone(), sample.value);
            tags.extend(sample.tags);
        }
    }

    RowBuilder::wide(time.unwrap_or_default(), host)
        .fields(values.iter())
        .tags(&tags)
        .into_record(group)
}

fn narrow_record(host: &str, series: FieldSamples) -> MetricRecord {
    let mut record = MetricRecord::new(
        series.name,
        vec![
            TIME_COLUMN.to_string(),
            VALUE_COLUMN.to_string(),
            HOST_COLUMN.to_string(),
        ],
    );
    for sample in series.samples {
        record.push_row(
            RowBuilder::narrow(sample.time, sample.value, host)
                .tags(&sample.tags)
                .finish(),
        );
    }
    record
}

fn sample_tags(raw: Option<&Value>) -> Tags {
    let Some(Value::Object(attributes)) = raw else {
        return Tags::new();
    };

    let mut tags = Tags::new();
    for (key, value) in attributes {
        if key == TAG_LIST_KEY {
            if let Value::Array(list) = value {
                tags.extend(explode_tags(list.iter().filter_map(Value::as_str)));
            }
            continue;
        }
        match parse_string(Some(value)) {
            Ok(value) => {
                tags.insert(key.clone(), value);
            }
            Err(e) => debug!(tag = %key, error = %e, "dropping tag"),
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn find<'a>(records: &'a [MetricRecord], name: &str) -> &'a MetricRecord {
        records
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("missing record {name}"))
    }

    #[test]
    fn test_single_samples_fold_into_wide_row() {
        let metrics = json!([
            ["nginx.net.conn_dropped", 1_700_000_000, 0, {"tags": ["env:prod"]}],
            ["nginx.net.connections", 1_700_000_001, 12, {"device_name": "eth0"}],
        ]);

        let records = map_extra_metrics(0, "web-1", &metrics);

        assert_eq!(records.len(), 1);
        let nginx = find(&records, "nginx.net");
        assert_eq!(
            nginx.columns,
            vec!["time", "hostname", "conn_dropped", "connections", "device_name", "env"]
        );
        assert_eq!(nginx.value(0, "time"), Some(&json!(1_700_000_000_000u64)));
        assert_eq!(nginx.value(0, "connections"), Some(&json!(12)));
        assert_eq!(nginx.value(0, "env"), Some(&json!("prod")));
    }

    #[test]
    fn test_repeated_samples_fan_out() {
        let metrics = json!([
            ["app.requests.count", 10, 1, {"tags": ["route:/a"]}],
            ["app.requests.count", 20, 2, {"tags": ["route:/b"]}],
            ["app.requests.latency", 10, 0.5, {}],
        ]);

        let records = map_extra_metrics(0, "h", &metrics);

        assert_eq!(records.len(), 2);
        let wide = find(&records, "app.requests");
        assert_eq!(wide.columns, vec!["time", "hostname", "latency"]);
        assert!(wide.column_index("count").is_none());

        let narrow = find(&records, "app.requests.count");
        assert_eq!(narrow.columns, vec!["time", "value", "hostname", "route"]);
        assert_eq!(
            narrow.rows,
            vec![
                vec![json!(10_000), json!(1), json!("h"), json!("/a")],
                vec![json!(20_000), json!(2), json!("h"), json!("/b")],
            ]
        );
    }

    #[test]
    fn test_fan_out_with_heterogeneous_tags() {
        let metrics = json!([
            ["queue.depth", 1, 3, {"tags": ["queue:a"]}],
            ["queue.depth", 2, 4, {"tags": ["shard:7"]}],
        ]);

        let records = map_extra_metrics(0, "h", &metrics);
        let narrow = find(&records, "queue.depth");

        assert_eq!(narrow.columns, vec!["time", "value", "hostname", "queue", "shard"]);
        for row in &narrow.rows {
            assert_eq!(row.len(), narrow.columns.len());
        }
        assert_eq!(narrow.value(1, "queue"), Some(&Value::Null));
    }

    #[test]
    fn test_hostname_tag_overrides_and_reserved_tags_rename() {
        let metrics = json!([
            ["redis.mem.used", 1, 10, {"hostname": "cache-1", "tags": ["time:now"]}],
        ]);

        let records = map_extra_metrics(0, "web-1", &metrics);
        let redis = find(&records, "redis.mem");

        assert_eq!(redis.value(0, "hostname"), Some(&json!("cache-1")));
        assert_eq!(redis.value(0, "_time"), Some(&json!("now")));
        assert_eq!(redis.value(0, "time"), Some(&json!(1_000)));
    }

    #[test]
    fn test_distinct_names_sharing_a_slot_stay_separate() {
        let metrics = json!([
            ["uptime", 1, 100, {}],
            ["uptime.value", 2, 200, {}],
        ]);

        let records = map_extra_metrics(0, "h", &metrics);

        assert_eq!(records.len(), 2);
        let wide = find(&records, "uptime");
        assert_eq!(wide.rows.len(), 1);
        assert_eq!(wide.value(0, "value"), Some(&json!(100)));
        assert_eq!(wide.value(0, "time"), Some(&json!(1_000)));

        let narrow = find(&records, "uptime.value");
        assert_eq!(narrow.columns, vec!["time", "value", "hostname"]);
        assert_eq!(narrow.rows.len(), 1);
        assert_eq!(narrow.value(0, "value"), Some(&json!(200)));
        assert_eq!(narrow.value(0, "time"), Some(&json!(2_000)));
    }

    #[test]
    fn test_garbage_entries_are_skipped() {
        let metrics = json!([
            "nope",
            [42, 1, 1, {}],
            ["ok.metric", "not-a-time", 1, null],
        ]);

        let records = map_extra_metrics(99, "h", &metrics);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");
        assert_eq!(records[0].value(0, "metric"), Some(&json!(1)));
        assert_eq!(records[0].value(0, "time"), Some(&json!(99)));
    }
}

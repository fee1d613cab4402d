//! Mapping of agent submissions into named time-series records.
//!
//! A submission is decoded into a [`Document`] and handed to the
//! [`Normalizer`], which removes every key it understands and turns it into
//! [`MetricRecord`]s. Whatever is left afterwards is reported as residue so the
//! tables can be extended when the agent payload changes.

pub mod checks;
pub mod decode;
pub mod disk;
pub mod extra;
pub mod group;
pub mod io;
pub mod lenient;
pub mod metadata;
pub mod process;
pub mod record;
pub mod root;
pub mod statsd;
pub mod tables;

use serde_json::Value;
use tracing::{debug, info};

use crate::events::{extract_events, Event};

pub use checks::ServiceCheck;
pub use decode::{decode_check_runs, decode_document, decode_series, DecodeError, Document};
pub use group::{group_of, GroupedValues};
pub use record::{MetricRecord, Row, RowBuilder, Tags};
pub use statsd::StatsdSeries;
pub use tables::MappingTables;

/// Document keys holding request context rather than metrics.
const HOST_KEY: &str = "internalHostname";
const TIMESTAMP_KEY: &str = "collection_timestamp";
const API_KEY_KEY: &str = "apiKey";

/// Default share of cpu or memory a process bucket needs to be reported.
pub const DEFAULT_PROCESS_THRESHOLD: f64 = 0.1;

/// Everything produced from one intake submission.
#[derive(Debug, Default)]
pub struct MappedIntake {
    /// Request host, `internalHostname` or empty.
    pub host: String,
    /// Request time in epoch milliseconds.
    pub timestamp: u64,
    pub records: Vec<MetricRecord>,
    pub events: Vec<Event>,
    /// Keys no mapper recognized.
    pub residue: Vec<String>,
}

/// Maps decoded submissions using a fixed set of classification tables.
#[derive(Debug, Clone)]
pub struct Normalizer {
    tables: MappingTables,
    process_threshold: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(MappingTables::default(), DEFAULT_PROCESS_THRESHOLD)
    }
}

impl Normalizer {
    pub fn new(tables: MappingTables, process_threshold: f64) -> Self {
        Self {
            tables,
            process_threshold,
        }
    }

    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    pub fn process_threshold(&self) -> f64 {
        self.process_threshold
    }

    /// Maps an intake submission, stamping rows that carry no time of their
    /// own with `collection_timestamp` or the current time.
    pub fn map_intake(&self, doc: Document) -> MappedIntake {
        self.map_intake_at(doc, now_millis())
    }

    /// [`Normalizer::map_intake`] with an explicit fallback time.
    pub fn map_intake_at(&self, mut doc: Document, now: u64) -> MappedIntake {
        let host = match doc.remove(HOST_KEY) {
            Some(Value::String(host)) => host,
            _ => String::new(),
        };
        let timestamp = lenient::epoch_millis(doc.remove(TIMESTAMP_KEY).as_ref()).unwrap_or(now);
        doc.remove(API_KEY_KEY);

        debug!(host = %host, timestamp, keys = doc.len(), "mapping intake submission");

        let mut records: Vec<MetricRecord> = Vec::new();

        let grouped: GroupedValues = root::classify_root(&mut doc, &self.tables.root_metrics)
            .into_iter()
            .collect();
        records.extend(grouped.into_records(timestamp, &host));

        if let Some(snapshot) = doc.remove("processes") {
            records.extend(process::map_processes(
                timestamp,
                &host,
                &self.tables.process_columns,
                self.process_threshold,
                &snapshot,
            ));
        }
        if let Some(table) = doc.remove("diskUsage") {
            records.extend(disk::map_disk_table(
                disk::DISK_RECORD,
                timestamp,
                &host,
                &self.tables.disk_columns,
                &table,
            ));
        }
        if let Some(table) = doc.remove("inodes") {
            records.extend(disk::map_disk_table(
                disk::INODE_RECORD,
                timestamp,
                &host,
                &self.tables.disk_columns,
                &table,
            ));
        }
        if let Some(stats) = doc.remove("ioStats") {
            records.extend(io::map_io_stats(
                timestamp,
                &host,
                &self.tables.io_fields,
                &stats,
            ));
        }
        if let Some(metrics) = doc.remove("metrics") {
            records.extend(extra::map_extra_metrics(timestamp, &host, &metrics));
        }

        let meta = doc.remove("meta");
        let host_tags = doc.remove("host-tags");
        records.extend(metadata::map_metadata(
            timestamp,
            &host,
            meta.as_ref(),
            host_tags.as_ref(),
        ));
        if let Some(stats) = doc.remove("systemStats") {
            records.extend(metadata::map_system_stats(timestamp, &host, &stats));
        }

        if let Some(checks) = doc.remove("agent_checks") {
            records.extend(checks::map_agent_checks(timestamp, &host, &checks));
        }
        if let Some(runs) = doc.remove("service_checks") {
            let runs = checks::service_checks_from_value(&runs);
            records.extend(checks::map_service_checks(&runs, timestamp, &host));
        }

        let events = doc
            .remove("events")
            .map(|events| extract_events(&events))
            .unwrap_or_default();

        let residue = report_residue(&doc);

        MappedIntake {
            host,
            timestamp,
            records,
            events,
            residue,
        }
    }

    /// Maps a statsd series envelope.
    pub fn map_series(&self, series: &[StatsdSeries]) -> Vec<MetricRecord> {
        statsd::map_series(series)
    }

    /// Maps service check runs posted on their own.
    pub fn map_check_runs(&self, runs: &[ServiceCheck]) -> Vec<MetricRecord> {
        checks::map_service_checks(runs, now_millis(), "")
    }
}

fn report_residue(doc: &Document) -> Vec<String> {
    let residue: Vec<String> = doc.keys().cloned().collect();
    if residue.is_empty() {
        return residue;
    }

    info!(keys = ?residue, "unmapped keys in submission");
    if tracing::enabled!(tracing::Level::DEBUG) {
        match serde_json::to_string_pretty(doc) {
            Ok(dump) => debug!(residue = %dump, "unmapped submission content"),
            Err(e) => debug!(error = %e, "failed to render unmapped content"),
        }
    }
    residue
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

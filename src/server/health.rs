use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "ddhouse";

/// Prometheus metrics for ingestion, forwarding and the event log.
///
/// All metrics use the "ddhouse" namespace and live in a private registry
/// that is rendered on `GET /metrics`.
pub struct HealthMetrics {
    registry: Registry,

    // === Ingest ===
    /// Submissions by route and acknowledgment (ok/failed/forbidden/status_check).
    pub requests: CounterVec,
    /// Submissions rejected before mapping, by reason.
    pub decode_errors: CounterVec,
    /// Records produced by the mappers, by route.
    pub records_mapped: CounterVec,
    /// Document keys no mapper recognized.
    pub residue_keys: Counter,

    // === Forwarding ===
    /// Batches handed to the sink, by outcome (ok/error).
    pub forward_batches: CounterVec,
    /// Forwarding failures by error type.
    pub forward_errors: CounterVec,
    /// Time to POST one batch to the sink.
    pub forward_duration: Histogram,
    /// Database bootstrap outcome (1=ready, 0=not ready).
    pub sink_ready: Gauge,

    // === Event log ===
    /// Events accepted onto the writer queue.
    pub events_enqueued: Counter,
    /// Events appended to the log.
    pub events_written: Counter,
    /// Failed appends by error type.
    pub event_write_errors: CounterVec,
    /// Events waiting in the writer queue.
    pub event_queue_length: IntGauge,
    /// Writer queue capacity.
    pub event_queue_capacity: IntGauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = CounterVec::new(
            Opts::new("requests_total", "Total submissions by route and acknowledgment.")
                .namespace(NAMESPACE),
            &["route", "status"],
        )?;
        let decode_errors = CounterVec::new(
            Opts::new(
                "decode_errors_total",
                "Total submissions that could not be decoded, by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let records_mapped = CounterVec::new(
            Opts::new("records_mapped_total", "Total records produced by route.")
                .namespace(NAMESPACE),
            &["route"],
        )?;
        let residue_keys = Counter::with_opts(
            Opts::new(
                "residue_keys_total",
                "Total submission keys left unmapped.",
            )
            .namespace(NAMESPACE),
        )?;

        let forward_batches = CounterVec::new(
            Opts::new("forward_batches_total", "Total batches forwarded by outcome.")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let forward_errors = CounterVec::new(
            Opts::new(
                "forward_errors_total",
                "Total forwarding failures by error type.",
            )
            .namespace(NAMESPACE),
            &["error_type"],
        )?;
        let forward_duration = Histogram::with_opts(
            HistogramOpts::new(
                "forward_duration_seconds",
                "Time to submit one batch to the sink.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let sink_ready = Gauge::with_opts(
            Opts::new(
                "sink_ready",
                "Whether the sink database was found or created (1=yes, 0=no).",
            )
            .namespace(NAMESPACE),
        )?;

        let events_enqueued = Counter::with_opts(
            Opts::new("events_enqueued_total", "Total events queued for the log.")
                .namespace(NAMESPACE),
        )?;
        let events_written = Counter::with_opts(
            Opts::new("events_written_total", "Total events appended to the log.")
                .namespace(NAMESPACE),
        )?;
        let event_write_errors = CounterVec::new(
            Opts::new(
                "event_write_errors_total",
                "Total failed event log appends by error type.",
            )
            .namespace(NAMESPACE),
            &["error_type"],
        )?;
        let event_queue_length = IntGauge::with_opts(
            Opts::new("event_queue_length", "Events waiting to be written.").namespace(NAMESPACE),
        )?;
        let event_queue_capacity = IntGauge::with_opts(
            Opts::new("event_queue_capacity", "Capacity of the event queue.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(records_mapped.clone()))?;
        registry.register(Box::new(residue_keys.clone()))?;
        registry.register(Box::new(forward_batches.clone()))?;
        registry.register(Box::new(forward_errors.clone()))?;
        registry.register(Box::new(forward_duration.clone()))?;
        registry.register(Box::new(sink_ready.clone()))?;
        registry.register(Box::new(events_enqueued.clone()))?;
        registry.register(Box::new(events_written.clone()))?;
        registry.register(Box::new(event_write_errors.clone()))?;
        registry.register(Box::new(event_queue_length.clone()))?;
        registry.register(Box::new(event_queue_capacity.clone()))?;

        Ok(Self {
            registry,
            requests,
            decode_errors,
            records_mapped,
            residue_keys,
            forward_batches,
            forward_errors,
            forward_duration,
            sink_ready,
            events_enqueued,
            events_written,
            event_write_errors,
            event_queue_length,
            event_queue_capacity,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

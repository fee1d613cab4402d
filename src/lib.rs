//! Datadog-agent compatible intake that reshapes agent submissions into
//! named time-series records and forwards them to an InfluxDB 0.8 sink.

pub mod config;
pub mod events;
pub mod normalize;
pub mod server;
pub mod sink;

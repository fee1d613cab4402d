//! Forwarding of mapped records to the time-series sink.
//!
//! The sink speaks the InfluxDB 0.8 HTTP API: `GET/POST <url>/db` lists and
//! creates databases, `POST <url>/db/<database>/series` accepts a JSON array
//! of `{name, columns, points}` series. Delivery is best-effort and
//! at-most-once: a failed batch is logged, counted and dropped.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SinkConfig;
use crate::normalize::MetricRecord;
use crate::server::health::HealthMetrics;

/// Why a batch did not reach the sink.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("serializing batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sending batch: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sink rejected batch with status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl ForwardError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Serialize(_) => "serialize",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
        }
    }
}

/// Result of making sure the target database exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    /// The database was already listed.
    Existing,
    /// The database was created.
    Created,
    /// The sink refused to create it, usually because another instance won the race.
    CreateRejected(StatusCode),
}

#[derive(Debug, Deserialize)]
struct DatabaseEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateDatabase<'a> {
    name: &'a str,
}

/// Client for the sink's database and series endpoints. Cheap to clone.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
    health: Option<Arc<HealthMetrics>>,
}

impl Forwarder {
    pub fn new(cfg: &SinkConfig, health: Option<Arc<HealthMetrics>>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !cfg.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        let client = builder.build().context("building HTTP client")?;

        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            database: cfg.database.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            health,
        })
    }

    /// Endpoint listing and creating databases.
    pub fn databases_url(&self) -> String {
        format!("{}/db", self.base_url)
    }

    /// Endpoint accepting series for the configured database.
    pub fn series_url(&self) -> String {
        format!("{}/db/{}/series", self.base_url, self.database)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn authenticate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            return request;
        }
        request.query(&[("u", &self.username), ("p", &self.password)])
    }

    /// Creates the configured database unless the sink already lists it.
    ///
    /// Safe to call repeatedly. A refused create is logged and reported as
    /// [`Bootstrap::CreateRejected`] rather than failing, so racing
    /// instances all start.
    pub async fn bootstrap(&self) -> Result<Bootstrap> {
        let url = self.databases_url();

        let response = self
            .authenticate(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("listing databases at {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} listing databases at {url}: {body}");
        }

        let databases: Vec<DatabaseEntry> = response
            .json()
            .await
            .with_context(|| format!("decoding database list from {url}"))?;

        if databases.iter().any(|db| db.name == self.database) {
            tracing::info!(database = %self.database, "sink database exists");
            self.set_ready(true);
            return Ok(Bootstrap::Existing);
        }

        let response = self
            .authenticate(self.client.post(&url))
            .json(&CreateDatabase {
                name: &self.database,
            })
            .send()
            .await
            .with_context(|| format!("creating database {} at {url}", self.database))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                database = %self.database,
                status = %status,
                body = %body,
                "sink refused to create database",
            );
            self.set_ready(false);
            return Ok(Bootstrap::CreateRejected(status));
        }

        tracing::info!(database = %self.database, "created sink database");
        self.set_ready(true);
        Ok(Bootstrap::Created)
    }

    /// Submits one batch. Empty batches are not sent.
    pub async fn push(&self, records: &[MetricRecord]) -> Result<(), ForwardError> {
        if records.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let body = serde_json::to_vec(records)?;
        let raw_len = body.len();

        let response = self
            .authenticate(self.client.post(self.series_url()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if let Some(h) = &self.health {
            h.forward_duration.observe(start.elapsed().as_secs_f64());
        }

        if !status.is_success() {
            return Err(ForwardError::Status { status, body: text });
        }

        tracing::debug!(records = records.len(), bytes = raw_len, "forwarded batch");

        Ok(())
    }

    /// Submits a batch on a detached task. The caller never learns the outcome;
    /// failures are logged and counted, never retried.
    pub fn spawn_push(&self, records: Vec<MetricRecord>) {
        if records.is_empty() {
            return;
        }

        let forwarder = self.clone();
        tokio::spawn(async move {
            match forwarder.push(&records).await {
                Ok(()) => forwarder.count_batch("ok"),
                Err(e) => {
                    tracing::warn!(error = %e, records = records.len(), "forwarding batch failed");
                    forwarder.count_batch("error");
                    if let Some(h) = &forwarder.health {
                        h.forward_errors.with_label_values(&[e.kind()]).inc();
                    }
                }
            }
        });
    }

    fn count_batch(&self, outcome: &str) {
        if let Some(h) = &self.health {
            h.forward_batches.with_label_values(&[outcome]).inc();
        }
    }

    fn set_ready(&self, ready: bool) {
        if let Some(h) = &self.health {
            h.sink_ready.set(if ready { 1.0 } else { 0.0 });
        }
    }
}

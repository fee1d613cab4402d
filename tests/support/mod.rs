//! In-process stand-in for the InfluxDB 0.8 HTTP API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// One received `POST /db/<database>/series`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub database: String,
    pub query: HashMap<String, String>,
    pub series: Vec<Value>,
}

#[derive(Default)]
pub struct SinkState {
    pub databases: Mutex<Vec<String>>,
    pub create_calls: AtomicUsize,
    pub reject_creates: bool,
    pub batches: Mutex<Vec<Batch>>,
}

pub struct FakeSink {
    pub url: String,
    pub state: Arc<SinkState>,
}

impl FakeSink {
    pub async fn start(state: SinkState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/db", get(list_databases).post(create_database))
            .route("/db/:database/series", post(write_series))
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake sink");
        let addr = listener.local_addr().expect("fake sink addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake sink serve");
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.databases.lock().expect("lock").clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` batches arrived, returning all of them.
    pub async fn wait_for_batches(&self, n: usize) -> Vec<Batch> {
        for _ in 0..200 {
            {
                let batches = self.state.batches.lock().expect("lock");
                if batches.len() >= n {
                    return batches.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {n} batches");
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.state.batches.lock().expect("lock").clone()
    }
}

async fn list_databases(State(state): State<Arc<SinkState>>) -> Json<Value> {
    let names = state.databases.lock().expect("lock").clone();
    Json(Value::Array(
        names.into_iter().map(|name| json!({ "name": name })).collect(),
    ))
}

async fn create_database(
    State(state): State<Arc<SinkState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.create_calls.fetch_add(1, Ordering::SeqCst);
    if state.reject_creates {
        return StatusCode::CONFLICT;
    }
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return StatusCode::BAD_REQUEST;
    };
    let mut databases = state.databases.lock().expect("lock");
    if databases.iter().any(|db| db == name) {
        return StatusCode::CONFLICT;
    }
    databases.push(name.to_string());
    StatusCode::CREATED
}

async fn write_series(
    State(state): State<Arc<SinkState>>,
    Path(database): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(series): Json<Vec<Value>>,
) -> StatusCode {
    let known = state
        .databases
        .lock()
        .expect("lock")
        .iter()
        .any(|db| *db == database);
    state.batches.lock().expect("lock").push(Batch {
        database,
        query,
        series,
    });
    if known {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Finds a series by name in a batch.
pub fn series<'a>(batch: &'a Batch, name: &str) -> Option<&'a Value> {
    batch.series.iter().find(|s| s["name"] == name)
}

/// Value of `column` in row `row` of a `{name, columns, points}` series.
pub fn point<'a>(series: &'a Value, row: usize, column: &str) -> Option<&'a Value> {
    let idx = series["columns"]
        .as_array()?
        .iter()
        .position(|c| c == column)?;
    series["points"].get(row)?.get(idx)
}

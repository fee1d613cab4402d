use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::checks::ServiceCheck;
use super::statsd::StatsdSeries;

/// A decoded agent submission: string keys to arbitrary JSON values.
pub type Document = Map<String, Value>;

/// Errors that make a submission unusable. Only these reach the caller.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("reading request body: {0}")]
    Body(String),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("decoding {encoding} body: {source}")]
    Decompress {
        encoding: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is a JSON {found}, expected an object")]
    NotAnObject { found: &'static str },
}

/// Envelope posted to the series endpoint.
#[derive(Debug, Default, Deserialize)]
struct SeriesEnvelope {
    #[serde(default)]
    series: Option<Vec<StatsdSeries>>,
}

/// Decodes a generic intake submission.
pub fn decode_document(bytes: &[u8]) -> Result<Document, DecodeError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject {
            found: json_kind(&other),
        }),
    }
}

/// Decodes a typed statsd series envelope.
pub fn decode_series(bytes: &[u8]) -> Result<Vec<StatsdSeries>, DecodeError> {
    let envelope: SeriesEnvelope = serde_json::from_slice(bytes)?;
    Ok(envelope.series.unwrap_or_default())
}

/// Decodes a JSON array of service check runs.
pub fn decode_check_runs(bytes: &[u8]) -> Result<Vec<ServiceCheck>, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_document_object() {
        let doc = decode_document(br#"{"internalHostname": "web-1", "cpuIdle": 93.5}"#)
            .expect("valid document");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("internalHostname").and_then(Value::as_str), Some("web-1"));
    }

    #[test]
    fn test_decode_document_malformed() {
        let err = decode_document(b"{\"cpuIdle\": ").expect_err("truncated JSON");
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_document_rejects_non_object() {
        let err = decode_document(b"[1, 2]").expect_err("array is not a document");
        assert!(matches!(err, DecodeError::NotAnObject { found: "array" }));
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn test_decode_document_rejects_invalid_utf8() {
        assert!(decode_document(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_decode_series() {
        let series = decode_series(
            br#"{"series": [{"metric": "app.hits", "points": [[1700000000, 3]], "host": "a"}]}"#,
        )
        .expect("valid envelope");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].metric, "app.hits");
        assert_eq!(series[0].host.as_deref(), Some("a"));
    }

    #[test]
    fn test_decode_series_null_list() {
        let series = decode_series(br#"{"series": null}"#).expect("null series");
        assert!(series.is_empty());
    }

    #[test]
    fn test_decode_check_runs() {
        let runs = decode_check_runs(
            br#"[{"check": "ntp.in_sync", "host_name": "a", "status": 0, "timestamp": 1700000000}]"#,
        )
        .expect("valid check runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].check, "ntp.in_sync");
    }
}

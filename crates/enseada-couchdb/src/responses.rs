//! Wire shapes of CouchDB responses.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WriteResponse {
    pub id: String,
    pub rev: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FindResponse {
    pub docs: Vec<Value>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangesResponse {
    pub results: Vec<ChangeResult>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangeResult {
    pub seq: Value,
    pub id: String,
    pub changes: Vec<ChangeRev>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangeRev {
    pub rev: String,
}

/// CouchDB 1.x uses integer sequences, 2.x and later opaque strings.
pub(crate) fn seq_to_string(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

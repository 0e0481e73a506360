pub mod token;
pub mod webhook;

use serde_json::{Map, Value};

/// Response headers as a JSON object, for diagnostic reports. Values that
/// are not valid UTF-8 are dropped.
pub fn headers_json(headers: &reqwest::header::HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), Value::from(v))))
        .collect()
}

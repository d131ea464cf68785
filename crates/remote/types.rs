use std::collections::BTreeMap;

use ferry_common::{JsonPatchOperation, WorkItemId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

pub const API_VERSION: &str = "5.1";
pub const CONTENT_TYPE_PATCH: &str = "application/json-patch+json";

/// One entry of a batch write. The owning source id travels with the request so the
/// response can be matched back by position without a second lookup table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteRequest {
    #[serde(skip)]
    pub source_id: WorkItemId,
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<JsonPatchOperation>,
}

impl WriteRequest {
    fn patch(source_id: WorkItemId, uri: String, body: Vec<JsonPatchOperation>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_owned(), CONTENT_TYPE_PATCH.to_owned());
        Self {
            source_id,
            method: "PATCH".to_owned(),
            uri,
            headers,
            body,
        }
    }

    pub fn create(
        source_id: WorkItemId,
        project: &str,
        work_item_type: &str,
        body: Vec<JsonPatchOperation>,
    ) -> Self {
        let uri = format!(
            "/{}/_apis/wit/workitems/${}?api-version={API_VERSION}&bypassRules=true",
            encode_path_segment(project),
            encode_path_segment(work_item_type),
        );
        Self::patch(source_id, uri, body)
    }

    pub fn update(
        source_id: WorkItemId,
        target_id: WorkItemId,
        body: Vec<JsonPatchOperation>,
    ) -> Self {
        let uri = format!("/_apis/wit/workitems/{target_id}?api-version={API_VERSION}&bypassRules=true");
        Self::patch(source_id, uri, body)
    }

    /// Record an update writes to. `None` for creates.
    pub fn target_id(&self) -> Option<WorkItemId> {
        let path = self.uri.split('?').next().unwrap_or_default();
        path.rsplit_once("/_apis/wit/workitems/")?.1.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResponse {
    pub code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// The service returns each body as an embedded JSON string.
    #[serde(default)]
    pub body: Option<String>,
}

impl BatchItemResponse {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn body_json(&self) -> Result<Value, RemoteError> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| RemoteError::decode("batch_item", "missing body"))?;
        serde_json::from_str(body).map_err(|e| RemoteError::decode("batch_item", e))
    }

    /// The `message` member of an error body, or the raw body text.
    pub fn error_message(&self) -> String {
        match self.body_json() {
            Ok(value) => value
                .get("value")
                .and_then(|inner| inner.get("Message").or_else(|| inner.get("message")))
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| value.to_string()),
            Err(_) => self.body.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub value: Vec<BatchItemResponse>,
}

/// How much of a record to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expand {
    #[default]
    None,
    Relations,
    Fields,
    All,
}

impl Expand {
    pub fn as_str(self) -> &'static str {
        match self {
            Expand::None => "none",
            Expand::Relations => "relations",
            Expand::Fields => "fields",
            Expand::All => "all",
        }
    }
}

/// Percent-encodes a single path segment (project and type names may contain spaces).
pub fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

pub fn decode_path_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                decoded.push((high << 4) | low);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_uri_encodes_project_and_type() {
        let request = WriteRequest::create(3, "Fabrikam Fiber", "User Story", vec![]);
        assert_eq!(
            request.uri,
            "/Fabrikam%20Fiber/_apis/wit/workitems/$User%20Story?api-version=5.1&bypassRules=true"
        );
        assert_eq!(request.method, "PATCH");
        assert_eq!(request.headers["Content-Type"], CONTENT_TYPE_PATCH);
        assert_eq!(decode_path_segment("User%20Story"), "User Story");
    }

    #[test]
    fn source_id_is_not_serialized() {
        let request = WriteRequest::update(3, 90, vec![JsonPatchOperation::remove_relation(0)]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("source_id").is_none());
        assert_eq!(value["uri"], "/_apis/wit/workitems/90?api-version=5.1&bypassRules=true");
        assert_eq!(value["body"], json!([{"op": "remove", "path": "/relations/0"}]));
    }

    #[test]
    fn only_updates_name_a_target_record() {
        assert_eq!(WriteRequest::update(3, 90, vec![]).target_id(), Some(90));
        assert_eq!(WriteRequest::create(3, "Fabrikam", "Bug", vec![]).target_id(), None);
    }

    #[test]
    fn error_message_reads_embedded_body() {
        let response = BatchItemResponse::new(
            400,
            json!({"value": {"Message": "TF401320: rule error"}}).to_string(),
        );
        assert!(!response.is_success());
        assert_eq!(response.error_message(), "TF401320: rule error");

        let response = BatchItemResponse::new(500, "not json");
        assert_eq!(response.error_message(), "not json");
    }
}

//! JSON patch operations as accepted by the work item write endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::work_item::{ATTR_COMMENT, WorkItemId, WorkItemRelation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl JsonPatchOperation {
    pub fn add_field(name: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: format!("/fields/{name}"),
            from: None,
            value: Some(value),
        }
    }

    /// Temporary id for a record created inside a batch. Must be negative.
    pub fn temporary_id(id: WorkItemId) -> Self {
        Self {
            op: PatchOp::Add,
            path: "/id".to_owned(),
            from: None,
            value: Some(Value::from(id)),
        }
    }

    pub fn add_relation(relation: &WorkItemRelation) -> Self {
        Self {
            op: PatchOp::Add,
            path: "/relations/-".to_owned(),
            from: None,
            value: Some(serde_json::json!({
                "rel": relation.rel,
                "url": relation.url,
                "attributes": relation.attributes,
            })),
        }
    }

    pub fn remove_relation(index: usize) -> Self {
        Self {
            op: PatchOp::Remove,
            path: format!("/relations/{index}"),
            from: None,
            value: None,
        }
    }

    pub fn replace_relation_comment(index: usize, comment: &str) -> Self {
        Self {
            op: PatchOp::Replace,
            path: format!("/relations/{index}/attributes/{ATTR_COMMENT}"),
            from: None,
            value: Some(Value::from(comment)),
        }
    }

    /// Rejects the whole request unless the record is still at revision `rev`.
    pub fn test_rev(rev: i64) -> Self {
        Self {
            op: PatchOp::Test,
            path: "/rev".to_owned(),
            from: None,
            value: Some(Value::from(rev)),
        }
    }

    /// Field name when the operation targets `/fields/{name}`.
    pub fn field_name(&self) -> Option<&str> {
        self.path.strip_prefix("/fields/")
    }
}

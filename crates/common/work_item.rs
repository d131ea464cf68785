use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type WorkItemId = i64;

pub const FIELD_WORK_ITEM_TYPE: &str = "System.WorkItemType";
pub const FIELD_TEAM_PROJECT: &str = "System.TeamProject";
pub const FIELD_AREA_PATH: &str = "System.AreaPath";
pub const FIELD_ITERATION_PATH: &str = "System.IterationPath";
pub const FIELD_TAGS: &str = "System.Tags";
pub const FIELD_TITLE: &str = "System.Title";

/// Relation type used for the link back to the source record.
pub const REL_HYPERLINK: &str = "Hyperlink";
pub const REL_ATTACHED_FILE: &str = "AttachedFile";
pub const REL_ARTIFACT_LINK: &str = "ArtifactLink";
/// Prefix shared by every work-item-to-work-item link type.
pub const REL_WORK_ITEM_LINK_PREFIX: &str = "System.LinkTypes.";

pub const ATTR_COMMENT: &str = "comment";
pub const ATTR_NAME: &str = "name";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: WorkItemId,
    pub rev: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub relations: Vec<WorkItemRelation>,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRelation {
    pub rel: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl WorkItem {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn work_item_type(&self) -> Option<&str> {
        self.field_str(FIELD_WORK_ITEM_TYPE)
    }

    pub fn team_project(&self) -> Option<&str> {
        self.field_str(FIELD_TEAM_PROJECT)
    }

    /// Indexes of every relation that points back at `source_url`.
    pub fn cross_reference_indexes(&self, source_url: &str) -> Vec<usize> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, relation)| relation.is_cross_reference_to(source_url))
            .map(|(index, _)| index)
            .collect()
    }
}

impl WorkItemRelation {
    pub fn new(rel: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            url: url.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn comment(&self) -> Option<&str> {
        self.attributes.get(ATTR_COMMENT).and_then(Value::as_str)
    }

    pub fn is_work_item_link(&self) -> bool {
        self.rel.starts_with(REL_WORK_ITEM_LINK_PREFIX)
    }

    pub fn is_cross_reference_to(&self, source_url: &str) -> bool {
        self.rel == REL_HYPERLINK && urls_match(&self.url, source_url)
    }
}

/// Service urls are case-insensitive and may differ in a trailing slash.
pub fn urls_match(left: &str, right: &str) -> bool {
    left.trim_end_matches('/')
        .eq_ignore_ascii_case(right.trim_end_matches('/'))
}

/// Extracts the numeric id from a `.../workItems/{id}` url.
pub fn work_item_id_from_url(url: &str) -> Option<WorkItemId> {
    let trimmed = url.trim_end_matches('/');
    let (prefix, id) = trimmed.rsplit_once('/')?;
    if !prefix.to_ascii_lowercase().ends_with("/workitems") {
        return None;
    }
    id.parse().ok()
}

/// Appends `tag` to a `"a; b"` style tag list. `None` when the tag is already present.
pub fn merge_tag(existing: Option<&str>, tag: &str) -> Option<String> {
    let tags: Vec<&str> = existing
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return None;
    }
    let mut merged = tags.join("; ");
    if !merged.is_empty() {
        merged.push_str("; ");
    }
    merged.push_str(tag);
    Some(merged)
}

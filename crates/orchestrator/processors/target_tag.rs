use ferry_common::{
    JsonPatchOperation,
    work_item::{FIELD_TAGS, merge_tag},
};
use ferry_config::MigrationConfig;
use serde_json::Value;

use super::FieldProcessor;
use crate::{batch::BatchRecord, context::MigrationContext};

/// Stamps every record written to the target with the configured tag.
pub struct TargetTag;

impl FieldProcessor for TargetTag {
    fn name(&self) -> &'static str {
        "target-tag"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config
            .fields
            .target_tag
            .as_deref()
            .is_some_and(|tag| !tag.trim().is_empty())
    }

    fn transform(&self, ctx: &MigrationContext, record: &BatchRecord) -> Vec<JsonPatchOperation> {
        let (Some(tag), Some(source)) = (ctx.config.fields.target_tag.as_deref(), &record.source)
        else {
            return Vec::new();
        };
        let existing = source.field_str(FIELD_TAGS);
        let merged = merge_tag(existing, tag.trim()).unwrap_or_else(|| existing.unwrap_or_default().to_owned());
        vec![JsonPatchOperation::add_field(FIELD_TAGS, Value::from(merged))]
    }
}

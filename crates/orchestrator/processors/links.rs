use std::collections::HashSet;

use ferry_common::{FailureReason, JsonPatchOperation, WorkItemId, work_item::work_item_id_from_url};
use ferry_config::MigrationConfig;
use tracing::debug;

use super::{RelationProcessor, copy_relation, map_linked_records};
use crate::{
    batch::{BatchContext, BatchRecord, BatchTables},
    context::MigrationContext,
};

/// Work item to work item links, re-pointed at the target counterparts.
pub struct Links;

#[async_trait::async_trait]
impl RelationProcessor for Links {
    fn name(&self) -> &'static str {
        "links"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.relations.links
    }

    async fn preprocess(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        let linked: Vec<WorkItemId> = batch
            .active()
            .filter_map(|record| record.source.as_ref())
            .flat_map(|source| source.relations.iter())
            .filter(|relation| relation.is_work_item_link())
            .filter_map(|relation| work_item_id_from_url(&relation.url))
            .collect();
        map_linked_records(ctx, batch, linked).await;
    }

    fn process(
        &self,
        ctx: &MigrationContext,
        _tables: &BatchTables,
        record: &mut BatchRecord,
    ) -> Vec<JsonPatchOperation> {
        let Some(source) = record.source.as_ref() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut operations = Vec::new();
        let mut duplicates = Vec::new();
        for relation in source.relations.iter().filter(|r| r.is_work_item_link()) {
            let Some(linked) = work_item_id_from_url(&relation.url) else {
                continue;
            };
            let Some(target_id) = ctx.id_map.get(linked) else {
                debug!(source_id = source.id, linked, "Linked record not migrated, skipping link");
                continue;
            };
            if !seen.insert((relation.rel.as_str(), target_id)) {
                duplicates.push(format!("duplicate {} link to {linked}", relation.rel));
                continue;
            }
            let url = ctx.target.record_url(target_id);
            operations.push(JsonPatchOperation::add_relation(&copy_relation(relation, &url)));
        }
        for message in duplicates {
            record.state.flag(FailureReason::DuplicateLink, message);
        }
        operations
    }
}

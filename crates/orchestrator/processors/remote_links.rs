use std::collections::HashSet;

use ferry_common::{
    FailureReason, JsonPatchOperation, WorkItemId, WorkItemRelation,
    work_item::{REL_ARTIFACT_LINK, REL_HYPERLINK, urls_match, work_item_id_from_url},
};
use ferry_config::MigrationConfig;
use tracing::debug;

use super::{RelationProcessor, copy_relation, map_linked_records};
use crate::{
    batch::{BatchContext, BatchRecord, BatchTables},
    context::MigrationContext,
};

/// Hyperlinks and artifact links, copied as they are.
///
/// Hyperlinks to other source records are re-pointed at their target counterparts.
/// Copied verbatim, a REST url of a source record would read as a cross-reference
/// and make the next run see that record as duplicated.
pub struct RemoteLinks;

fn is_remote_link(relation: &WorkItemRelation) -> bool {
    relation.rel == REL_HYPERLINK || relation.rel == REL_ARTIFACT_LINK
}

#[async_trait::async_trait]
impl RelationProcessor for RemoteLinks {
    fn name(&self) -> &'static str {
        "remote-links"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.relations.remote_links
    }

    async fn preprocess(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        let linked: Vec<WorkItemId> = batch
            .active()
            .flat_map(|record| {
                record
                    .source
                    .iter()
                    .flat_map(|source| source.relations.iter())
                    .filter(|relation| relation.rel == REL_HYPERLINK)
                    .filter(move |relation| !urls_match(&relation.url, &record.state.source_url))
            })
            .filter_map(|relation| ctx.source_reference(&relation.url))
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
        for relation in source.relations.iter().filter(|r| is_remote_link(r)) {
            // The cross-reference survives the clear and must not be added twice.
            if urls_match(&relation.url, &record.state.source_url) {
                continue;
            }
            let linked = (relation.rel == REL_HYPERLINK)
                .then(|| ctx.source_reference(&relation.url))
                .flatten();
            let url = match linked {
                None => relation.url.clone(),
                Some(linked) => match ctx.retarget_reference(&relation.url, linked) {
                    Some(url) => url,
                    None if work_item_id_from_url(&relation.url).is_some() => {
                        debug!(
                            source_id = source.id,
                            linked,
                            "Linked record not migrated, skipping hyperlink"
                        );
                        continue;
                    }
                    None => relation.url.clone(),
                },
            };
            let key = (relation.rel.as_str(), url.trim_end_matches('/').to_ascii_lowercase());
            if !seen.insert(key) {
                duplicates.push(format!("duplicate {} to {}", relation.rel, relation.url));
                continue;
            }
            operations.push(JsonPatchOperation::add_relation(&copy_relation(relation, &url)));
        }
        for message in duplicates {
            record.state.flag(FailureReason::DuplicateLink, message);
        }
        operations
    }
}

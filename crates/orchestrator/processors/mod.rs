//! Pluggable per-phase processors and the registry that orders them.
//!
//! Processors are registered explicitly at startup. Within each kind they run in
//! ascending `priority`; registration order breaks ties.

mod attachments;
mod clear_relations;
mod inline_images;
mod links;
mod remote_links;
mod target_tag;
mod type_validation;

use ferry_common::{
    JsonPatchOperation, WorkItemId, WorkItemRelation,
    work_item::{ATTR_COMMENT, ATTR_NAME},
};
use ferry_config::MigrationConfig;
use serde_json::Map;
use tracing::{Span, warn};

use crate::{
    batch::{BatchContext, BatchRecord, BatchTables},
    context::MigrationContext,
};

pub use attachments::Attachments;
pub use clear_relations::ClearRelations;
pub use inline_images::InlineImages;
pub use links::Links;
pub use remote_links::RemoteLinks;
pub use target_tag::TargetTag;
pub use type_validation::TypeValidation;

/// Phase 1 hook that runs before requests are built. May rewrite in-memory source
/// content or fail records.
#[async_trait::async_trait]
pub trait PreProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn is_enabled(&self, _config: &MigrationConfig) -> bool {
        true
    }
    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext);
}

/// Phase 1 hook contributing field operations, appended after the copied fields.
pub trait FieldProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn is_enabled(&self, config: &MigrationConfig) -> bool;
    fn transform(&self, ctx: &MigrationContext, record: &BatchRecord) -> Vec<JsonPatchOperation>;
}

/// Phase 2 hook. `name` is what gets recorded in the sync token once the phase
/// succeeds for a record, so it must never change between releases.
#[async_trait::async_trait]
pub trait RelationProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn is_enabled(&self, config: &MigrationConfig) -> bool;
    async fn preprocess(&self, _ctx: &MigrationContext, _batch: &mut BatchContext) {}
    fn process(
        &self,
        ctx: &MigrationContext,
        tables: &BatchTables,
        record: &mut BatchRecord,
    ) -> Vec<JsonPatchOperation>;
    /// Whether this processor's work for `record` may be recorded in the sync token.
    /// Returning `false` makes the next run retry phase 2 for the record.
    fn is_complete_for(&self, _record: &BatchRecord) -> bool {
        true
    }
}

pub struct ProcessorRegistry {
    pub pre_processors: Vec<Box<dyn PreProcessor>>,
    pub field_processors: Vec<Box<dyn FieldProcessor>>,
    pub relation_processors: Vec<Box<dyn RelationProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            pre_processors: Vec::new(),
            field_processors: Vec::new(),
            relation_processors: Vec::new(),
        }
    }

    /// Every built-in processor. Relation processor priorities define the order of
    /// operations in a phase 2 request; `clear-relations` must stay first.
    pub fn standard() -> Self {
        Self::empty()
            .with_pre_processor(TypeValidation)
            .with_pre_processor(InlineImages)
            .with_field_processor(TargetTag)
            .with_relation_processor(ClearRelations)
            .with_relation_processor(Links)
            .with_relation_processor(RemoteLinks)
            .with_relation_processor(Attachments)
    }

    pub fn with_pre_processor(mut self, processor: impl PreProcessor + 'static) -> Self {
        self.pre_processors.push(Box::new(processor));
        self.pre_processors.sort_by_key(|p| p.priority());
        self
    }

    pub fn with_field_processor(mut self, processor: impl FieldProcessor + 'static) -> Self {
        self.field_processors.push(Box::new(processor));
        self.field_processors.sort_by_key(|p| p.priority());
        self
    }

    pub fn with_relation_processor(mut self, processor: impl RelationProcessor + 'static) -> Self {
        self.relation_processors.push(Box::new(processor));
        self.relation_processors.sort_by_key(|p| p.priority());
        self
    }

    /// Drops every processor `config` does not enable.
    pub fn enabled(mut self, config: &MigrationConfig) -> Self {
        self.pre_processors.retain(|p| p.is_enabled(config));
        self.field_processors.retain(|p| p.is_enabled(config));
        self.relation_processors.retain(|p| p.is_enabled(config));
        self
    }

    /// Phase names recorded in sync tokens, in processor order.
    pub fn relation_phase_names(&self, config: &MigrationConfig) -> Vec<String> {
        if !config.phases.relations {
            return Vec::new();
        }
        self.relation_processors
            .iter()
            .filter(|p| p.is_enabled(config))
            .map(|p| p.name().to_owned())
            .collect()
    }
}

/// Maps linked source records that were migrated by an earlier run and are therefore
/// not in the id map yet. Records with no or several counterparts stay unmapped.
async fn map_linked_records(
    ctx: &MigrationContext,
    batch: &BatchContext,
    linked: impl IntoIterator<Item = WorkItemId>,
) {
    let mut unmapped: Vec<WorkItemId> = linked
        .into_iter()
        .filter(|id| ctx.id_map.get(*id).is_none())
        .collect();
    unmapped.sort_unstable();
    unmapped.dedup();
    if unmapped.is_empty() {
        return;
    }

    let urls: Vec<String> = unmapped.iter().map(|id| ctx.source.record_url(*id)).collect();
    let found = ctx
        .retry_policy(Span::current())
        .run(
            "query_by_cross_reference",
            batch.id,
            || ctx.target.query_by_cross_reference(&urls),
            None,
        )
        .await;
    match found {
        Ok(found) => {
            for (source_id, url) in unmapped.iter().zip(&urls) {
                if let Some([target_id]) = found.get(url).map(Vec::as_slice) {
                    ctx.id_map.insert_if_absent(*source_id, *target_id);
                }
            }
        }
        Err(err) => warn!(%err, "Could not resolve linked records, their links are skipped"),
    }
}

/// Copy of `relation` pointing at `url`, keeping only the attributes a client may set.
fn copy_relation(relation: &WorkItemRelation, url: &str) -> WorkItemRelation {
    let attributes: Map<_, _> = relation
        .attributes
        .iter()
        .filter(|(key, _)| key.as_str() == ATTR_COMMENT || key.as_str() == ATTR_NAME)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    WorkItemRelation {
        rel: relation.rel.clone(),
        url: url.to_owned(),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(attachments: bool, relations: bool) -> MigrationConfig {
        let mut config: MigrationConfig = r#"
            [source]
            url = "https://src"
            project = "A"
            query = "SELECT [System.Id] FROM WorkItems"
            [target]
            url = "https://tgt"
            project = "B"
        "#
        .parse()
        .unwrap();
        config.relations.attachments = attachments;
        config.phases.relations = relations;
        config
    }

    #[test]
    fn relation_processors_run_in_priority_order() {
        let registry = ProcessorRegistry::empty()
            .with_relation_processor(Attachments)
            .with_relation_processor(Links)
            .with_relation_processor(ClearRelations);
        let names: Vec<_> = registry.relation_processors.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["clear-relations", "links", "attachments"]);
    }

    #[test]
    fn phase_names_follow_the_relation_toggles() {
        let registry = ProcessorRegistry::standard();
        assert_eq!(
            registry.relation_phase_names(&config(false, true)),
            vec!["clear-relations", "links", "remote-links"]
        );
        assert_eq!(
            registry.relation_phase_names(&config(true, true)),
            vec!["clear-relations", "links", "remote-links", "attachments"]
        );
        assert!(registry.relation_phase_names(&config(true, false)).is_empty());
    }

    #[test]
    fn copied_relations_drop_read_only_attributes() {
        let relation = WorkItemRelation::new("AttachedFile", "https://src/a/1")
            .with_attribute(ATTR_NAME, "log.txt")
            .with_attribute("resourceSize", 12)
            .with_attribute("id", 4);
        let copy = copy_relation(&relation, "https://tgt/a/9");
        assert_eq!(copy.url, "https://tgt/a/9");
        assert_eq!(serde_json::Value::Object(copy.attributes), json!({"name": "log.txt"}));
    }
}

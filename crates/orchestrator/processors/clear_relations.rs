use ferry_common::JsonPatchOperation;
use ferry_config::MigrationConfig;

use super::RelationProcessor;
use crate::{
    batch::{BatchRecord, BatchTables},
    context::MigrationContext,
};

/// Removes every target relation except the cross-reference, so the processors after
/// it re-add exactly what the source has now. Afterwards the cross-reference sits at
/// index 0.
pub struct ClearRelations;

#[async_trait::async_trait]
impl RelationProcessor for ClearRelations {
    fn name(&self) -> &'static str {
        "clear-relations"
    }

    fn priority(&self) -> u32 {
        0
    }

    fn is_enabled(&self, _config: &MigrationConfig) -> bool {
        true
    }

    fn process(
        &self,
        _ctx: &MigrationContext,
        _tables: &BatchTables,
        record: &mut BatchRecord,
    ) -> Vec<JsonPatchOperation> {
        let Some(target) = record.target.as_ref() else {
            return Vec::new();
        };
        // Highest index first so earlier removals do not shift later ones.
        target
            .relations
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, relation)| !relation.is_cross_reference_to(&record.state.source_url))
            .map(|(index, _)| JsonPatchOperation::remove_relation(index))
            .collect()
    }
}

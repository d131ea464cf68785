use ferry_common::{Classification, Phase, RecordState, Requirement};
use ferry_config::MigrationConfig;
use ferry_remote::{BatchItemResponse, WriteRequest};
use tracing::warn;

use super::{PhaseStrategy, load_content, parse_work_item};
use crate::{
    batch::{BatchContext, BatchRecord},
    builder::BatchRequestBuilder,
    context::MigrationContext,
    executor::SuccessHandler,
    processors::{FieldProcessor, PreProcessor},
};

/// Phase 1: creates new target records and updates the fields of stale ones.
pub struct CoreFieldsPhase {
    pre_processors: Vec<Box<dyn PreProcessor>>,
    field_processors: Vec<Box<dyn FieldProcessor>>,
}

impl CoreFieldsPhase {
    pub fn new(
        pre_processors: Vec<Box<dyn PreProcessor>>,
        field_processors: Vec<Box<dyn FieldProcessor>>,
    ) -> Self {
        Self {
            pre_processors,
            field_processors,
        }
    }
}

impl SuccessHandler for CoreFieldsPhase {
    fn on_success(
        &self,
        ctx: &MigrationContext,
        record: &mut BatchRecord,
        response: &BatchItemResponse,
    ) -> Result<(), String> {
        let state = &mut record.state;
        if state.classification() == Classification::Create {
            let created = parse_work_item(response)?;
            state.assign_target_id(created.id).map_err(|e| e.to_string())?;
            let stored = ctx.id_map.insert_if_absent(state.source_id, created.id);
            if stored != created.id {
                warn!(
                    source_id = state.source_id,
                    created = created.id,
                    stored,
                    "Source record was already mapped to another target record"
                );
            }
            state.cross_reference_index = created
                .cross_reference_indexes(&state.source_url)
                .first()
                .copied();
        }
        state.sync_token = record.pending_token.take();
        state.complete_phase(Phase::CoreFields).map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl PhaseStrategy for CoreFieldsPhase {
    fn phase(&self) -> Phase {
        Phase::CoreFields
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.phases.core_fields
    }

    fn is_eligible(&self, state: &RecordState) -> bool {
        match state.classification() {
            Classification::Create => true,
            Classification::Existing => state.requires(Requirement::UpdatePhase1),
            Classification::Unclassified | Classification::Error => false,
        }
    }

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        load_content(ctx, batch, false).await;
        for processor in &self.pre_processors {
            processor.prepare(ctx, batch).await;
        }
    }

    fn build_requests(&self, ctx: &MigrationContext, batch: &mut BatchContext) -> Vec<WriteRequest> {
        BatchRequestBuilder::new(ctx).core_field_requests(batch, &self.field_processors)
    }

    fn verifies_creates(&self, config: &MigrationConfig) -> bool {
        config.batch.verify_on_create_failure
    }
}

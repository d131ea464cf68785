use ferry_common::{Phase, RecordState, Requirement};
use ferry_config::MigrationConfig;
use ferry_remote::{BatchItemResponse, WriteRequest};

use super::{PhaseStrategy, load_content};
use crate::{
    batch::{BatchContext, BatchRecord},
    builder::BatchRequestBuilder,
    context::MigrationContext,
    executor::SuccessHandler,
    processors::RelationProcessor,
};

/// Phase 2: rebuilds the relation list of every target record from its source.
pub struct RelationsPhase {
    processors: Vec<Box<dyn RelationProcessor>>,
}

impl RelationsPhase {
    pub fn new(processors: Vec<Box<dyn RelationProcessor>>) -> Self {
        Self { processors }
    }
}

impl SuccessHandler for RelationsPhase {
    fn on_success(
        &self,
        _ctx: &MigrationContext,
        record: &mut BatchRecord,
        _response: &BatchItemResponse,
    ) -> Result<(), String> {
        record.state.sync_token = record.pending_token.take();
        record.state.cross_reference_index = Some(0);
        record
            .state
            .complete_phase(Phase::Relations)
            .map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl PhaseStrategy for RelationsPhase {
    fn phase(&self) -> Phase {
        Phase::Relations
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.phases.relations
    }

    fn is_eligible(&self, state: &RecordState) -> bool {
        !state.is_failed()
            && state.target_id().is_some()
            && (state.has_phase(Phase::CoreFields) || state.requires(Requirement::UpdatePhase2))
    }

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        load_content(ctx, batch, true).await;
        for processor in &self.processors {
            processor.preprocess(ctx, batch).await;
        }
    }

    fn build_requests(&self, ctx: &MigrationContext, batch: &mut BatchContext) -> Vec<WriteRequest> {
        BatchRequestBuilder::new(ctx).relation_requests(batch, &self.processors)
    }
}

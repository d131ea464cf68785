use ferry_common::{
    JsonPatchOperation, Phase, RecordState, SyncToken,
    work_item::{FIELD_TAGS, merge_tag},
};
use ferry_config::MigrationConfig;
use ferry_remote::{BatchItemResponse, WriteRequest};
use tracing::{Span, debug, warn};

use super::{PhaseStrategy, load_content, parse_work_item};
use crate::{
    batch::{BatchContext, BatchRecord},
    context::{Endpoint, MigrationContext},
    executor::{BatchExecutor, SuccessHandler},
};

/// Phase 3: tags migrated source records.
///
/// Tagging bumps the source revision, so the sync token on the target is rewritten
/// with the new revision afterwards. Without that the next run would see every tagged
/// record as changed. The tag write is guarded by a revision test: a source edited
/// after it was read is left untagged and keeps its old token, so the next run
/// migrates the edit.
pub struct PostMovePhase;

impl SuccessHandler for PostMovePhase {
    fn on_success(
        &self,
        _ctx: &MigrationContext,
        record: &mut BatchRecord,
        response: &BatchItemResponse,
    ) -> Result<(), String> {
        let tagged = parse_work_item(response)?;
        let migrated = record.state.source_rev;
        if tagged.rev == migrated + 1 {
            let mut token = record
                .state
                .sync_token
                .clone()
                .unwrap_or_else(|| SyncToken::new(migrated));
            token.revision = tagged.rev;
            record.pending_token = Some(token);
        } else {
            warn!(
                source_id = record.state.source_id,
                migrated,
                tagged = tagged.rev,
                "Source changed around tagging, keeping the migrated revision in the sync token"
            );
        }
        record.state.source_rev = tagged.rev;
        record
            .state
            .complete_phase(Phase::PostMove)
            .map_err(|e| e.to_string())
    }
}

/// Adopts the refreshed token once the target accepted it.
struct TokenRefresh;

impl SuccessHandler for TokenRefresh {
    fn on_success(
        &self,
        _ctx: &MigrationContext,
        record: &mut BatchRecord,
        _response: &BatchItemResponse,
    ) -> Result<(), String> {
        record.state.sync_token = record.pending_token.take();
        Ok(())
    }
}

#[async_trait::async_trait]
impl PhaseStrategy for PostMovePhase {
    fn phase(&self) -> Phase {
        Phase::PostMove
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::Source
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.phases.post_move
    }

    fn is_eligible(&self, state: &RecordState) -> bool {
        !state.is_failed()
            && state.failure_reasons().is_empty()
            && (state.has_phase(Phase::CoreFields) || state.has_phase(Phase::Relations))
    }

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        load_content(ctx, batch, false).await;
    }

    fn build_requests(&self, ctx: &MigrationContext, batch: &mut BatchContext) -> Vec<WriteRequest> {
        let tag = ctx.config.post_move.source_tag.as_str();
        for record in batch.active_mut() {
            record.pending_token = None;
        }
        batch
            .active()
            .filter_map(|record| {
                let source = record.source.as_ref()?;
                let Some(tags) = merge_tag(source.field_str(FIELD_TAGS), tag) else {
                    debug!(source_id = source.id, "Source record already tagged");
                    return None;
                };
                Some(WriteRequest::update(
                    source.id,
                    source.id,
                    vec![
                        JsonPatchOperation::test_rev(record.state.source_rev),
                        JsonPatchOperation::add_field(FIELD_TAGS, tags.into()),
                    ],
                ))
            })
            .collect()
    }

    async fn finish(&self, ctx: &MigrationContext, batch: &mut BatchContext, span: &Span) {
        let mut requests = Vec::new();
        for record in batch.active() {
            let state = &record.state;
            let (Some(target_id), Some(index), Some(token)) = (
                state.target_id(),
                state.cross_reference_index,
                record.pending_token.as_ref(),
            ) else {
                continue;
            };
            requests.push(WriteRequest::update(
                state.source_id,
                target_id,
                vec![JsonPatchOperation::replace_relation_comment(index, &token.to_string())],
            ));
        }
        if requests.is_empty() {
            return;
        }
        debug!(batch_id = %batch.id, records = requests.len(), "Refreshing sync tokens");
        BatchExecutor::new(ctx, Endpoint::Target, span.clone())
            .execute(batch, requests, &TokenRefresh, false)
            .await;
    }
}

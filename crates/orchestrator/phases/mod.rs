//! The three phases a record moves through, and the content loading they share.

mod core_fields;
mod post_move;
mod relations;

use std::collections::HashMap;

use ferry_common::{FailureReason, Phase, RecordState, WorkItem, WorkItemId};
use ferry_config::MigrationConfig;
use ferry_remote::{BatchItemResponse, Expand, RemoteError, WriteRequest};
use tracing::{Span, error};
use uuid::Uuid;

use crate::{
    batch::BatchContext,
    context::{Endpoint, MigrationContext},
    executor::SuccessHandler,
};

pub use core_fields::CoreFieldsPhase;
pub use post_move::PostMovePhase;
pub use relations::RelationsPhase;

/// One phase of the pipeline. The pipeline partitions records with `is_eligible`,
/// then drives every batch through `prepare`, `build_requests`, submission and
/// `finish`.
#[async_trait::async_trait]
pub trait PhaseStrategy: SuccessHandler {
    fn phase(&self) -> Phase;

    fn endpoint(&self) -> Endpoint {
        Endpoint::Target
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool;

    fn is_eligible(&self, state: &RecordState) -> bool;

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext);

    fn build_requests(&self, ctx: &MigrationContext, batch: &mut BatchContext) -> Vec<WriteRequest>;

    /// Whether a failed submission must be verified before it is retried.
    fn verifies_creates(&self, _config: &MigrationConfig) -> bool {
        false
    }

    /// Runs after the batch was submitted and reconciled.
    async fn finish(&self, _ctx: &MigrationContext, _batch: &mut BatchContext, _span: &Span) {}
}

/// The record returned in the body of a successful write.
fn parse_work_item(response: &BatchItemResponse) -> Result<WorkItem, String> {
    response
        .body_json()
        .map_err(|e| e.to_string())
        .and_then(|body| serde_json::from_value(body).map_err(|e| e.to_string()))
        .map_err(|e| format!("unreadable write response: {e}"))
}

async fn fetch_by_id(
    ctx: &MigrationContext,
    endpoint: Endpoint,
    batch_id: Uuid,
    ids: &[WorkItemId],
    expand: Expand,
) -> Result<HashMap<WorkItemId, WorkItem>, RemoteError> {
    let client = ctx.client(endpoint);
    let items = ctx
        .retry_policy(Span::current())
        .run("fetch_records", batch_id, || client.fetch_records(ids, expand), None)
        .await?;
    Ok(items.into_iter().map(|item| (item.id, item)).collect())
}

/// Loads the source content of every active record and, with `with_target`, the
/// target content of those that have a target. A record whose source vanished fails;
/// a missing target is left for the request builder to report.
pub(crate) async fn load_content(ctx: &MigrationContext, batch: &mut BatchContext, with_target: bool) {
    let ids = batch.active_ids();
    if ids.is_empty() {
        return;
    }
    let mut sources = match fetch_by_id(ctx, Endpoint::Source, batch.id, &ids, Expand::All).await {
        Ok(sources) => sources,
        Err(err) => {
            error!(batch_id = %batch.id, %err, "Failed to read source records");
            for record in batch.active_mut() {
                record
                    .state
                    .fail(FailureReason::CriticalError, format!("failed to read source record: {err}"));
            }
            return;
        }
    };
    for record in batch.active_mut() {
        match sources.remove(&record.state.source_id) {
            Some(source) => record.source = Some(source),
            None => record.state.fail(
                FailureReason::UnexpectedError,
                "source record no longer exists",
            ),
        }
    }

    if !with_target {
        return;
    }
    let target_ids: Vec<WorkItemId> = batch
        .active()
        .filter_map(|record| record.state.target_id())
        .collect();
    if target_ids.is_empty() {
        return;
    }
    let mut targets =
        match fetch_by_id(ctx, Endpoint::Target, batch.id, &target_ids, Expand::All).await {
            Ok(targets) => targets,
            Err(err) => {
                error!(batch_id = %batch.id, %err, "Failed to read target records");
                for record in batch.active_mut() {
                    record.state.fail(
                        FailureReason::CriticalError,
                        format!("failed to read target record: {err}"),
                    );
                }
                return;
            }
        };
    for record in batch.active_mut() {
        if let Some(target_id) = record.state.target_id() {
            record.target = targets.remove(&target_id);
        }
    }
}

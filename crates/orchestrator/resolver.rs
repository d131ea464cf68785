//! Decides, before any write, what each selected record needs.
//!
//! A record without a target counterpart is created. A record with exactly one is
//! compared against the sync token found on the counterpart's cross-reference.

use std::collections::HashMap;
use std::sync::Arc;

use ferry_common::{
    Classification, FailureReason, FlagSet, RecordState, Requirement, SyncToken, WorkItem,
    WorkItemId,
};
use ferry_remote::{Expand, http::MAX_IDS_PER_FETCH};
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use crate::context::MigrationContext;

/// What an existing target record needs, judged from its sync token. The flag is set
/// when the source changed since the token was written.
pub fn requirements_for(
    token: &SyncToken,
    source_rev: i64,
    enabled_phases: &[String],
) -> (FlagSet<Requirement>, bool) {
    if token.revision != source_rev {
        return (
            FlagSet::of(&[Requirement::UpdatePhase1, Requirement::UpdatePhase2]),
            true,
        );
    }
    if !token.covers(enabled_phases.iter().map(String::as_str)) {
        return (FlagSet::of(&[Requirement::UpdatePhase2]), false);
    }
    (FlagSet::empty(), false)
}

pub struct SyncResolver {
    ctx: Arc<MigrationContext>,
    span: Span,
}

impl SyncResolver {
    pub fn new(ctx: Arc<MigrationContext>, span: Span) -> Self {
        Self { ctx, span }
    }

    /// Classifies every state. Lookup failures fail the affected records only.
    pub async fn resolve(&self, states: &mut [RecordState]) {
        async {
            for chunk in states.chunks_mut(MAX_IDS_PER_FETCH) {
                self.resolve_chunk(chunk).await;
            }
            let existing = states
                .iter()
                .filter(|s| s.classification() == Classification::Existing)
                .count();
            let create = states
                .iter()
                .filter(|s| s.classification() == Classification::Create)
                .count();
            info!(create, existing, "Resolved target counterparts");
        }
        .instrument(self.span.clone())
        .await
    }

    async fn resolve_chunk(&self, chunk: &mut [RecordState]) {
        let retry = self.ctx.retry_policy(Span::current());
        let urls: Vec<String> = chunk.iter().map(|s| s.source_url.clone()).collect();
        let matches = match retry
            .run(
                "query_by_cross_reference",
                Uuid::new_v4(),
                || self.ctx.target.query_by_cross_reference(&urls),
                None,
            )
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                error!(%err, records = chunk.len(), "Cross-reference lookup failed");
                for state in chunk.iter_mut() {
                    state.fail(
                        FailureReason::CriticalError,
                        format!("could not look up target counterpart: {err}"),
                    );
                }
                return;
            }
        };

        for state in chunk.iter_mut() {
            let found = matches.get(&state.source_url).map(Vec::as_slice).unwrap_or_default();
            let outcome = match found {
                [] => state.classify(Classification::Create),
                [target_id] => {
                    self.ctx.id_map.insert_if_absent(state.source_id, *target_id);
                    state
                        .classify(Classification::Existing)
                        .and_then(|()| state.assign_target_id(*target_id))
                }
                several => {
                    state.fail(
                        FailureReason::DuplicateCrossReference,
                        format!("target records {several:?} all point at this source record"),
                    );
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                state.fail(FailureReason::UnexpectedError, err.to_string());
            }
        }

        let target_ids: Vec<WorkItemId> = chunk
            .iter()
            .filter(|s| s.classification() == Classification::Existing)
            .filter_map(RecordState::target_id)
            .collect();
        if target_ids.is_empty() {
            return;
        }
        let targets: HashMap<WorkItemId, WorkItem> = match retry
            .run(
                "fetch_records",
                Uuid::new_v4(),
                || self.ctx.target.fetch_records(&target_ids, Expand::Relations),
                None,
            )
            .await
        {
            Ok(items) => items.into_iter().map(|item| (item.id, item)).collect(),
            Err(err) => {
                error!(%err, "Failed to read existing target records");
                for state in chunk
                    .iter_mut()
                    .filter(|s| s.classification() == Classification::Existing)
                {
                    state.fail(
                        FailureReason::CriticalError,
                        format!("failed to read target record: {err}"),
                    );
                }
                return;
            }
        };

        for state in chunk
            .iter_mut()
            .filter(|s| s.classification() == Classification::Existing)
        {
            let target = state.target_id().and_then(|id| targets.get(&id));
            self.evaluate(state, target);
        }
    }

    fn evaluate(&self, state: &mut RecordState, target: Option<&WorkItem>) {
        let Some(target) = target else {
            state.fail(
                FailureReason::MissingCrossReference,
                "target counterpart could not be read",
            );
            return;
        };
        let index = match target.cross_reference_indexes(&state.source_url).as_slice() {
            [index] => *index,
            [] => {
                state.fail(
                    FailureReason::MissingCrossReference,
                    format!("target record {} has no cross-reference", target.id),
                );
                return;
            }
            several => {
                state.fail(
                    FailureReason::DuplicateCrossReference,
                    format!("target record {} has {} cross-references", target.id, several.len()),
                );
                return;
            }
        };
        state.cross_reference_index = Some(index);

        let comment = target.relations[index].comment().unwrap_or_default();
        match comment.parse::<SyncToken>() {
            Ok(token) => {
                let (requirements, changed) =
                    requirements_for(&token, state.source_rev, self.ctx.enabled_relation_phases());
                for requirement in requirements.iter() {
                    state.require(requirement);
                }
                if changed {
                    self.ctx.mark_source_changed(state.source_id);
                }
                debug!(
                    source_id = state.source_id,
                    token = %token,
                    ?requirements,
                    "Existing target record"
                );
                state.sync_token = Some(token);
            }
            Err(err) => {
                warn!(
                    source_id = state.source_id,
                    %comment,
                    %err,
                    "Unreadable sync token, updating the record fully"
                );
                state.require(Requirement::UpdatePhase1);
                state.require(Requirement::UpdatePhase2);
            }
        }
    }
}

//! Per-record outcome of a run.

use ferry_common::{Classification, FailureReason, FlagSet, Phase, RecordState, WorkItemId};
use serde::Serialize;
use uuid::Uuid;

use crate::context::MigrationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    Updated,
    SkippedUnchanged,
    Failed,
}

impl RecordOutcome {
    pub fn of(state: &RecordState) -> Self {
        if state.is_failed() {
            return RecordOutcome::Failed;
        }
        let wrote = state.has_phase(Phase::CoreFields) || state.has_phase(Phase::Relations);
        match state.classification() {
            Classification::Create if state.has_phase(Phase::CoreFields) => RecordOutcome::Created,
            Classification::Existing if wrote => RecordOutcome::Updated,
            _ => RecordOutcome::SkippedUnchanged,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub source_id: WorkItemId,
    pub target_id: Option<WorkItemId>,
    pub outcome: RecordOutcome,
    /// The source was edited after the previous run copied it.
    pub source_changed: bool,
    #[serde(skip_serializing_if = "FlagSet::is_empty")]
    pub reasons: FlagSet<FailureReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub created: usize,
    pub updated: usize,
    pub skipped_unchanged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub totals: ReportTotals,
    pub records: Vec<RecordReport>,
}

impl MigrationReport {
    pub fn new(run_id: Uuid, states: &[RecordState], ctx: &MigrationContext) -> Self {
        let mut totals = ReportTotals::default();
        let records = states
            .iter()
            .map(|state| {
                let outcome = RecordOutcome::of(state);
                match outcome {
                    RecordOutcome::Created => totals.created += 1,
                    RecordOutcome::Updated => totals.updated += 1,
                    RecordOutcome::SkippedUnchanged => totals.skipped_unchanged += 1,
                    RecordOutcome::Failed => totals.failed += 1,
                }
                RecordReport {
                    source_id: state.source_id,
                    target_id: state.target_id(),
                    outcome,
                    source_changed: ctx.is_source_changed(state.source_id),
                    reasons: state.failure_reasons(),
                    messages: state.messages().to_vec(),
                }
            })
            .collect();
        Self {
            run_id,
            totals,
            records,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }

    pub fn record(&self, source_id: WorkItemId) -> Option<&RecordReport> {
        self.records.iter().find(|r| r.source_id == source_id)
    }
}

use std::{collections::HashMap, sync::Arc};

use ferry_common::{Flag, RecordState, WorkItemId};
use futures::{StreamExt, stream};
use tracing::{Instrument, Span, info, info_span};

use crate::{
    batch::BatchContext, context::MigrationContext, executor::BatchExecutor,
    phases::PhaseStrategy,
};

/// Drives records through the phases in order.
///
/// Within a phase, batches run concurrently up to the configured parallelism. A phase
/// only starts once every batch of the previous one has finished.
pub struct PhasePipeline {
    ctx: Arc<MigrationContext>,
    phases: Vec<Box<dyn PhaseStrategy>>,
    span: Span,
}

impl PhasePipeline {
    pub fn new(ctx: Arc<MigrationContext>, phases: Vec<Box<dyn PhaseStrategy>>, span: Span) -> Self {
        Self { ctx, phases, span }
    }

    /// Returns the states in the order they were given.
    pub async fn run(&self, states: Vec<RecordState>) -> Vec<RecordState> {
        let order: HashMap<WorkItemId, usize> = states
            .iter()
            .enumerate()
            .map(|(position, state)| (state.source_id, position))
            .collect();
        let batch_size = self.ctx.config.batch.size.max(1);
        let parallelism = self.ctx.config.batch.parallelism.max(1);

        let mut states = states;
        for strategy in &self.phases {
            let phase = strategy.phase().name();
            if !strategy.is_enabled(&self.ctx.config) {
                info!(parent: &self.span, phase, "Phase disabled, skipping");
                continue;
            }
            let (eligible, mut done): (Vec<_>, Vec<_>) =
                states.into_iter().partition(|state| strategy.is_eligible(state));
            if eligible.is_empty() {
                info!(parent: &self.span, phase, "No eligible records");
                states = done;
                continue;
            }

            let batches = into_batches(eligible, batch_size);
            info!(
                parent: &self.span,
                phase,
                batches = batches.len(),
                parallelism,
                "Starting phase"
            );
            let processed: Vec<Vec<RecordState>> = stream::iter(batches)
                .map(|records| self.run_batch(strategy.as_ref(), records))
                .buffer_unordered(parallelism)
                .collect()
                .await;
            done.extend(processed.into_iter().flatten());
            let failed = done.iter().filter(|state| state.is_failed()).count();
            info!(parent: &self.span, phase, failed, "Phase finished");
            states = done;
        }

        states.sort_by_key(|state| order.get(&state.source_id).copied().unwrap_or(usize::MAX));
        states
    }

    async fn run_batch(&self, strategy: &dyn PhaseStrategy, records: Vec<RecordState>) -> Vec<RecordState> {
        let mut batch = BatchContext::new(strategy.phase(), records);
        let span = info_span!(
            parent: &self.span,
            "batch",
            phase = strategy.phase().name(),
            batch_id = %batch.id,
            records = batch.len()
        );
        async {
            strategy.prepare(&self.ctx, &mut batch).await;
            let requests = strategy.build_requests(&self.ctx, &mut batch);
            BatchExecutor::new(&self.ctx, strategy.endpoint(), span.clone())
                .execute(
                    &mut batch,
                    requests,
                    strategy,
                    strategy.verifies_creates(&self.ctx.config),
                )
                .await;
            strategy.finish(&self.ctx, &mut batch, &span).await;
            batch.into_states()
        }
        .instrument(span.clone())
        .await
    }
}

fn into_batches(records: Vec<RecordState>, size: usize) -> Vec<Vec<RecordState>> {
    let mut batches = Vec::with_capacity(records.len().div_ceil(size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        batches.push(records.by_ref().take(size).collect());
    }
    batches
}

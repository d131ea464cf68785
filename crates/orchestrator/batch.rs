use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ferry_common::{Phase, RecordState, SyncToken, WorkItem, WorkItemId};
use uuid::Uuid;

/// One record inside a batch, with the content fetched for the current phase.
#[derive(Debug)]
pub struct BatchRecord {
    pub state: RecordState,
    pub source: Option<WorkItem>,
    pub target: Option<WorkItem>,
    /// Token written by this batch's request, adopted once the write succeeds.
    pub pending_token: Option<SyncToken>,
}

impl BatchRecord {
    pub fn new(state: RecordState) -> Self {
        Self {
            state,
            source: None,
            target: None,
            pending_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_failed()
    }
}

/// Per-batch side tables filled by pre-processors.
#[derive(Debug, Default)]
pub struct BatchTables {
    /// Attachment url on the source to the url of its copy on the target.
    pub attachment_urls: HashMap<String, String>,
    /// Target field catalogue per work item type.
    pub target_fields: HashMap<String, Arc<HashSet<String>>>,
}

/// Everything one batch owns while it moves through one phase. Dropped when the batch
/// is done; the record states are handed back to the pipeline.
#[derive(Debug)]
pub struct BatchContext {
    pub id: Uuid,
    pub phase: Phase,
    pub records: Vec<BatchRecord>,
    pub tables: BatchTables,
}

impl BatchContext {
    pub fn new(phase: Phase, states: Vec<RecordState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
            records: states.into_iter().map(BatchRecord::new).collect(),
            tables: BatchTables::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = &BatchRecord> {
        self.records.iter().filter(|record| record.is_active())
    }

    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut BatchRecord> {
        self.records.iter_mut().filter(|record| record.is_active())
    }

    pub fn active_ids(&self) -> Vec<WorkItemId> {
        self.active().map(|record| record.state.source_id).collect()
    }

    pub fn record_mut(&mut self, source_id: WorkItemId) -> Option<&mut BatchRecord> {
        self.records
            .iter_mut()
            .find(|record| record.state.source_id == source_id)
    }

    pub fn into_states(self) -> Vec<RecordState> {
        self.records.into_iter().map(|record| record.state).collect()
    }
}

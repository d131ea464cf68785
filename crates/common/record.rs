//! Per-record migration state.
//!
//! A `RecordState` is created for every source record selected by the run and lives
//! until the run ends. Classification is set once; afterwards it can only move to
//! `Error`, which is terminal. Completed phases and failure reasons only ever grow.

use serde::Serialize;
use thiserror::Error;

use crate::{
    flags::{Flag, FlagSet},
    sync_token::SyncToken,
    work_item::WorkItemId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Unclassified,
    Create,
    Existing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CoreFields,
    Relations,
    PostMove,
}

impl Flag for Phase {
    const ALL: &'static [Self] = &[Phase::CoreFields, Phase::Relations, Phase::PostMove];

    fn bit(self) -> u32 {
        self as u32
    }

    fn name(self) -> &'static str {
        match self {
            Phase::CoreFields => "phase1",
            Phase::Relations => "phase2",
            Phase::PostMove => "phase3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    UpdatePhase1,
    UpdatePhase2,
}

impl Flag for Requirement {
    const ALL: &'static [Self] = &[Requirement::UpdatePhase1, Requirement::UpdatePhase2];

    fn bit(self) -> u32 {
        self as u32
    }

    fn name(self) -> &'static str {
        match self {
            Requirement::UpdatePhase1 => "update_phase1",
            Requirement::UpdatePhase2 => "update_phase2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UnsupportedWorkItemType,
    UnsupportedField,
    CrossProjectMismatch,
    BadRequest,
    CriticalError,
    UnexpectedError,
    AttachmentTransfer,
    EmbeddedReference,
    DuplicateLink,
    DuplicateCrossReference,
    MissingCrossReference,
    CreateBatchFailure,
}

impl Flag for FailureReason {
    const ALL: &'static [Self] = &[
        FailureReason::UnsupportedWorkItemType,
        FailureReason::UnsupportedField,
        FailureReason::CrossProjectMismatch,
        FailureReason::BadRequest,
        FailureReason::CriticalError,
        FailureReason::UnexpectedError,
        FailureReason::AttachmentTransfer,
        FailureReason::EmbeddedReference,
        FailureReason::DuplicateLink,
        FailureReason::DuplicateCrossReference,
        FailureReason::MissingCrossReference,
        FailureReason::CreateBatchFailure,
    ];

    fn bit(self) -> u32 {
        self as u32
    }

    fn name(self) -> &'static str {
        match self {
            FailureReason::UnsupportedWorkItemType => "unsupported_work_item_type",
            FailureReason::UnsupportedField => "unsupported_field",
            FailureReason::CrossProjectMismatch => "cross_project_mismatch",
            FailureReason::BadRequest => "bad_request",
            FailureReason::CriticalError => "critical_error",
            FailureReason::UnexpectedError => "unexpected_error",
            FailureReason::AttachmentTransfer => "attachment_transfer",
            FailureReason::EmbeddedReference => "embedded_reference",
            FailureReason::DuplicateLink => "duplicate_link",
            FailureReason::DuplicateCrossReference => "duplicate_cross_reference",
            FailureReason::MissingCrossReference => "missing_cross_reference",
            FailureReason::CreateBatchFailure => "create_batch_failure_already_migrated",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordStateError {
    #[error("record {source_id} is already classified as {current:?}")]
    AlreadyClassified {
        source_id: WorkItemId,
        current: Classification,
    },
    #[error("record {source_id} already maps to target {existing}, refusing {attempted}")]
    TargetIdConflict {
        source_id: WorkItemId,
        existing: WorkItemId,
        attempted: WorkItemId,
    },
    #[error("record {source_id} has failed and cannot complete {phase:?}")]
    Failed { source_id: WorkItemId, phase: Phase },
}

#[derive(Debug, Clone)]
pub struct RecordState {
    pub source_id: WorkItemId,
    pub source_url: String,
    pub source_rev: i64,
    pub work_item_type: Option<String>,
    target_id: Option<WorkItemId>,
    classification: Classification,
    completed_phases: FlagSet<Phase>,
    failure_reasons: FlagSet<FailureReason>,
    requirement: FlagSet<Requirement>,
    /// Token decoded from the target on resolve. Phases are cleared when a write may
    /// have been partially applied upstream.
    pub sync_token: Option<SyncToken>,
    /// Position of the cross-reference relation in the target's relation list.
    pub cross_reference_index: Option<usize>,
    messages: Vec<String>,
}

impl RecordState {
    pub fn new(source_id: WorkItemId, source_url: impl Into<String>, source_rev: i64) -> Self {
        Self {
            source_id,
            source_url: source_url.into(),
            source_rev,
            work_item_type: None,
            target_id: None,
            classification: Classification::Unclassified,
            completed_phases: FlagSet::empty(),
            failure_reasons: FlagSet::empty(),
            requirement: FlagSet::empty(),
            sync_token: None,
            cross_reference_index: None,
            messages: Vec::new(),
        }
    }

    pub fn classify(&mut self, classification: Classification) -> Result<(), RecordStateError> {
        if self.classification != Classification::Unclassified {
            return Err(RecordStateError::AlreadyClassified {
                source_id: self.source_id,
                current: self.classification,
            });
        }
        self.classification = classification;
        Ok(())
    }

    pub fn assign_target_id(&mut self, target_id: WorkItemId) -> Result<(), RecordStateError> {
        match self.target_id {
            Some(existing) if existing != target_id => Err(RecordStateError::TargetIdConflict {
                source_id: self.source_id,
                existing,
                attempted: target_id,
            }),
            _ => {
                self.target_id = Some(target_id);
                Ok(())
            }
        }
    }

    /// Moves the record to the terminal `Error` classification.
    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.classification = Classification::Error;
        self.failure_reasons.add(reason);
        self.messages.push(message.into());
    }

    /// Records a non-fatal problem; the record keeps moving through the pipeline but
    /// is no longer eligible for post-move tagging.
    pub fn flag(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.failure_reasons.add(reason);
        self.messages.push(message.into());
    }

    pub fn complete_phase(&mut self, phase: Phase) -> Result<(), RecordStateError> {
        if self.is_failed() {
            return Err(RecordStateError::Failed {
                source_id: self.source_id,
                phase,
            });
        }
        self.completed_phases.add(phase);
        Ok(())
    }

    pub fn require(&mut self, requirement: Requirement) {
        self.requirement.add(requirement);
    }

    pub fn invalidate_phase_status(&mut self) {
        if let Some(token) = self.sync_token.as_mut() {
            token.clear_phases();
        }
    }

    pub fn target_id(&self) -> Option<WorkItemId> {
        self.target_id
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn completed_phases(&self) -> FlagSet<Phase> {
        self.completed_phases
    }

    pub fn failure_reasons(&self) -> FlagSet<FailureReason> {
        self.failure_reasons
    }

    pub fn requirement(&self) -> FlagSet<Requirement> {
        self.requirement
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_failed(&self) -> bool {
        self.classification == Classification::Error
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.completed_phases.contains(phase)
    }

    pub fn requires(&self, requirement: Requirement) -> bool {
        self.requirement.contains(requirement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RecordState {
        RecordState::new(5, "https://src/_apis/wit/workItems/5", 2)
    }

    #[test]
    fn classification_is_set_once() {
        let mut record = state();
        record.classify(Classification::Create).unwrap();
        assert_eq!(
            record.classify(Classification::Existing),
            Err(RecordStateError::AlreadyClassified {
                source_id: 5,
                current: Classification::Create
            })
        );
    }

    #[test]
    fn failure_is_terminal_and_blocks_phase_completion() {
        let mut record = state();
        record.classify(Classification::Create).unwrap();
        record.fail(FailureReason::BadRequest, "rejected");
        assert!(record.is_failed());
        assert!(record.complete_phase(Phase::CoreFields).is_err());
        assert!(record.classify(Classification::Existing).is_err());
        assert_eq!(record.messages(), ["rejected"]);
    }

    #[test]
    fn flagged_records_keep_their_classification() {
        let mut record = state();
        record.classify(Classification::Existing).unwrap();
        record.flag(FailureReason::AttachmentTransfer, "download failed");
        assert_eq!(record.classification(), Classification::Existing);
        assert!(record.failure_reasons().contains(FailureReason::AttachmentTransfer));
        assert!(record.complete_phase(Phase::Relations).is_ok());
    }

    #[test]
    fn target_id_is_immutable_once_set() {
        let mut record = state();
        record.assign_target_id(40).unwrap();
        record.assign_target_id(40).unwrap();
        assert!(matches!(
            record.assign_target_id(41),
            Err(RecordStateError::TargetIdConflict { existing: 40, .. })
        ));
        assert_eq!(record.target_id(), Some(40));
    }

    #[test]
    fn invalidation_clears_cached_phase_names_only() {
        let mut record = state();
        record.sync_token = Some(SyncToken::with_phases(2, ["links"]));
        record.invalidate_phase_status();
        assert_eq!(record.sync_token, Some(SyncToken::new(2)));
    }
}

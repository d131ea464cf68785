//! Turns the records of a batch into write requests.
//!
//! Phase 1 copies fields and, for new records, creates the cross-reference back to the
//! source. Phase 2 rebuilds the relation list. Both end with the sync token write, so a
//! request that succeeds always leaves a token describing what it did.

use std::collections::HashSet;

use ferry_common::{
    Classification, FailureReason, JsonPatchOperation, SyncToken, WorkItem, WorkItemRelation,
    work_item::{ATTR_COMMENT, FIELD_AREA_PATH, FIELD_ITERATION_PATH, REL_HYPERLINK},
};
use ferry_remote::WriteRequest;
use regex::Captures;
use serde_json::Value;
use tracing::debug;

use crate::{
    batch::{BatchContext, BatchRecord},
    context::MigrationContext,
    processors::{FieldProcessor, RelationProcessor},
};

/// Fields the service maintains itself. Writing them is rejected or silently dropped.
const READ_ONLY_FIELDS: &[&str] = &[
    "System.Id",
    "System.Rev",
    "System.RevisedDate",
    "System.AuthorizedDate",
    "System.AuthorizedAs",
    "System.Watermark",
    "System.TeamProject",
    "System.WorkItemType",
    "System.NodeName",
    "System.AreaId",
    "System.IterationId",
    "System.AreaLevel1",
    "System.IterationLevel1",
    "System.CommentCount",
    "System.AttachedFileCount",
    "System.HyperLinkCount",
    "System.ExternalLinkCount",
    "System.RelatedLinkCount",
    "System.RemoteLinkCount",
    "System.PersonId",
    "System.Parent",
    "System.BoardColumn",
    "System.BoardColumnDone",
    "System.BoardLane",
];

fn is_read_only(name: &str) -> bool {
    READ_ONLY_FIELDS
        .iter()
        .any(|field| field.eq_ignore_ascii_case(name))
}

pub struct BatchRequestBuilder<'a> {
    ctx: &'a MigrationContext,
}

impl<'a> BatchRequestBuilder<'a> {
    pub fn new(ctx: &'a MigrationContext) -> Self {
        Self { ctx }
    }

    /// Create and update requests for phase 1. Records with nothing to write get no
    /// request; a new record with nothing to write fails.
    pub fn core_field_requests(
        &self,
        batch: &mut BatchContext,
        field_processors: &[Box<dyn FieldProcessor>],
    ) -> Vec<WriteRequest> {
        let mut requests = Vec::new();
        let mut next_temporary_id = -1;

        for record in batch.records.iter_mut().filter(|r| r.is_active()) {
            let Some(source) = record.source.as_ref() else {
                record
                    .state
                    .fail(FailureReason::UnexpectedError, "source content was not loaded");
                continue;
            };
            let work_item_type = source.work_item_type().map(str::to_owned);
            let catalogue = work_item_type
                .as_deref()
                .and_then(|name| batch.tables.target_fields.get(name));

            let mut operations = self.field_operations(source, catalogue.map(|c| c.as_ref()));
            for processor in field_processors {
                operations.extend(processor.transform(self.ctx, record));
            }

            let source_id = record.state.source_id;
            if operations.is_empty() {
                if record.state.classification() == Classification::Create {
                    record.state.fail(
                        FailureReason::UnsupportedField,
                        "no source field can be written to the target type",
                    );
                } else {
                    debug!(source_id, "No field content to update");
                }
                continue;
            }

            let token = SyncToken::new(record.state.source_rev);
            let comment = token.to_string();
            match record.state.classification() {
                Classification::Create => {
                    let Some(work_item_type) = work_item_type else {
                        record.state.fail(
                            FailureReason::UnsupportedWorkItemType,
                            "source record has no work item type",
                        );
                        continue;
                    };
                    let cross_reference = WorkItemRelation::new(REL_HYPERLINK, &record.state.source_url)
                        .with_attribute(ATTR_COMMENT, comment);
                    let mut body = Vec::with_capacity(operations.len() + 2);
                    body.push(JsonPatchOperation::temporary_id(next_temporary_id));
                    next_temporary_id -= 1;
                    body.extend(operations);
                    body.push(JsonPatchOperation::add_relation(&cross_reference));
                    requests.push(WriteRequest::create(
                        source_id,
                        &self.ctx.config.target.project,
                        &work_item_type,
                        body,
                    ));
                }
                Classification::Existing => {
                    let (Some(target_id), Some(index)) =
                        (record.state.target_id(), record.state.cross_reference_index)
                    else {
                        record.state.fail(
                            FailureReason::MissingCrossReference,
                            "existing target record has no cross-reference",
                        );
                        continue;
                    };
                    operations.push(JsonPatchOperation::replace_relation_comment(index, &comment));
                    requests.push(WriteRequest::update(source_id, target_id, operations));
                }
                Classification::Unclassified | Classification::Error => continue,
            }
            record.pending_token = Some(token);
        }
        requests
    }

    /// Relation rebuild requests for phase 2, one per record with a target.
    pub fn relation_requests(
        &self,
        batch: &mut BatchContext,
        processors: &[Box<dyn RelationProcessor>],
    ) -> Vec<WriteRequest> {
        let mut requests = Vec::new();
        for record in batch.records.iter_mut().filter(|r| r.is_active()) {
            let Some(target_id) = record.state.target_id() else {
                continue;
            };
            let cross_references = match record.target.as_ref() {
                Some(target) => target.cross_reference_indexes(&record.state.source_url).len(),
                None => 0,
            };
            match cross_references {
                0 => {
                    record.state.fail(
                        FailureReason::MissingCrossReference,
                        format!("target record {target_id} has no cross-reference to the source"),
                    );
                    continue;
                }
                1 => {}
                count => {
                    record.state.fail(
                        FailureReason::DuplicateCrossReference,
                        format!("target record {target_id} has {count} cross-references to the source"),
                    );
                    continue;
                }
            }

            let mut body = Vec::new();
            for processor in processors {
                body.extend(processor.process(self.ctx, &batch.tables, record));
            }
            let completed: Vec<&str> = processors
                .iter()
                .filter(|processor| processor.is_complete_for(record))
                .map(|processor| processor.name())
                .collect();
            let token = SyncToken::with_phases(record.state.source_rev, completed);
            // Every other relation was removed above, so the cross-reference is first.
            body.push(JsonPatchOperation::replace_relation_comment(0, &token.to_string()));
            requests.push(WriteRequest::update(record.state.source_id, target_id, body));
            record.pending_token = Some(token);
        }
        requests
    }

    fn field_operations(
        &self,
        source: &WorkItem,
        catalogue: Option<&HashSet<String>>,
    ) -> Vec<JsonPatchOperation> {
        let rules = &self.ctx.config.fields;
        source
            .fields
            .iter()
            .filter(|(name, _)| !is_read_only(name))
            .filter(|(name, _)| !rules.ignored.iter().any(|ignored| ignored.eq_ignore_ascii_case(name)))
            .filter_map(|(name, value)| Some((self.target_field_name(name)?, value)))
            .filter(|(name, _)| {
                catalogue.is_none_or(|fields| fields.iter().any(|field| field.eq_ignore_ascii_case(name)))
            })
            .map(|(name, value)| {
                let value = self.map_value(&name, value);
                let value = self.substitute_project(&name, value);
                let value = self.substitute_content(value);
                JsonPatchOperation::add_field(&name, value)
            })
            .collect()
    }

    /// Name on the target, `None` when a replacement rule drops the field.
    fn target_field_name(&self, name: &str) -> Option<String> {
        match self
            .ctx
            .config
            .fields
            .replacements
            .iter()
            .find(|rule| rule.source.eq_ignore_ascii_case(name))
        {
            Some(rule) => rule.target.clone(),
            None => Some(name.to_owned()),
        }
    }

    fn map_value(&self, target_name: &str, value: &Value) -> Value {
        let mapped = self
            .ctx
            .config
            .fields
            .value_maps
            .get(target_name)
            .zip(value.as_str())
            .and_then(|(map, text)| map.get(text));
        match mapped {
            Some(mapped) => Value::from(mapped.as_str()),
            None => value.clone(),
        }
    }

    /// Area and iteration paths start with the project name.
    fn substitute_project(&self, target_name: &str, value: Value) -> Value {
        let is_path = target_name.eq_ignore_ascii_case(FIELD_AREA_PATH)
            || target_name.eq_ignore_ascii_case(FIELD_ITERATION_PATH);
        let Value::String(path) = value else {
            return value;
        };
        if !is_path {
            return Value::String(path);
        }
        let source_project = &self.ctx.config.source.project;
        let target_project = &self.ctx.config.target.project;
        Value::String(replace_project_prefix(&path, source_project, target_project))
    }

    fn substitute_content(&self, value: Value) -> Value {
        let Value::String(text) = value else {
            return value;
        };
        let text = self
            .ctx
            .patterns
            .record_reference
            .replace_all(&text, |captures: &Captures| self.retarget_reference(captures))
            .into_owned();
        let text = self
            .ctx
            .config
            .fields
            .content_substitutions
            .iter()
            .fold(text, |text, rule| text.replace(&rule.from, &rule.to));
        Value::String(text)
    }

    /// Points a reference to a migrated source record at its target counterpart.
    /// References to records that were not migrated are left alone.
    fn retarget_reference(&self, captures: &Captures) -> String {
        let original = &captures[0];
        captures[1]
            .parse()
            .ok()
            .and_then(|source_id| self.ctx.retarget_reference(original, source_id))
            .unwrap_or_else(|| original.to_owned())
    }
}

fn replace_project_prefix(path: &str, source_project: &str, target_project: &str) -> String {
    let Some(head) = path.get(..source_project.len()) else {
        return path.to_owned();
    };
    let rest = &path[source_project.len()..];
    if head.eq_ignore_ascii_case(source_project) && (rest.is_empty() || rest.starts_with('\\')) {
        format!("{target_project}{rest}")
    } else {
        path.to_owned()
    }
}

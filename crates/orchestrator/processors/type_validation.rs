use ferry_common::FailureReason;
use tracing::{debug, warn};

use super::PreProcessor;
use crate::{batch::BatchContext, context::MigrationContext};

/// Fails records whose type does not exist on the target or that belong to another
/// project than the configured source project. Stores the target field catalogue of
/// every type in the batch for field filtering.
pub struct TypeValidation;

#[async_trait::async_trait]
impl PreProcessor for TypeValidation {
    fn name(&self) -> &'static str {
        "type-validation"
    }

    fn priority(&self) -> u32 {
        10
    }

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        let source_project = ctx.config.source.project.as_str();
        for record in batch.records.iter_mut().filter(|r| r.is_active()) {
            let Some(source) = record.source.as_ref() else {
                continue;
            };
            if let Some(project) = source.team_project() {
                if !project.eq_ignore_ascii_case(source_project) {
                    let message = format!(
                        "source record {} belongs to project {project}, expected {source_project}",
                        source.id
                    );
                    record.state.fail(FailureReason::CrossProjectMismatch, message);
                    continue;
                }
            }
            let Some(work_item_type) = source.work_item_type().map(str::to_owned) else {
                record.state.fail(
                    FailureReason::UnsupportedWorkItemType,
                    "source record has no work item type",
                );
                continue;
            };

            match ctx.target_type_fields(&work_item_type).await {
                Ok(Some(fields)) => {
                    debug!(%work_item_type, fields = fields.len(), "Target type available");
                    batch.tables.target_fields.insert(work_item_type, fields);
                }
                Ok(None) => record.state.fail(
                    FailureReason::UnsupportedWorkItemType,
                    format!("work item type {work_item_type} does not exist on the target"),
                ),
                Err(err) => {
                    warn!(%work_item_type, %err, "Could not read target type fields");
                    record.state.fail(
                        FailureReason::UnexpectedError,
                        format!("failed to read fields of {work_item_type}: {err}"),
                    );
                }
            }
        }
    }
}

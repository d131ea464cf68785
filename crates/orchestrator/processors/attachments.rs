use ferry_common::{
    FailureReason, JsonPatchOperation,
    work_item::{ATTR_NAME, REL_ATTACHED_FILE},
};
use ferry_config::MigrationConfig;
use ferry_remote::RemoteError;
use serde_json::Value;
use tracing::{Span, debug, warn};
use uuid::Uuid;

use super::{RelationProcessor, copy_relation};
use crate::{
    batch::{BatchContext, BatchRecord, BatchTables},
    context::MigrationContext,
};

/// Re-uploads attached files to the target and re-attaches them.
pub struct Attachments;

#[async_trait::async_trait]
impl RelationProcessor for Attachments {
    fn name(&self) -> &'static str {
        "attachments"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.relations.attachments
    }

    async fn preprocess(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        for record in batch.records.iter_mut().filter(|r| r.is_active()) {
            let Some(source) = record.source.as_ref() else {
                continue;
            };
            let files: Vec<(String, String)> = source
                .relations
                .iter()
                .filter(|relation| relation.rel == REL_ATTACHED_FILE)
                .map(|relation| {
                    let name = relation
                        .attributes
                        .get(ATTR_NAME)
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| file_name_from_url(&relation.url));
                    (relation.url.clone(), name)
                })
                .collect();

            for (url, name) in files {
                if batch.tables.attachment_urls.contains_key(&url) {
                    continue;
                }
                match transfer_attachment(ctx, &url, &name).await {
                    Ok(target_url) => {
                        debug!(source_id = record.state.source_id, file = %name, "Attachment copied");
                        batch.tables.attachment_urls.insert(url, target_url);
                    }
                    Err(err) => {
                        warn!(source_id = record.state.source_id, file = %name, %err, "Attachment transfer failed");
                        record.state.flag(
                            FailureReason::AttachmentTransfer,
                            format!("attachment {name}: {err}"),
                        );
                    }
                }
            }
        }
    }

    fn process(
        &self,
        _ctx: &MigrationContext,
        tables: &BatchTables,
        record: &mut BatchRecord,
    ) -> Vec<JsonPatchOperation> {
        let Some(source) = record.source.as_ref() else {
            return Vec::new();
        };
        source
            .relations
            .iter()
            .filter(|relation| relation.rel == REL_ATTACHED_FILE)
            .filter_map(|relation| {
                let target_url = tables.attachment_urls.get(&relation.url)?;
                Some(JsonPatchOperation::add_relation(&copy_relation(
                    relation, target_url,
                )))
            })
            .collect()
    }

    fn is_complete_for(&self, record: &BatchRecord) -> bool {
        !record
            .state
            .failure_reasons()
            .contains(FailureReason::AttachmentTransfer)
    }
}

/// Downloads `url` from the source and uploads it to the target, returning the new url.
pub(super) async fn transfer_attachment(
    ctx: &MigrationContext,
    url: &str,
    file_name: &str,
) -> Result<String, RemoteError> {
    let retry = ctx.retry_policy(Span::current());
    let content = retry
        .run(
            "download_attachment",
            Uuid::new_v4(),
            || ctx.source.download_attachment(url),
            None,
        )
        .await?;
    retry
        .run(
            "upload_attachment",
            Uuid::new_v4(),
            || ctx.target.upload_attachment(file_name, content.clone()),
            None,
        )
        .await
}

/// `fileName` query parameter, or the last path segment.
pub(super) fn file_name_from_url(url: &str) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("fileName="))
        .filter(|name| !name.is_empty())
        .or_else(|| path.rsplit('/').next().filter(|segment| !segment.is_empty()))
        .unwrap_or("attachment")
        .to_owned()
}

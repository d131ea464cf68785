use ferry_common::FailureReason;
use ferry_config::MigrationConfig;
use serde_json::Value;
use tracing::debug;

use super::{
    PreProcessor,
    attachments::{file_name_from_url, transfer_attachment},
};
use crate::{batch::BatchContext, context::MigrationContext};

const ATTACHMENT_PATH: &str = "/_apis/wit/attachments/";

/// Copies images embedded in rich text fields to the target and rewrites their urls.
/// A record whose images cannot be copied fails: its content would point back at the
/// source otherwise.
pub struct InlineImages;

#[async_trait::async_trait]
impl PreProcessor for InlineImages {
    fn name(&self) -> &'static str {
        "inline-images"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn is_enabled(&self, config: &MigrationConfig) -> bool {
        config.fields.inline_images
    }

    async fn prepare(&self, ctx: &MigrationContext, batch: &mut BatchContext) {
        let source_base = ctx
            .config
            .source
            .url
            .trim_end_matches('/')
            .to_ascii_lowercase();

        'records: for record in batch.records.iter_mut().filter(|r| r.is_active()) {
            let Some(source) = record.source.as_mut() else {
                continue;
            };
            let embedded: Vec<(String, Vec<String>)> = source
                .fields
                .iter()
                .filter_map(|(name, value)| {
                    let text = value.as_str()?;
                    let urls: Vec<String> = ctx
                        .patterns
                        .inline_image
                        .captures_iter(text)
                        .map(|captures| captures[1].to_owned())
                        .filter(|url| is_source_attachment(url, &source_base))
                        .collect();
                    (!urls.is_empty()).then(|| (name.clone(), urls))
                })
                .collect();

            for (field, urls) in embedded {
                for url in urls {
                    let target_url = match batch.tables.attachment_urls.get(&url) {
                        Some(known) => known.clone(),
                        None => {
                            let download_url = url.replace("&amp;", "&");
                            let name = file_name_from_url(&download_url);
                            match transfer_attachment(ctx, &download_url, &name).await {
                                Ok(copied) => {
                                    batch.tables.attachment_urls.insert(url.clone(), copied.clone());
                                    copied
                                }
                                Err(err) => {
                                    record.state.fail(
                                        FailureReason::EmbeddedReference,
                                        format!("embedded image in {field}: {err}"),
                                    );
                                    continue 'records;
                                }
                            }
                        }
                    };
                    if let Some(Value::String(text)) = source.fields.get_mut(&field) {
                        *text = text.replace(&url, &target_url);
                    }
                }
                debug!(source_id = source.id, %field, "Embedded images rewritten");
            }
        }
    }
}

fn is_source_attachment(url: &str, source_base: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    lowered.starts_with(source_base) && lowered.contains(ATTACHMENT_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_attachments_are_transferred() {
        let base = "https://dev.example.com/old";
        assert!(is_source_attachment(
            "https://DEV.example.com/old/_apis/wit/attachments/1?fileName=a.png",
            base
        ));
        assert!(!is_source_attachment("https://cdn.example.com/a.png", base));
        assert!(!is_source_attachment("https://dev.example.com/old/images/a.png", base));
    }
}

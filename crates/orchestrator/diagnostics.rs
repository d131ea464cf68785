//! Raw dumps of batches that did not fully succeed, for offline inspection.

use std::path::PathBuf;

use ferry_common::{Flag, Phase};
use ferry_remote::{BatchItemResponse, WriteRequest};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct FailedBatch<'a> {
    batch_id: Uuid,
    phase: &'static str,
    error: Option<&'a str>,
    requests: &'a [WriteRequest],
    responses: Option<&'a [BatchItemResponse]>,
}

impl Diagnostics {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn file_path(&self, batch_id: Uuid) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("batch-{batch_id}.json")))
    }

    /// Writes `batch-<id>.json`. Never fails the caller; problems are only logged.
    pub async fn record_failed_batch(
        &self,
        batch_id: Uuid,
        phase: Phase,
        requests: &[WriteRequest],
        responses: Option<&[BatchItemResponse]>,
        error: Option<&str>,
    ) {
        let Some(path) = self.file_path(batch_id) else {
            debug!(%batch_id, "No diagnostics directory configured, skipping batch dump");
            return;
        };
        let dump = FailedBatch {
            batch_id,
            phase: phase.name(),
            error,
            requests,
            responses,
        };
        let bytes = match serde_json::to_vec_pretty(&dump) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%batch_id, %err, "Failed to serialize batch dump");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                warn!(%batch_id, %err, "Failed to create diagnostics directory");
                return;
            }
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => warn!(%batch_id, path = %path.display(), "Batch had failures, dump written"),
            Err(err) => warn!(%batch_id, %err, "Failed to write batch dump"),
        }
    }
}

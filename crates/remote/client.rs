use std::{collections::HashMap, fmt::Debug};

use bytes::Bytes;
use ferry_common::{WorkItem, WorkItemId};

use crate::{
    error::RemoteError,
    types::{BatchItemResponse, Expand, WriteRequest},
};

/// Access to one instance of the tracking service.
///
/// The orchestrator only talks to endpoints through this trait so the same pipeline
/// can run against the HTTP client or the in-memory one used by tests.
#[async_trait::async_trait]
pub trait RemoteClient: Debug + Send + Sync {
    /// Project every query and create request is scoped to.
    fn project(&self) -> &str;

    /// Canonical url of a record on this endpoint. Cross-references store this value.
    fn record_url(&self, id: WorkItemId) -> String;

    /// Submits a batch of writes. Responses are positional: entry `i` answers request
    /// `i`. `Ok(None)` means the service answered without a response list.
    async fn submit_batch(
        &self,
        requests: &[WriteRequest],
    ) -> Result<Option<Vec<BatchItemResponse>>, RemoteError>;

    /// Finds target records whose cross-reference relation points at one of `urls`.
    /// Every requested url is present in the result, possibly with no matches.
    async fn query_by_cross_reference(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, Vec<WorkItemId>>, RemoteError>;

    /// Fetches records by id. Ids that do not exist are omitted from the result.
    async fn fetch_records(
        &self,
        ids: &[WorkItemId],
        expand: Expand,
    ) -> Result<Vec<WorkItem>, RemoteError>;

    /// Runs a stored query and returns the matching ids in service order.
    async fn run_query(&self, query: &str) -> Result<Vec<WorkItemId>, RemoteError>;

    /// Reference names of the fields defined for `work_item_type`, or `None` when the
    /// type does not exist on this endpoint.
    async fn work_item_type_fields(
        &self,
        work_item_type: &str,
    ) -> Result<Option<Vec<String>>, RemoteError>;

    async fn download_attachment(&self, url: &str) -> Result<Bytes, RemoteError>;

    /// Uploads file content and returns the url to reference it by.
    async fn upload_attachment(&self, file_name: &str, content: Bytes)
    -> Result<String, RemoteError>;
}

//! HTTP client for the tracking service REST API.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use ferry_common::{WorkItem, WorkItemId, work_item::REL_HYPERLINK};
use reqwest::{Method, RequestBuilder, Response, header::CONTENT_TYPE};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    client::RemoteClient,
    error::RemoteError,
    types::{API_VERSION, BatchItemResponse, BatchResponse, Expand, WriteRequest, encode_path_segment},
};

/// The record fetch endpoint rejects larger id lists.
pub const MAX_IDS_PER_FETCH: usize = 200;

/// Every target record that carries at least one hyperlink; cross-references are
/// matched client-side because hyperlink urls are not queryable.
const CROSS_REFERENCE_QUERY: &str = "SELECT [System.Id] FROM WorkItems \
     WHERE [System.TeamProject] = @project AND [System.HyperLinkCount] > 0";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout. Batch writes can take very long on a loaded service.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Hyperlink urls of the target records read so far, lowercased without a trailing
/// slash. Records this client writes to are dropped and read again on the next lookup.
#[derive(Debug, Default)]
struct HyperlinkIndex {
    links: HashMap<WorkItemId, Vec<String>>,
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_ascii_lowercase()
}

impl HyperlinkIndex {
    fn missing(&self, candidates: &[WorkItemId]) -> Vec<WorkItemId> {
        candidates
            .iter()
            .copied()
            .filter(|id| !self.links.contains_key(id))
            .collect()
    }

    fn insert(&mut self, item: &WorkItem) {
        let links = item
            .relations
            .iter()
            .filter(|relation| relation.rel == REL_HYPERLINK)
            .map(|relation| normalize_url(&relation.url))
            .collect();
        self.links.insert(item.id, links);
    }

    fn forget(&mut self, ids: impl IntoIterator<Item = WorkItemId>) {
        for id in ids {
            self.links.remove(&id);
        }
    }

    /// Candidates with a hyperlink to each of `urls`. Every url is present in the
    /// result.
    fn matches(&self, candidates: &[WorkItemId], urls: &[String]) -> HashMap<String, Vec<WorkItemId>> {
        let mut wanted: HashMap<String, Vec<&String>> = HashMap::new();
        for url in urls {
            wanted.entry(normalize_url(url)).or_default().push(url);
        }
        let mut matches: HashMap<String, Vec<WorkItemId>> =
            urls.iter().map(|url| (url.clone(), Vec::new())).collect();
        for id in candidates {
            let Some(links) = self.links.get(id) else {
                continue;
            };
            for requested in links.iter().filter_map(|link| wanted.get(link)).flatten() {
                if let Some(ids) = matches.get_mut(*requested) {
                    if !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }
        matches
    }
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    token: Option<String>,
    config: HttpClientConfig,
    hyperlinks: Arc<Mutex<HyperlinkIndex>>,
}

impl fmt::Debug for HttpRemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WiqlReference>,
}

#[derive(Deserialize)]
struct WiqlReference {
    id: WorkItemId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldReference {
    reference_name: String,
}

#[derive(Deserialize)]
struct AttachmentReference {
    url: String,
}

impl HttpRemoteClient {
    pub fn new(
        base_url: &str,
        project: &str,
        token: Option<String>,
        config: HttpClientConfig,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| RemoteError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            project: project.to_owned(),
            token,
            config,
            hyperlinks: Arc::default(),
        })
    }

    fn hyperlinks(&self) -> MutexGuard<'_, HyperlinkIndex> {
        self.hyperlinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn post_batch(
        &self,
        requests: &[WriteRequest],
    ) -> Result<Option<Vec<BatchItemResponse>>, RemoteError> {
        const OPERATION: &str = "submit_batch";
        let url = format!("{}/_apis/wit/$batch?api-version={API_VERSION}", self.base_url);
        let response = self
            .send(OPERATION, self.request(Method::POST, &url).json(requests))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::decode(OPERATION, e))?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        let parsed: BatchResponse =
            serde_json::from_str(trimmed).map_err(|e| RemoteError::decode(OPERATION, e))?;
        Ok(Some(parsed.value))
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/{}/_apis/wit/{path}",
            self.base_url,
            encode_path_segment(&self.project)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.basic_auth("", Some(token)),
            None => builder,
        }
    }

    fn transport_error(&self, operation: &str, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                operation: operation.into(),
                elapsed_ms: self.config.timeout.as_millis() as u64,
            }
        } else {
            RemoteError::ConnectionFailed {
                url: self.base_url.clone(),
                cause: err.to_string(),
            }
        }
    }

    /// Single attempt, no retry. Retrying is the orchestrator's decision.
    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (error_key, message) = parse_error_body(&body);
        Err(RemoteError::Http {
            operation: operation.into(),
            status: status.as_u16(),
            error_key,
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.send(operation, builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::decode(operation, e))
    }
}

/// Splits a service error body into its error key and message.
fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let key = value
                .get("typeKey")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| body.to_owned());
            (key, message)
        }
        Err(_) => (None, body.to_owned()),
    }
}

#[async_trait::async_trait]
impl RemoteClient for HttpRemoteClient {
    fn project(&self) -> &str {
        &self.project
    }

    fn record_url(&self, id: WorkItemId) -> String {
        format!("{}/_apis/wit/workItems/{id}", self.base_url)
    }

    async fn submit_batch(
        &self,
        requests: &[WriteRequest],
    ) -> Result<Option<Vec<BatchItemResponse>>, RemoteError> {
        debug!(requests = requests.len(), "Submitting batch");
        let result = self.post_batch(requests).await;
        // Any of the updates may have landed, even when the call failed.
        self.hyperlinks()
            .forget(requests.iter().filter_map(WriteRequest::target_id));
        result
    }

    async fn query_by_cross_reference(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, Vec<WorkItemId>>, RemoteError> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }
        let candidates = self.run_query(CROSS_REFERENCE_QUERY).await?;
        let missing = self.hyperlinks().missing(&candidates);
        if !missing.is_empty() {
            debug!(
                candidates = candidates.len(),
                fetching = missing.len(),
                "Reading hyperlinks of target records"
            );
            let items = self.fetch_records(&missing, Expand::Relations).await?;
            let mut index = self.hyperlinks();
            for item in &items {
                index.insert(item);
            }
        }
        Ok(self.hyperlinks().matches(&candidates, urls))
    }

    async fn fetch_records(
        &self,
        ids: &[WorkItemId],
        expand: Expand,
    ) -> Result<Vec<WorkItem>, RemoteError> {
        let url = self.project_url(&format!("workitemsbatch?api-version={API_VERSION}"));
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_FETCH) {
            let body = json!({
                "ids": chunk,
                "$expand": expand.as_str(),
                "errorPolicy": "omit",
            });
            let response: ListResponse<Option<WorkItem>> = self
                .send_json("fetch_records", self.request(Method::POST, &url).json(&body))
                .await?;
            records.extend(response.value.into_iter().flatten());
        }
        Ok(records)
    }

    async fn run_query(&self, query: &str) -> Result<Vec<WorkItemId>, RemoteError> {
        let url = self.project_url(&format!("wiql?api-version={API_VERSION}"));
        let response: WiqlResponse = self
            .send_json(
                "run_query",
                self.request(Method::POST, &url).json(&json!({ "query": query })),
            )
            .await?;
        Ok(response.work_items.into_iter().map(|r| r.id).collect())
    }

    async fn work_item_type_fields(
        &self,
        work_item_type: &str,
    ) -> Result<Option<Vec<String>>, RemoteError> {
        let url = self.project_url(&format!(
            "workitemtypes/{}/fields?api-version={API_VERSION}",
            encode_path_segment(work_item_type)
        ));
        let result: Result<ListResponse<FieldReference>, _> = self
            .send_json("work_item_type_fields", self.request(Method::GET, &url))
            .await;
        match result {
            Ok(response) => Ok(Some(
                response
                    .value
                    .into_iter()
                    .map(|field| field.reference_name)
                    .collect(),
            )),
            Err(RemoteError::Http { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn download_attachment(&self, url: &str) -> Result<Bytes, RemoteError> {
        const OPERATION: &str = "download_attachment";
        self.send(OPERATION, self.request(Method::GET, url))
            .await?
            .bytes()
            .await
            .map_err(|e| RemoteError::decode(OPERATION, e))
    }

    async fn upload_attachment(
        &self,
        file_name: &str,
        content: Bytes,
    ) -> Result<String, RemoteError> {
        let url = self.project_url(&format!(
            "attachments?fileName={}&api-version={API_VERSION}",
            encode_path_segment(file_name)
        ));
        let reference: AttachmentReference = self
            .send_json(
                "upload_attachment",
                self.request(Method::POST, &url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(content),
            )
            .await?;
        Ok(reference.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::WorkItemRelation;

    fn client() -> HttpRemoteClient {
        HttpRemoteClient::new(
            "https://dev.example.com/org/",
            "Fabrikam Fiber",
            Some("secret".into()),
            HttpClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn record_urls_are_built_from_the_trimmed_base() {
        assert_eq!(
            client().record_url(17),
            "https://dev.example.com/org/_apis/wit/workItems/17"
        );
    }

    #[test]
    fn project_urls_encode_the_project() {
        assert_eq!(
            client().project_url("wiql?api-version=5.1"),
            "https://dev.example.com/org/Fabrikam%20Fiber/_apis/wit/wiql?api-version=5.1"
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let rendered = format!("{:?}", client());
        assert!(rendered.contains("Fabrikam Fiber"));
        assert!(!rendered.contains("secret"));
    }

    fn linked(id: WorkItemId, urls: &[&str]) -> WorkItem {
        WorkItem {
            id,
            rev: 1,
            fields: Default::default(),
            relations: urls
                .iter()
                .map(|url| WorkItemRelation::new(REL_HYPERLINK, *url))
                .collect(),
            url: format!("https://dev.example.com/org/_apis/wit/workItems/{id}"),
        }
    }

    #[test]
    fn hyperlink_index_only_reads_unknown_records() {
        let mut index = HyperlinkIndex::default();
        index.insert(&linked(1, &["https://old/_apis/wit/workItems/7/"]));
        index.insert(&linked(2, &[]));
        assert_eq!(index.missing(&[1, 2, 3]), vec![3]);

        index.forget([1]);
        assert_eq!(index.missing(&[1, 2, 3]), vec![1, 3]);
    }

    #[test]
    fn hyperlink_index_matches_current_candidates() {
        let mut index = HyperlinkIndex::default();
        index.insert(&linked(1, &["https://old/_apis/wit/workItems/7/"]));
        index.insert(&linked(2, &["HTTPS://OLD/_apis/wit/workItems/7", "https://docs"]));
        index.insert(&linked(3, &["https://old/_apis/wit/workItems/8"]));
        let urls = vec![
            "https://old/_apis/wit/workItems/7".to_owned(),
            "https://old/_apis/wit/workItems/9".to_owned(),
        ];

        let matches = index.matches(&[1, 2, 3], &urls);
        assert_eq!(matches[&urls[0]], vec![1, 2]);
        assert!(matches[&urls[1]].is_empty());

        // Records no longer returned by the query are not reported.
        let matches = index.matches(&[2, 3], &urls);
        assert_eq!(matches[&urls[0]], vec![2]);
    }

    #[test]
    fn parses_service_error_bodies() {
        let (key, message) = parse_error_body(
            r#"{"typeKey":"WorkItemUpdateConflictException","message":"TF26071: conflict"}"#,
        );
        assert_eq!(key.as_deref(), Some("WorkItemUpdateConflictException"));
        assert_eq!(message, "TF26071: conflict");

        let (key, message) = parse_error_body("Service Unavailable");
        assert_eq!(key, None);
        assert_eq!(message, "Service Unavailable");
    }
}

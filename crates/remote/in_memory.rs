//! In-memory endpoint with the write semantics of the real service.
//!
//! Used by the orchestrator's tests. Faults can be queued to make the next batch
//! write fail in the ways the service is known to fail.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use ferry_common::{
    JsonPatchOperation, PatchOp, WorkItem, WorkItemId, WorkItemRelation,
    work_item::{FIELD_TEAM_PROJECT, FIELD_WORK_ITEM_TYPE, REL_HYPERLINK, urls_match},
};
use serde_json::{Value, json};

use crate::{
    client::RemoteClient,
    error::RemoteError,
    types::{BatchItemResponse, Expand, WriteRequest, decode_path_segment},
};

#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the call without applying anything.
    Fail(RemoteError),
    /// Apply every request, then fail as if the response was lost.
    FailAfterApply(RemoteError),
    /// Apply only the requests at `positions`, in that order, then fail. A position
    /// listed twice is applied twice.
    FailAfterApplying {
        positions: Vec<usize>,
        error: RemoteError,
    },
    /// Apply nothing and answer without a response list.
    NoResponse,
    /// Apply nothing and answer with one response for the whole batch.
    Aggregate(u16, String),
    /// Answer position `i` with `statuses[i]`. Positions with a 2xx status (or past
    /// the end of the list) are applied normally.
    Statuses(Vec<u16>),
}

#[derive(Debug)]
struct Inner {
    base_url: String,
    project: String,
    items: BTreeMap<WorkItemId, WorkItem>,
    next_id: WorkItemId,
    types: HashMap<String, Vec<String>>,
    attachments: HashMap<String, Bytes>,
    faults: VecDeque<Fault>,
    batches: Vec<Vec<WriteRequest>>,
    applied_writes: usize,
    type_lookups: usize,
}

#[derive(Debug, Clone)]
pub struct InMemoryRemote {
    project: String,
    inner: Arc<Mutex<Inner>>,
}

enum WriteTarget {
    Create(String),
    Update(WorkItemId),
}

impl InMemoryRemote {
    pub fn new(base_url: &str, project: &str) -> Self {
        let inner = Inner {
            base_url: base_url.trim_end_matches('/').to_owned(),
            project: project.to_owned(),
            items: BTreeMap::new(),
            next_id: 1,
            types: HashMap::new(),
            attachments: HashMap::new(),
            faults: VecDeque::new(),
            batches: Vec::new(),
            applied_writes: 0,
            type_lookups: 0,
        };
        Self {
            project: project.to_owned(),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_work_item_type(self, name: &str, fields: &[&str]) -> Self {
        self.inner().types.insert(
            name.to_owned(),
            fields.iter().map(|field| (*field).to_owned()).collect(),
        );
        self
    }

    /// Stores a record directly, bypassing the batch endpoint. Returns its id.
    pub fn insert(&self, work_item_type: &str, fields: &[(&str, Value)]) -> WorkItemId {
        let mut inner = self.inner();
        let id = inner.allocate_id();
        let mut item = inner.blank_item(id, work_item_type);
        for (name, value) in fields {
            item.fields.insert((*name).to_owned(), value.clone());
        }
        item.rev = 1;
        inner.items.insert(id, item);
        id
    }

    pub fn set_field(&self, id: WorkItemId, name: &str, value: Value) {
        if let Some(item) = self.inner().items.get_mut(&id) {
            item.fields.insert(name.to_owned(), value);
            item.rev += 1;
        }
    }

    pub fn add_relation(&self, id: WorkItemId, relation: WorkItemRelation) {
        if let Some(item) = self.inner().items.get_mut(&id) {
            item.relations.push(relation);
            item.rev += 1;
        }
    }

    pub fn record(&self, id: WorkItemId) -> Option<WorkItem> {
        self.inner().items.get(&id).cloned()
    }

    pub fn records(&self) -> Vec<WorkItem> {
        self.inner().items.values().cloned().collect()
    }

    pub fn store_attachment(&self, url: &str, content: Bytes) {
        self.inner().attachments.insert(url.to_owned(), content);
    }

    pub fn attachment(&self, url: &str) -> Option<Bytes> {
        self.inner().attachments.get(url).cloned()
    }

    pub fn push_fault(&self, fault: Fault) {
        self.inner().faults.push_back(fault);
    }

    /// Every batch submitted so far, including ones answered with a fault.
    pub fn submitted_batches(&self) -> Vec<Vec<WriteRequest>> {
        self.inner().batches.clone()
    }

    /// Number of individual writes that changed a record.
    pub fn applied_writes(&self) -> usize {
        self.inner().applied_writes
    }

    pub fn type_lookups(&self) -> usize {
        self.inner().type_lookups
    }
}

impl Inner {
    fn allocate_id(&mut self) -> WorkItemId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record_url(&self, id: WorkItemId) -> String {
        format!("{}/_apis/wit/workItems/{id}", self.base_url)
    }

    fn blank_item(&self, id: WorkItemId, work_item_type: &str) -> WorkItem {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_WORK_ITEM_TYPE.to_owned(), Value::from(work_item_type));
        fields.insert(FIELD_TEAM_PROJECT.to_owned(), Value::from(self.project.as_str()));
        WorkItem {
            id,
            rev: 0,
            fields,
            relations: Vec::new(),
            url: self.record_url(id),
        }
    }

    fn apply(&mut self, request: &WriteRequest) -> BatchItemResponse {
        match self.try_apply(request) {
            Ok(item) => BatchItemResponse::new(200, json!(item).to_string()),
            Err(message) => {
                BatchItemResponse::new(400, json!({ "value": { "Message": message } }).to_string())
            }
        }
    }

    fn try_apply(&mut self, request: &WriteRequest) -> Result<WorkItem, String> {
        let mut item = match parse_write_target(&request.uri)? {
            WriteTarget::Create(work_item_type) => {
                if !self.types.is_empty() && !self.types.contains_key(&work_item_type) {
                    return Err(format!("work item type {work_item_type} does not exist"));
                }
                self.blank_item(0, &work_item_type)
            }
            WriteTarget::Update(id) => self
                .items
                .get(&id)
                .cloned()
                .ok_or_else(|| format!("work item {id} does not exist"))?,
        };
        for operation in &request.body {
            apply_operation(&mut item, operation)?;
        }
        if item.id == 0 {
            item.id = self.allocate_id();
            item.url = self.record_url(item.id);
        }
        item.rev += 1;
        self.items.insert(item.id, item.clone());
        self.applied_writes += 1;
        Ok(item)
    }
}

fn parse_write_target(uri: &str) -> Result<WriteTarget, String> {
    let path = uri.split('?').next().unwrap_or_default();
    let (_, tail) = path
        .rsplit_once("/_apis/wit/workitems/")
        .ok_or_else(|| format!("unsupported uri {uri}"))?;
    match tail.strip_prefix('$') {
        Some(work_item_type) => Ok(WriteTarget::Create(decode_path_segment(work_item_type))),
        None => tail
            .parse()
            .map(WriteTarget::Update)
            .map_err(|_| format!("unsupported uri {uri}")),
    }
}

fn apply_operation(item: &mut WorkItem, operation: &JsonPatchOperation) -> Result<(), String> {
    if operation.path == "/id" {
        return Ok(());
    }
    let value = operation.value.clone().unwrap_or(Value::Null);
    if operation.op == PatchOp::Test {
        let actual = match operation.field_name() {
            Some(name) => item.fields.get(name).cloned().unwrap_or(Value::Null),
            None if operation.path == "/rev" => Value::from(item.rev),
            None => return Err(format!("unsupported test path {}", operation.path)),
        };
        if actual != value {
            return Err(format!(
                "test operation on {} failed: expected {value}, found {actual}",
                operation.path
            ));
        }
        return Ok(());
    }

    if let Some(name) = operation.field_name() {
        match operation.op {
            PatchOp::Remove => {
                item.fields.remove(name);
            }
            _ => {
                item.fields.insert(name.to_owned(), value);
            }
        }
        return Ok(());
    }

    let rest = operation
        .path
        .strip_prefix("/relations/")
        .ok_or_else(|| format!("unsupported patch path {}", operation.path))?;
    if rest == "-" && operation.op == PatchOp::Add {
        let relation: WorkItemRelation =
            serde_json::from_value(value).map_err(|e| format!("invalid relation: {e}"))?;
        if item
            .relations
            .iter()
            .any(|existing| existing.rel == relation.rel && urls_match(&existing.url, &relation.url))
        {
            return Err(format!("relation {} to {} already exists", relation.rel, relation.url));
        }
        item.relations.push(relation);
        return Ok(());
    }

    let (index, attribute) = match rest.split_once("/attributes/") {
        Some((index, attribute)) => (index, Some(attribute)),
        None => (rest, None),
    };
    let index: usize = index
        .parse()
        .map_err(|_| format!("unsupported patch path {}", operation.path))?;
    let relation = item
        .relations
        .get_mut(index)
        .ok_or_else(|| format!("relation index {index} out of range"))?;
    match (attribute, operation.op) {
        (None, PatchOp::Remove) => {
            item.relations.remove(index);
        }
        (Some(attribute), PatchOp::Add | PatchOp::Replace) => {
            relation.attributes.insert(attribute.to_owned(), value);
        }
        _ => return Err(format!("unsupported patch path {}", operation.path)),
    }
    Ok(())
}

#[async_trait::async_trait]
impl RemoteClient for InMemoryRemote {
    fn project(&self) -> &str {
        &self.project
    }

    fn record_url(&self, id: WorkItemId) -> String {
        self.inner().record_url(id)
    }

    async fn submit_batch(
        &self,
        requests: &[WriteRequest],
    ) -> Result<Option<Vec<BatchItemResponse>>, RemoteError> {
        let mut inner = self.inner();
        inner.batches.push(requests.to_vec());
        match inner.faults.pop_front() {
            None => Ok(Some(requests.iter().map(|r| inner.apply(r)).collect())),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::FailAfterApply(err)) => {
                for request in requests {
                    inner.apply(request);
                }
                Err(err)
            }
            Some(Fault::FailAfterApplying { positions, error }) => {
                for request in positions.iter().filter_map(|&position| requests.get(position)) {
                    inner.apply(request);
                }
                Err(error)
            }
            Some(Fault::NoResponse) => Ok(None),
            Some(Fault::Aggregate(code, body)) => Ok(Some(vec![BatchItemResponse::new(code, body)])),
            Some(Fault::Statuses(statuses)) => Ok(Some(
                requests
                    .iter()
                    .enumerate()
                    .map(|(position, request)| match statuses.get(position) {
                        Some(&code) if !(200..300).contains(&code) => BatchItemResponse::new(
                            code,
                            json!({ "value": { "Message": format!("injected status {code}") } })
                                .to_string(),
                        ),
                        _ => inner.apply(request),
                    })
                    .collect(),
            )),
        }
    }

    async fn query_by_cross_reference(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, Vec<WorkItemId>>, RemoteError> {
        let inner = self.inner();
        Ok(urls
            .iter()
            .map(|url| {
                let ids = inner
                    .items
                    .values()
                    .filter(|item| {
                        item.relations
                            .iter()
                            .any(|r| r.rel == REL_HYPERLINK && urls_match(&r.url, url))
                    })
                    .map(|item| item.id)
                    .collect();
                (url.clone(), ids)
            })
            .collect())
    }

    async fn fetch_records(
        &self,
        ids: &[WorkItemId],
        expand: Expand,
    ) -> Result<Vec<WorkItem>, RemoteError> {
        let inner = self.inner();
        Ok(ids
            .iter()
            .filter_map(|id| inner.items.get(id))
            .map(|item| {
                let mut item = item.clone();
                if matches!(expand, Expand::None | Expand::Fields) {
                    item.relations.clear();
                }
                item
            })
            .collect())
    }

    /// Every stored record, in id order. The query text is not interpreted.
    async fn run_query(&self, _query: &str) -> Result<Vec<WorkItemId>, RemoteError> {
        Ok(self.inner().items.keys().copied().collect())
    }

    async fn work_item_type_fields(
        &self,
        work_item_type: &str,
    ) -> Result<Option<Vec<String>>, RemoteError> {
        let mut inner = self.inner();
        inner.type_lookups += 1;
        Ok(inner.types.get(work_item_type).cloned())
    }

    async fn download_attachment(&self, url: &str) -> Result<Bytes, RemoteError> {
        self.attachment(url).ok_or_else(|| RemoteError::Http {
            operation: "download_attachment".into(),
            status: 404,
            error_key: None,
            message: format!("attachment {url} not found"),
        })
    }

    async fn upload_attachment(
        &self,
        file_name: &str,
        content: Bytes,
    ) -> Result<String, RemoteError> {
        let mut inner = self.inner();
        let url = format!(
            "{}/_apis/wit/attachments/{}?fileName={file_name}",
            inner.base_url,
            inner.attachments.len() + 1
        );
        inner.attachments.insert(url.clone(), content);
        Ok(url)
    }
}

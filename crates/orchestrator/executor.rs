//! Submits one batch and reconciles the responses with the records that produced the
//! requests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use ferry_common::{FailureReason, WorkItemId};
use ferry_remote::{BatchItemResponse, RemoteClient, RemoteError, WriteRequest};
use tracing::{Span, debug, error, warn};
use uuid::Uuid;

use crate::{
    batch::{BatchContext, BatchRecord},
    context::{Endpoint, MigrationContext},
    retry::{RetryVerifier, Verdict},
};

/// Applies the result of a successful write to the record that made it.
pub trait SuccessHandler: Send + Sync {
    fn on_success(
        &self,
        ctx: &MigrationContext,
        record: &mut BatchRecord,
        response: &BatchItemResponse,
    ) -> Result<(), String>;
}

/// Before a failed create batch is retried, looks for target records that already
/// point back at the sources being created. Finding any means the batch was applied
/// and a retry would create duplicates.
struct CreateVerifier<'a> {
    target: &'a dyn RemoteClient,
    source_urls: Vec<String>,
    findings: Mutex<Option<HashMap<String, Vec<WorkItemId>>>>,
}

impl<'a> CreateVerifier<'a> {
    fn new(target: &'a dyn RemoteClient, source_urls: Vec<String>) -> Self {
        Self {
            target,
            source_urls,
            findings: Mutex::new(None),
        }
    }

    fn take_findings(&self) -> Option<HashMap<String, Vec<WorkItemId>>> {
        self.findings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait::async_trait]
impl RetryVerifier for CreateVerifier<'_> {
    async fn verify(&self, request_id: Uuid, error: &RemoteError) -> Result<Verdict, RemoteError> {
        let matches = self.target.query_by_cross_reference(&self.source_urls).await?;
        let applied = matches.values().filter(|ids| !ids.is_empty()).count();
        if applied == 0 {
            debug!(%request_id, "Create batch left no trace on the target, retry is safe");
            return Ok(Verdict::Keep);
        }
        warn!(
            %request_id,
            applied,
            %error,
            "Create batch was applied although the call failed, not retrying"
        );
        *self.findings.lock().unwrap_or_else(PoisonError::into_inner) = Some(matches);
        Ok(Verdict::Permanent)
    }
}

pub struct BatchExecutor<'a> {
    ctx: &'a MigrationContext,
    endpoint: Endpoint,
    span: Span,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(ctx: &'a MigrationContext, endpoint: Endpoint, span: Span) -> Self {
        Self {
            ctx,
            endpoint,
            span,
        }
    }

    /// Submits `requests` as one batch and updates every record that made a request.
    ///
    /// Responses are matched to requests by position. With `verify_creates`, a transient
    /// failure of a batch containing creates is only retried after confirming that none
    /// of the records were created.
    pub async fn execute<H>(
        &self,
        batch: &mut BatchContext,
        requests: Vec<WriteRequest>,
        handler: &H,
        verify_creates: bool,
    ) where
        H: SuccessHandler + ?Sized,
    {
        if requests.is_empty() {
            return;
        }
        let client = self.ctx.client(self.endpoint).as_ref();
        let requested: HashSet<WorkItemId> = requests.iter().map(|r| r.source_id).collect();

        let verifier = verify_creates
            .then(|| {
                batch
                    .records
                    .iter()
                    .filter(|record| requested.contains(&record.state.source_id))
                    .filter(|record| record.state.target_id().is_none())
                    .map(|record| record.state.source_url.clone())
                    .collect::<Vec<_>>()
            })
            .filter(|urls| !urls.is_empty())
            .map(|urls| CreateVerifier::new(self.ctx.target.as_ref(), urls));

        let result = self
            .ctx
            .retry_policy(self.span.clone())
            .run(
                "submit_batch",
                batch.id,
                || client.submit_batch(&requests),
                verifier.as_ref().map(|v| v as &dyn RetryVerifier),
            )
            .await;

        let responses = match result {
            Ok(Some(responses)) => responses,
            Ok(None) => {
                let message = "batch call returned no responses";
                error!(batch_id = %batch.id, "{message}");
                fail_requested(batch, &requested, FailureReason::CriticalError, message);
                self.dump(batch, &requests, None, Some(message)).await;
                return;
            }
            Err(err) => {
                let message = err.to_string();
                match verifier.as_ref().and_then(CreateVerifier::take_findings) {
                    Some(findings) => {
                        fail_requested(
                            batch,
                            &requested,
                            FailureReason::CreateBatchFailure,
                            &format!("create batch was applied despite the error: {message}"),
                        );
                        for record in batch.records.iter_mut() {
                            if findings
                                .get(&record.state.source_url)
                                .is_some_and(|ids| ids.len() > 1)
                            {
                                record.state.flag(
                                    FailureReason::DuplicateCrossReference,
                                    "several target records point at this source record",
                                );
                            }
                        }
                    }
                    None => {
                        error!(batch_id = %batch.id, error = %message, "Batch failed");
                        fail_requested(batch, &requested, FailureReason::CriticalError, &message);
                    }
                }
                self.dump(batch, &requests, None, Some(&message)).await;
                return;
            }
        };

        if requests.len() > 1 && responses.len() == 1 {
            let message = format!(
                "one response for {} requests, the batch semantics of the service may have changed: {}",
                requests.len(),
                responses[0].error_message()
            );
            warn!(batch_id = %batch.id, status = responses[0].code, "{message}");
            fail_requested(batch, &requested, FailureReason::CriticalError, &message);
            self.dump(batch, &requests, Some(&responses), Some(&message)).await;
            return;
        }

        let mut had_failures = false;
        for (position, request) in requests.iter().enumerate() {
            let Some(record) = batch.record_mut(request.source_id) else {
                continue;
            };
            let Some(response) = responses.get(position) else {
                had_failures = true;
                record.state.fail(
                    FailureReason::UnexpectedError,
                    format!("no response at position {position}"),
                );
                continue;
            };
            match response.code {
                200..=299 => {
                    if let Err(message) = handler.on_success(self.ctx, record, response) {
                        had_failures = true;
                        record.state.fail(FailureReason::UnexpectedError, message);
                    }
                }
                400..=499 => {
                    had_failures = true;
                    record.state.fail(FailureReason::BadRequest, response.error_message());
                    record.state.invalidate_phase_status();
                }
                code => {
                    had_failures = true;
                    record.state.fail(
                        FailureReason::UnexpectedError,
                        format!("status {code}: {}", response.error_message()),
                    );
                }
            }
        }

        if had_failures {
            self.dump(batch, &requests, Some(&responses), None).await;
        }
    }

    async fn dump(
        &self,
        batch: &BatchContext,
        requests: &[WriteRequest],
        responses: Option<&[BatchItemResponse]>,
        error: Option<&str>,
    ) {
        self.ctx
            .diagnostics
            .record_failed_batch(batch.id, batch.phase, requests, responses, error)
            .await;
    }
}

fn fail_requested(
    batch: &mut BatchContext,
    requested: &HashSet<WorkItemId>,
    reason: FailureReason,
    message: &str,
) {
    for record in batch
        .records
        .iter_mut()
        .filter(|record| requested.contains(&record.state.source_id))
    {
        record.state.fail(reason, message);
    }
}

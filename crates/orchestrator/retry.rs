//! Bounded retries with linear backoff and an optional verification hook.

use std::{future::Future, time::Duration};

use ferry_config::BatchConfig;
use ferry_remote::{ErrorClass, RemoteError};
use tracing::{Instrument, Span, debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the error's own classification.
    Keep,
    /// The side effects are known to have happened already; stop retrying.
    Permanent,
}

/// Consulted before a transient failure is retried. It may inspect remote state and
/// decide that retrying would be unsafe.
#[async_trait::async_trait]
pub trait RetryVerifier: Send + Sync {
    async fn verify(&self, request_id: Uuid, error: &RemoteError) -> Result<Verdict, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_step: Duration,
    span: Span,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration, span: Span) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
            span,
        }
    }

    pub fn from_config(config: &BatchConfig, span: Span) -> Self {
        Self::new(config.max_attempts, config.backoff_step(), span)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `operation` until it succeeds, fails permanently or runs out of attempts.
    /// The last error is returned, wrapped in `RetryExhausted` when more than one
    /// attempt was made.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        request_id: Uuid,
        mut attempt_once: F,
        verifier: Option<&dyn RetryVerifier>,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let err = match attempt_once().await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };

                let mut class = match err.classify() {
                    Some(class) => class,
                    None => {
                        warn!(%operation, attempt, error = %err, "Unclassified error, treating as transient");
                        ErrorClass::Transient
                    }
                };

                if class == ErrorClass::Transient {
                    if let Some(verifier) = verifier {
                        match verifier.verify(request_id, &err).await {
                            Ok(Verdict::Permanent) => class = ErrorClass::Permanent,
                            Ok(Verdict::Keep) => {}
                            Err(verify_err) => warn!(
                                %operation,
                                error = %verify_err,
                                "Verification failed, keeping original classification"
                            ),
                        }
                    }
                }

                if class == ErrorClass::Permanent || attempt >= self.max_attempts {
                    if attempt > 1 {
                        return Err(RemoteError::RetryExhausted {
                            operation: operation.to_owned(),
                            attempts: attempt,
                            last_error: Box::new(err),
                        });
                    }
                    return Err(err);
                }

                let delay = self.backoff_step * attempt;
                debug!(%operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

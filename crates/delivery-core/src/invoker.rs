//! Resilient execution of remote calls.
//!
//! [`Invoker::execute`] runs a call, classifies its failure, asks the
//! [`RetryPolicy`] what to do and sleeps before trying again. All per-call
//! state (attempt counter, start time, last failure) lives on the stack of
//! that call, so one invoker can serve any number of concurrent requests.
//!
//! Waiting uses `tokio::time::sleep` and only suspends the calling task.
//! Cancellation is observed both while an attempt is in flight and while
//! sleeping.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{
    AttemptFailure, CancellationFailure, InvokeError, TerminalFailure, TransportError,
    classify_status,
};
use crate::retry::{ExponentialBackoff, RetryAttemptContext, RetryConfig, RetryPolicy};
use crate::transport::RawResponse;
use crate::FailureKind;

/// Maps a non-2xx status to a failure kind.
pub type StatusClassifier = fn(u16) -> FailureKind;

/// Runs calls under a retry policy.
#[derive(Debug, Clone)]
pub struct Invoker {
    policy: Arc<dyn RetryPolicy>,
    classifier: StatusClassifier,
}

impl Invoker {
    /// Invoker using `policy` and the default status classification.
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            classifier: classify_status,
        }
    }

    /// Invoker with an [`ExponentialBackoff`] policy built from `config`.
    pub fn from_config(config: RetryConfig) -> Self {
        Self::new(Arc::new(ExponentialBackoff::new(config)))
    }

    /// Replace the status classifier.
    #[must_use]
    pub const fn with_classifier(mut self, classifier: StatusClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    /// Run `call` until it succeeds, the policy gives up or `cancel` fires.
    ///
    /// The first attempt starts immediately. A 2xx response is returned as
    /// soon as it arrives.
    pub async fn execute<F, Fut>(
        &self,
        mut call: F,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportError>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, "Starting attempt");

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(cancelled(attempt, started));
                }
                outcome = call() => outcome,
            };

            let (failure, retry_after) = match outcome {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status, "Attempt succeeded");
                    return Ok(response);
                },
                Ok(response) => {
                    let kind = (self.classifier)(response.status);
                    let retry_after = response.retry_after;
                    (
                        AttemptFailure::Rejected {
                            status: response.status,
                            kind,
                            body: response.body,
                        },
                        retry_after,
                    )
                },
                Err(err) => (AttemptFailure::Transport(err), None),
            };

            let context = RetryAttemptContext {
                attempt_number: attempt,
                cause: failure.kind(),
                elapsed_so_far: started.elapsed(),
                retry_after,
            };
            let decision = self.policy.decide(&context);

            if !decision.should_retry || attempt >= max_attempts {
                debug!(attempt, kind = %failure.kind(), "Giving up");
                return Err(InvokeError::Terminal(TerminalFailure {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last: failure,
                }));
            }

            warn!(
                attempt,
                kind = %failure.kind(),
                delay_ms = u64::try_from(decision.delay_before_next_attempt.as_millis()).unwrap_or(u64::MAX),
                "Attempt failed, retrying: {failure}"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(cancelled(attempt, started));
                }
                () = tokio::time::sleep(decision.delay_before_next_attempt) => {}
            }
        }
    }
}

fn cancelled(attempts: u32, started: Instant) -> InvokeError {
    debug!(attempts, "Request cancelled");
    InvokeError::Cancelled(CancellationFailure {
        attempts,
        elapsed: started.elapsed(),
    })
}

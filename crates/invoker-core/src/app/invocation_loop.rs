//! InvocationLoop - fetch → decode → resolve → execute → report を繰り返す
//!
//! # フロー
//! 1. `ControlPlane::next_invocation()`（long-poll）
//!    - 失敗したら backoff して 1 に戻る（ループは止めない）
//! 2. request id は fetch の時点で確定済み
//! 3. body を JSON として decode。失敗したらその invocation だけエラー報告
//! 4. HandlerRef を解決（初回だけ、以後はキャッシュ）
//! 5. HandlerExecutor で実行 → Outcome
//! 6. 成功 / 失敗を報告
//! 7. 1 に戻る
//!
//! invocation 単位の失敗でループが終わることはありません。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::executor::HandlerExecutor;
use super::retry::RetryPolicy;
use crate::domain::errors::DECODE_ERROR;
use crate::domain::{Failure, Invocation, Outcome, OutcomeKind, RequestId, format_failure};
use crate::ports::{ClientError, ControlPlane};
use crate::typed::{HandlerRef, HandlerResolver};

/// A report is attempted at most this many times.
const REPORT_ATTEMPTS: u32 = 2;

/// What one pass through the loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// The handler ran and its outcome was (or failed to be) reported.
    Completed {
        request_id: RequestId,
        outcome: OutcomeKind,
        delivered: bool,
    },

    /// The payload was not JSON; an error was reported without running the
    /// handler.
    Rejected {
        request_id: RequestId,
        delivered: bool,
    },

    /// No invocation was obtained. The loop slept `delay` before returning.
    FetchFailed { error: ClientError, delay: Duration },
}

pub struct InvocationLoop {
    control_plane: Arc<dyn ControlPlane>,
    resolver: HandlerResolver,
    handler_id: Option<String>,
    executor: HandlerExecutor,
    backoff: RetryPolicy,
    cached: Option<HandlerRef>,
    fetch_failures: u32,
}

impl InvocationLoop {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        resolver: HandlerResolver,
        handler_id: Option<String>,
        executor: HandlerExecutor,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            control_plane,
            resolver,
            handler_id,
            executor,
            backoff,
            cached: None,
            fetch_failures: 0,
        }
    }

    /// Run until the process is terminated from outside.
    pub async fn run(&mut self) {
        loop {
            let iteration = self.run_once().await;
            debug!(?iteration, "iteration finished");
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// The long-poll and the backoff sleep are raced against shutdown. A
    /// handler that already started runs to completion and is reported.
    pub async fn run_until(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let control_plane = Arc::clone(&self.control_plane);
            let fetched = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = control_plane.next_invocation() => fetched,
            };

            let iteration = self.process(fetched).await;
            debug!(?iteration, "iteration finished");

            if let Iteration::FetchFailed { delay, .. } = &iteration {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(*delay) => {}
                }
            }
        }
        info!("invocation loop stopped");
    }

    /// Exactly one fetch and everything that follows from it.
    pub async fn run_once(&mut self) -> Iteration {
        let fetched = self.control_plane.next_invocation().await;
        let iteration = self.process(fetched).await;
        if let Iteration::FetchFailed { delay, .. } = &iteration {
            tokio::time::sleep(*delay).await;
        }
        iteration
    }

    /// The memoized handler, resolving it on first use.
    pub fn handler_ref(&mut self) -> HandlerRef {
        if let Some(handler) = &self.cached {
            return handler.clone();
        }

        let resolved = self.resolver.resolve(self.handler_id.as_deref());
        match &resolved.fallback {
            Some(reason) => warn!(
                configured = ?self.handler_id,
                reason = %reason,
                "falling back to default handler"
            ),
            None => info!(handler = %resolved.handler.id(), "handler resolved"),
        }
        self.cached = Some(resolved.handler.clone());
        resolved.handler
    }

    async fn process(&mut self, fetched: Result<Invocation, ClientError>) -> Iteration {
        match fetched {
            Ok(invocation) => {
                self.fetch_failures = 0;
                let remaining_ms = invocation
                    .context
                    .remaining(Utc::now())
                    .map(|d| d.as_millis() as u64);
                let span = info_span!(
                    "invocation",
                    request_id = %invocation.request_id,
                    trace_id = ?invocation.context.trace_id,
                    remaining_ms = ?remaining_ms,
                );
                self.handle(invocation).instrument(span).await
            }
            Err(error) => self.fetch_failed(error),
        }
    }

    /// Log a failed fetch and pick the delay before the next one. The caller
    /// does the sleeping.
    fn fetch_failed(&mut self, error: ClientError) -> Iteration {
        self.fetch_failures = self.fetch_failures.saturating_add(1);
        let delay = self.backoff.next_delay(self.fetch_failures);

        match &error {
            // Without an id there is nothing to report the failure against.
            ClientError::Protocol(_) => warn!(
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "invocation without request id skipped"
            ),
            _ => warn!(
                error = %error,
                attempt = self.fetch_failures,
                delay_ms = delay.as_millis() as u64,
                "fetching next invocation failed"
            ),
        }

        Iteration::FetchFailed { error, delay }
    }

    async fn handle(&mut self, invocation: Invocation) -> Iteration {
        let request_id = invocation.request_id.clone();

        let payload = match invocation.decode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, bytes = invocation.raw_body.len(), "payload is not valid JSON");
                let record = format_failure(&Failure::typed(DECODE_ERROR, err.to_string()), None);
                let delivered = self.deliver(&request_id, &Outcome::Failure(record)).await;
                return Iteration::Rejected {
                    request_id,
                    delivered,
                };
            }
        };

        let handler = self.handler_ref();
        let outcome = self.executor.execute(payload, &handler).await;
        info!(handler = %handler.id(), outcome = ?outcome.kind(), "invocation finished");

        let delivered = self.deliver(&request_id, &outcome).await;
        Iteration::Completed {
            request_id,
            outcome: outcome.kind(),
            delivered,
        }
    }

    /// Report an outcome. Transport failures are retried once after a short
    /// delay; anything else, or a second failure, is logged and dropped.
    async fn deliver(&self, request_id: &RequestId, outcome: &Outcome) -> bool {
        let mut attempt = 1;
        loop {
            let result = match outcome {
                Outcome::Success(value) => {
                    self.control_plane.report_success(request_id, value).await
                }
                Outcome::Failure(record) => {
                    self.control_plane
                        .report_invocation_error(request_id, record)
                        .await
                }
            };

            match result {
                Ok(()) => return true,
                Err(err) if err.is_transport() && attempt < REPORT_ATTEMPTS => {
                    let delay = self.backoff.next_delay(attempt);
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "report failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(error = %err, attempt, "report failed; dropping");
                    return false;
                }
            }
        }
    }
}

//! InvocationExecutor - fetch → dispatch → complete のループ
//!
//! # フロー
//! 1. `Idle → Fetching`: `EventSource::next_event()` で次の invocation を待つ
//! 2. `Dispatched`: ErrorRoute を bind し直し、QuiescenceHook を reset、
//!    CompletionContext を組み立てて handler を呼ぶ
//! 3. `Completing`: 最初の完了を POST する（ack を待つ）
//! 4. quiescence（handler が起こした非同期処理が全部終わる）を待ってから `Idle` に戻る
//!
//! 次の fetch は「完了 POST の ack」と「quiescence」の両方が揃うまで発行しない。
//! これでバックグラウンド処理が次の invocation と重ならず、
//! 非同期エラーの帰属先が常に正しくなる。

use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::completion::{CompletionParts, CompletionWiring, build_completion};
use super::error_route::{ErrorRoute, render};
use super::quiescence::QuiescenceHook;
use crate::domain::{Completion, HandlerError, Invocation, InvocationState};
use crate::observability::invocation_span;
use crate::ports::{ClientError, Clock, EventSource, FetchedEvent, SystemClock};
use crate::typed::{Handler, Response};

/// Exit status used for every fatal termination.
pub const FATAL_EXIT_CODE: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    ControlPlaneUnreachable,
    UncaughtFault,
    UnhandledRejection,
    RuntimeFault,
    HandlerLoad,
}

impl FatalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlaneUnreachable => "control_plane_unreachable",
            Self::UncaughtFault => "uncaught_fault",
            Self::UnhandledRejection => "unhandled_rejection",
            Self::RuntimeFault => "runtime_fault",
            Self::HandlerLoad => "handler_load",
        }
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the serve loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Interrupted by a signal.
    Shutdown,
    Fatal(FatalReason),
}

impl Termination {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Shutdown => 0,
            Self::Fatal(_) => FATAL_EXIT_CODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    Idle,
    Fetching,
    Dispatched,
    Completing,
    Fatal,
}

pub struct InvocationExecutor {
    source: Arc<dyn EventSource>,
    handler: Arc<dyn Handler>,
    hook: QuiescenceHook,
    route: ErrorRoute,
    clock: Arc<dyn Clock>,
    phase: ExecutorPhase,
}

impl InvocationExecutor {
    pub fn new(source: Arc<dyn EventSource>, handler: Arc<dyn Handler>) -> Self {
        Self {
            source,
            handler,
            hook: QuiescenceHook::new(),
            route: ErrorRoute::new(),
            clock: Arc::new(SystemClock),
            phase: ExecutorPhase::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> ExecutorPhase {
        self.phase
    }

    /// Serves invocations until a fatal fault. Never returns `Shutdown`;
    /// signals are handled by whoever drives this future.
    pub async fn run(&mut self) -> Termination {
        tracing::info!("invocation executor started");
        loop {
            if let ControlFlow::Break(termination) = self.run_once().await {
                self.set_phase(ExecutorPhase::Fatal);
                tracing::error!(
                    reason = %termination_reason(&termination),
                    exit_code = termination.exit_code(),
                    "invocation executor stopped"
                );
                return termination;
            }
            // onNextCycle: 次の fetch は次のスケジューラターンで
            tokio::task::yield_now().await;
        }
    }

    /// One full cycle: fetch, dispatch, complete, quiesce.
    pub async fn run_once(&mut self) -> ControlFlow<Termination> {
        self.set_phase(ExecutorPhase::Fetching);
        let event = match self.source.next_event().await {
            Ok(event) => event,
            Err(err) if err.is_unreachable() => {
                tracing::error!(error = %err, "control plane unreachable");
                return ControlFlow::Break(Termination::Fatal(
                    FatalReason::ControlPlaneUnreachable,
                ));
            }
            Err(err) => {
                let termination = self
                    .route
                    .report_runtime(self.source.as_ref(), HandlerError::from(err))
                    .await;
                return ControlFlow::Break(termination);
            }
        };

        let span = invocation_span(&event.id);
        let flow = self.dispatch(event).instrument(span).await;

        self.route.unbind();
        self.hook.reset();
        if flow.is_continue() {
            self.set_phase(ExecutorPhase::Idle);
        }
        flow
    }

    async fn dispatch(&mut self, event: FetchedEvent) -> ControlFlow<Termination> {
        let FetchedEvent {
            id,
            payload,
            metadata,
        } = event;
        let mut invocation = Invocation::new(id.clone(), payload, metadata, self.clock.now());

        // handler を呼ぶ前に帰属先を切り替える
        self.route.bind(id.clone());
        self.hook.reset();

        let tracker = TaskTracker::new();
        let (sink, mut completions) = mpsc::unbounded_channel();
        let parts = build_completion(
            id,
            invocation.fetched_at(),
            CompletionWiring {
                hook: self.hook.clone(),
                tasks: tracker.clone(),
                faults: self.route.sender(),
                sink,
            },
        );
        parts.handle.arm_implicit_completion();

        self.set_phase(ExecutorPhase::Dispatched);
        advance(&mut invocation, InvocationState::Dispatched);
        tracing::debug!(
            payload_bytes = invocation.payload().len(),
            headers = invocation.metadata().len(),
            "dispatching invocation"
        );
        self.invoke(&invocation, &parts, &tracker);
        tracker.close();

        let quiescence = tracker.wait();
        tokio::pin!(quiescence);
        let mut posted = false;
        let mut quiet = false;

        while !(posted && quiet) {
            tokio::select! {
                biased;

                Some(fault) = self.route.next_fault() => {
                    let termination = self.route.report(self.source.as_ref(), fault).await;
                    return ControlFlow::Break(termination);
                }

                Some(completion) = completions.recv(), if !posted => {
                    self.post(&mut invocation, completion).await?;
                    posted = true;
                }

                () = &mut quiescence, if !quiet => {
                    quiet = true;
                    tracing::debug!("invocation reached quiescence");
                    if !posted {
                        self.hook.fire();
                        if !parts.handle.is_completed() {
                            parts.handle.arm_implicit_completion();
                            self.hook.fire();
                        }
                    }
                }
            }
        }

        parts.handle.retire();

        // POST 中に上がった fault もこの invocation に帰属させる
        if let Some(fault) = self.route.try_next_fault() {
            let termination = self.route.report(self.source.as_ref(), fault).await;
            return ControlFlow::Break(termination);
        }

        ControlFlow::Continue(())
    }

    /// Calls the handler on the executor's task and routes whatever comes
    /// back into the completion machinery.
    fn invoke(&self, invocation: &Invocation, parts: &CompletionParts, tracker: &TaskTracker) {
        let payload = match decode_payload(invocation.payload()) {
            Ok(payload) => payload,
            Err(err) => {
                parts.callback.call(Some(err), None);
                return;
            }
        };

        let handler = Arc::clone(&self.handler);
        let ctx = parts.context.clone();
        let callback = parts.callback.clone();
        let called =
            std::panic::catch_unwind(AssertUnwindSafe(move || handler.call(payload, ctx, callback)));

        match called {
            Ok(Ok(Response::Deferred(future))) => {
                let ctx = parts.context.clone();
                tracker.spawn(async move {
                    match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(result)) => ctx.succeed(result),
                        Ok(Err(err)) => ctx.fail(err),
                        Err(panic) => ctx.fail(HandlerError::from_panic(panic)),
                    }
                });
            }
            Ok(Ok(Response::Value(_) | Response::Empty)) => {}
            Ok(Err(err)) => parts.callback.call(Some(err), None),
            Err(panic) => parts
                .callback
                .call(Some(HandlerError::from_panic(panic)), None),
        }
    }

    async fn post(
        &mut self,
        invocation: &mut Invocation,
        completion: Completion,
    ) -> ControlFlow<Termination> {
        self.set_phase(ExecutorPhase::Completing);
        advance(invocation, InvocationState::Completing);

        let (posted, terminal) = match &completion {
            Completion::Succeeded(result) => {
                let shown = result
                    .as_ref()
                    .map_or_else(|| "null".to_string(), serde_json::Value::to_string);
                tracing::info!(result = %shown, "invocation succeeded");
                let posted = self
                    .source
                    .post_response(invocation.id(), result.as_ref())
                    .await;
                (posted, InvocationState::Completed)
            }
            Completion::Failed(record) => {
                tracing::info!(error = %render(record), "reporting invocation error");
                let posted = self.source.post_error(invocation.id(), record).await;
                (posted, InvocationState::Failed)
            }
        };

        match posted {
            Ok(()) => {}
            Err(ClientError::Status { status, path }) => {
                tracing::warn!(status, %path, "event service rejected completion; continuing");
            }
            Err(err) if err.is_unreachable() => {
                tracing::error!(error = %err, "control plane unreachable while completing");
                return ControlFlow::Break(Termination::Fatal(
                    FatalReason::ControlPlaneUnreachable,
                ));
            }
            Err(err) => {
                let termination = self
                    .route
                    .report_runtime(self.source.as_ref(), HandlerError::from(err))
                    .await;
                return ControlFlow::Break(termination);
            }
        }

        advance(invocation, terminal);
        ControlFlow::Continue(())
    }

    fn set_phase(&mut self, phase: ExecutorPhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "executor phase");
            self.phase = phase;
        }
    }
}

fn advance(invocation: &mut Invocation, to: InvocationState) {
    if let Err(err) = invocation.transition(to) {
        tracing::warn!(error = %err, "ignoring invalid invocation transition");
    }
}

fn decode_payload(bytes: &[u8]) -> Result<Value, HandlerError> {
    serde_json::from_slice(bytes)
        .map_err(|err| HandlerError::new(err.to_string()).with_name("SyntaxError"))
}

fn termination_reason(termination: &Termination) -> &'static str {
    match termination {
        Termination::Shutdown => "shutdown",
        Termination::Fatal(reason) => reason.as_str(),
    }
}

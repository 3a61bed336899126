//! Completion - invocation ごとの完了ステートマシン
//!
//! handler に渡す `InvocationContext`（succeed / fail / done）と、
//! 旧来の2引数コールバック `Callback` を構築する。どの入口も最終的には
//! 1つの `Completion` として executor に届く。
//!
//! # exactly-once の二重ガード
//! - **外側（entered）**: succeed / fail / done / callback のうち最初の1回だけが実行される
//! - **内側（completed）**: 成功・失敗を問わず最初の完了だけが executor に送られる
//!   （quiescence 待ちで遅延された完了や暗黙完了もここを通る）
//!
//! 2回目以降の呼び出しはログに残して捨てる。panic もエラーも外に出さない。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use super::error_route::{Fault, FaultSender, render};
use super::quiescence::QuiescenceHook;
use crate::domain::outcome::{handled_marker, implicit_result};
use crate::domain::{Completion, EventId, HandlerError};

struct Shared {
    event_id: EventId,
    received_at: DateTime<Utc>,
    wait_for_quiescence: AtomicBool,
    entered: AtomicBool,
    completed: AtomicBool,
    retired: AtomicBool,
    hook: QuiescenceHook,
    tasks: TaskTracker,
    faults: FaultSender,
    sink: mpsc::UnboundedSender<Completion>,
}

impl Shared {
    /// Outer "only once" layer shared by every public completion entry point.
    fn enter(&self, entry: &'static str) -> bool {
        if self.entered.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                event_id = %self.event_id,
                entry,
                "completion already requested for this invocation; ignoring"
            );
            return false;
        }
        true
    }

    /// Inner guard. First caller wins.
    fn claim(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }

    /// Closes both guards without emitting anything. Returns `false` when
    /// something already completed.
    fn mark_done(&self) -> bool {
        self.entered.store(true, Ordering::SeqCst);
        self.claim()
    }

    fn complete(&self, result: Option<Value>) {
        if !self.claim() {
            tracing::error!(
                event_id = %self.event_id,
                "Invocation has completed. Cannot call complete again for same invocation"
            );
            return;
        }
        self.emit(Completion::Succeeded(result));
    }

    fn post_error(&self, error: HandlerError) {
        let record = error.to_record();
        tracing::error!(event_id = %self.event_id, error = %render(&record), "invocation failed");
        if !self.claim() {
            tracing::error!(
                event_id = %self.event_id,
                "Invocation has completed. Dropping error reported after completion"
            );
            return;
        }
        self.emit(Completion::Failed(record));
    }

    fn done(&self, error: Option<HandlerError>, result: Option<Value>) {
        self.hook.reset();
        match error {
            Some(error) => self.post_error(error),
            None => self.complete(result),
        }
    }

    fn callback(self: &Arc<Self>, error: Option<HandlerError>, result: Option<Value>) {
        self.hook.reset();
        match error {
            Some(error) => self.post_error(error),
            None if !self.wait_for_quiescence.load(Ordering::SeqCst) => self.complete(result),
            None => {
                tracing::debug!(event_id = %self.event_id, "deferring completion until quiescence");
                let shared = Arc::clone(self);
                self.hook.arm(move || shared.complete(result));
            }
        }
    }

    fn emit(&self, completion: Completion) {
        if self.sink.send(completion).is_err() {
            tracing::warn!(event_id = %self.event_id, "executor is gone; completion dropped");
        }
    }
}

/// Capability object handed to the handler for one invocation.
#[derive(Clone)]
pub struct InvocationContext {
    shared: Arc<Shared>,
}

impl InvocationContext {
    pub fn event_id(&self) -> &EventId {
        &self.shared.event_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.shared.received_at
    }

    /// Whether the legacy callback waits for quiescence before completing.
    /// Defaults to `true`.
    pub fn wait_for_quiescence(&self) -> bool {
        self.shared.wait_for_quiescence.load(Ordering::SeqCst)
    }

    pub fn set_wait_for_quiescence(&self, wait: bool) {
        self.shared.wait_for_quiescence.store(wait, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// `done(None, result)`.
    pub fn succeed(&self, result: impl Into<Option<Value>>) {
        if self.shared.enter("succeed") {
            self.shared.done(None, result.into());
        }
    }

    /// Without an error this completes successfully with `{"message":"handled"}`.
    pub fn fail(&self, error: impl Into<Option<HandlerError>>) {
        if !self.shared.enter("fail") {
            return;
        }
        match error.into() {
            Some(error) => self.shared.done(Some(error), Some(Value::Object(Default::default()))),
            None => self.shared.done(None, Some(handled_marker())),
        }
    }

    pub fn done(&self, error: Option<HandlerError>, result: Option<Value>) {
        if self.shared.enter("done") {
            self.shared.done(error, result);
        }
    }

    /// Spawns background work owned by this invocation.
    ///
    /// The invocation is not quiescent until the task finishes. An `Err` is an
    /// unhandled rejection and a panic is an uncaught fault; both are reported
    /// against this invocation and terminate the process.
    ///
    /// Once the invocation has been retired (completed and quiescent) the task
    /// is dropped without running.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.shared.retired.load(Ordering::SeqCst) {
            tracing::warn!(
                event_id = %self.shared.event_id,
                "invocation already finished; background task rejected"
            );
            return;
        }
        let faults = self.shared.faults.clone();
        self.shared.tasks.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => faults.raise(Fault::unhandled_rejection(err)),
                Err(panic) => faults.raise(Fault::uncaught(HandlerError::from_panic(panic))),
            }
        });
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("event_id", &self.shared.event_id)
            .field("wait_for_quiescence", &self.wait_for_quiescence())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Legacy two-argument completion callback `(error, result)`.
///
/// Unlike `done`, a successful call honours `wait_for_quiescence`.
#[derive(Clone)]
pub struct Callback {
    shared: Arc<Shared>,
}

impl Callback {
    pub fn call(&self, error: Option<HandlerError>, result: Option<Value>) {
        if self.shared.enter("callback") {
            self.shared.callback(error, result);
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("event_id", &self.shared.event_id)
            .finish()
    }
}

/// Executor-side view of one invocation's completion state.
pub struct CompletionHandle {
    shared: Arc<Shared>,
}

impl CompletionHandle {
    /// Arms the hook with the implicit completion: if quiescence arrives and
    /// nothing completed, post `{}` as the result.
    pub fn arm_implicit_completion(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.hook.arm(move || {
            if shared.mark_done() {
                tracing::info!(event_id = %shared.event_id, "no completion requested; completing on quiescence");
                shared.emit(Completion::Succeeded(Some(implicit_result())));
            }
        });
    }

    /// Ends the invocation's lifetime: later `spawn` calls through escaped
    /// contexts are rejected.
    pub fn retire(&self) {
        self.shared.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }
}

pub struct CompletionParts {
    pub callback: Callback,
    pub context: InvocationContext,
    pub handle: CompletionHandle,
}

/// Inputs needed to build the completion state for one invocation.
pub struct CompletionWiring {
    pub hook: QuiescenceHook,
    pub tasks: TaskTracker,
    pub faults: FaultSender,
    pub sink: mpsc::UnboundedSender<Completion>,
}

pub fn build_completion(
    event_id: EventId,
    received_at: DateTime<Utc>,
    wiring: CompletionWiring,
) -> CompletionParts {
    let faults = wiring.faults.owned_by(event_id.clone());
    let shared = Arc::new(Shared {
        event_id,
        received_at,
        wait_for_quiescence: AtomicBool::new(true),
        entered: AtomicBool::new(false),
        completed: AtomicBool::new(false),
        retired: AtomicBool::new(false),
        hook: wiring.hook,
        tasks: wiring.tasks,
        faults,
        sink: wiring.sink,
    });

    CompletionParts {
        callback: Callback {
            shared: Arc::clone(&shared),
        },
        context: InvocationContext {
            shared: Arc::clone(&shared),
        },
        handle: CompletionHandle { shared },
    }
}

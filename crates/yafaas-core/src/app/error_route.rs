//! ErrorRoute - invocation 外で起きた非同期エラーの帰属先
//!
//! handler が `InvocationContext::spawn` したバックグラウンド処理は handler の
//! 呼び出しスタックの外で失敗する。そのエラーを「今 dispatch 中の invocation」に
//! 帰属させて報告し、その後プロセスを終了させるための仕組み。
//!
//! # 設計原則
//! - executor がちょうど1つ所有し、dispatch の直前に `bind` し直す
//! - invocation ごとの `FaultSender` は自分の `EventId` を fault に刻む。
//!   報告先は bind 中の invocation ではなく fault の発生元
//! - 何も bind されていない時のエラーは runtime error として報告する
//! - ローカルにログを出してからネットワーク報告する（報告失敗で元のエラーを隠さない）

use serde_json::Value;
use tokio::sync::mpsc;

use super::executor::{FatalReason, Termination};
use crate::domain::{ErrorRecord, EventId, HandlerError};
use crate::ports::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A background task panicked.
    Uncaught,
    /// A background task returned an error nobody observed.
    UnhandledRejection,
}

/// A fault raised outside the handler's call stack.
///
/// `origin` is the invocation whose background work raised it. Faults raised
/// through an unowned sender carry no origin and fall back to whatever the
/// route has bound.
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    error: HandlerError,
    origin: Option<EventId>,
}

impl Fault {
    pub fn uncaught(error: HandlerError) -> Self {
        Self {
            kind: FaultKind::Uncaught,
            error,
            origin: None,
        }
    }

    pub fn unhandled_rejection(error: HandlerError) -> Self {
        Self {
            kind: FaultKind::UnhandledRejection,
            error,
            origin: None,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn error(&self) -> &HandlerError {
        &self.error
    }

    pub fn origin(&self) -> Option<&EventId> {
        self.origin.as_ref()
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            FaultKind::Uncaught => "uncaughtException",
            FaultKind::UnhandledRejection => "unhandledRejection",
        }
    }

    fn reason(&self) -> FatalReason {
        match self.kind {
            FaultKind::Uncaught => FatalReason::UncaughtFault,
            FaultKind::UnhandledRejection => FatalReason::UnhandledRejection,
        }
    }
}

/// Cloneable handle used by invocation code to raise faults.
#[derive(Debug, Clone)]
pub struct FaultSender {
    tx: mpsc::UnboundedSender<Fault>,
    owner: Option<EventId>,
}

impl FaultSender {
    /// Stamps every fault raised through this sender with `id`.
    pub fn owned_by(mut self, id: EventId) -> Self {
        self.owner = Some(id);
        self
    }

    pub fn raise(&self, mut fault: Fault) {
        if fault.origin.is_none() {
            fault.origin = self.owner.clone();
        }
        if let Err(err) = self.tx.send(fault) {
            tracing::warn!(kind = err.0.label(), error = %err.0.error(), "error route closed; fault dropped");
        }
    }
}

pub struct ErrorRoute {
    current: Option<EventId>,
    tx: mpsc::UnboundedSender<Fault>,
    rx: mpsc::UnboundedReceiver<Fault>,
}

impl ErrorRoute {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            current: None,
            tx,
            rx,
        }
    }

    pub fn sender(&self) -> FaultSender {
        FaultSender {
            tx: self.tx.clone(),
            owner: None,
        }
    }

    /// Points the route at the invocation about to be dispatched.
    pub fn bind(&mut self, id: EventId) {
        self.current = Some(id);
    }

    pub fn unbind(&mut self) {
        self.current = None;
    }

    /// Waits for the next fault. The route keeps a sender alive, so this only
    /// resolves when a fault is actually raised.
    pub async fn next_fault(&mut self) -> Option<Fault> {
        self.rx.recv().await
    }

    pub fn try_next_fault(&mut self) -> Option<Fault> {
        self.rx.try_recv().ok()
    }

    /// Logs `fault`, reports it against the invocation that raised it (the
    /// bound one when the fault has no origin, a runtime error when neither
    /// exists) and returns the fatal termination.
    pub async fn report(&self, source: &dyn EventSource, fault: Fault) -> Termination {
        let record = fault.error().to_record();
        let target = fault.origin().or(self.current.as_ref());
        tracing::error!(
            event_id = target.map(EventId::as_str),
            kind = fault.label(),
            error = %render(&record),
            "fault during invocation"
        );
        if let (Some(origin), Some(current)) = (fault.origin(), self.current.as_ref()) {
            if origin != current {
                tracing::warn!(%origin, %current, "fault raised by an earlier invocation");
            }
        }

        let posted = match target {
            Some(id) => source.post_error(id, &record).await,
            None => source.post_runtime_error(&record).await,
        };
        if let Err(err) = posted {
            tracing::warn!(error = %err, "failed to report fault; exiting anyway");
        }

        Termination::Fatal(fault.reason())
    }

    /// Reports a failure that is not scoped to any invocation.
    pub async fn report_runtime(&self, source: &dyn EventSource, error: HandlerError) -> Termination {
        let record = error.to_record();
        tracing::error!(error = %render(&record), "runtime fault");

        if let Err(err) = source.post_runtime_error(&record).await {
            tracing::warn!(error = %err, "failed to report runtime fault; exiting anyway");
        }

        Termination::Fatal(FatalReason::RuntimeFault)
    }
}

impl Default for ErrorRoute {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn render(record: &ErrorRecord) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| Value::Null.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{Recorded, ScriptedEventSource};

    #[tokio::test]
    async fn bound_fault_is_reported_against_invocation() {
        let source = ScriptedEventSource::new();
        let mut route = ErrorRoute::new();
        route.bind(EventId::new("evt-a"));

        route
            .sender()
            .raise(Fault::unhandled_rejection(HandlerError::new("late")));
        let fault = route.next_fault().await.unwrap();
        let termination = route.report(&source, fault).await;

        assert_eq!(
            termination,
            Termination::Fatal(FatalReason::UnhandledRejection)
        );
        let log = source.recorded();
        assert!(matches!(
            &log[..],
            [Recorded::Error { id, record }] if id.as_str() == "evt-a" && record.message == "late"
        ));
    }

    #[tokio::test]
    async fn unbound_fault_becomes_runtime_error() {
        let source = ScriptedEventSource::new();
        let route = ErrorRoute::new();

        let termination = route
            .report(&source, Fault::uncaught(HandlerError::new("boom")))
            .await;

        assert_eq!(termination, Termination::Fatal(FatalReason::UncaughtFault));
        assert!(matches!(
            &source.recorded()[..],
            [Recorded::RuntimeError(record)] if record.message == "boom"
        ));
    }

    #[tokio::test]
    async fn rebinding_moves_attribution() {
        let source = ScriptedEventSource::new();
        let mut route = ErrorRoute::new();
        route.bind(EventId::new("evt-a"));
        route.bind(EventId::new("evt-b"));

        route
            .report(&source, Fault::uncaught(HandlerError::new("x")))
            .await;

        assert!(matches!(
            &source.recorded()[..],
            [Recorded::Error { id, .. }] if id.as_str() == "evt-b"
        ));
    }

    #[tokio::test]
    async fn owned_fault_keeps_its_origin_after_rebinding() {
        let source = ScriptedEventSource::new();
        let mut route = ErrorRoute::new();
        route.bind(EventId::new("evt-a"));
        let sender = route.sender().owned_by(EventId::new("evt-a"));
        route.unbind();
        route.bind(EventId::new("evt-b"));

        sender.raise(Fault::unhandled_rejection(HandlerError::new("from evt-a")));
        let fault = route.next_fault().await.unwrap();
        assert_eq!(fault.origin(), Some(&EventId::new("evt-a")));
        route.report(&source, fault).await;

        assert!(matches!(
            &source.recorded()[..],
            [Recorded::Error { id, record }] if id.as_str() == "evt-a" && record.message == "from evt-a"
        ));
    }

    #[tokio::test]
    async fn failed_report_still_terminates() {
        let source = ScriptedEventSource::new().fail_posts();
        let route = ErrorRoute::new();

        let termination = route
            .report_runtime(&source, HandlerError::new("startup"))
            .await;

        assert_eq!(termination, Termination::Fatal(FatalReason::RuntimeFault));
    }
}

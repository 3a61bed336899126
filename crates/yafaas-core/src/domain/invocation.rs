//! Invocation - 1回の fetch → execute → report サイクルの単位
//!
//! # 状態遷移
//! ```text
//! Fetched → Dispatched → Completing → Completed
//!                                   → Failed
//! ```
//! 終端状態（Completed / Failed）からは戻らない。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::ids::EventId;

/// InvocationState は invocation のライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// fetch-next から受け取った直後
    Fetched,
    /// handler に渡された（同時に Dispatched なのは常に1件）
    Dispatched,
    /// 結果/エラーの POST を送信中
    Completing,
    /// 成功レスポンスが受理された
    Completed,
    /// エラーレポートが受理された
    Failed,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Fetched, Dispatched)
                | (Dispatched, Completing)
                | (Completing, Completed)
                | (Completing, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid invocation transition for {event_id}: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub event_id: EventId,
    pub from: InvocationState,
    pub to: InvocationState,
}

/// One unit of work pulled from the event bus.
#[derive(Debug, Clone)]
pub struct Invocation {
    id: EventId,
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
    fetched_at: DateTime<Utc>,
    state: InvocationState,
}

impl Invocation {
    pub fn new(
        id: EventId,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            metadata,
            fetched_at,
            state: InvocationState::Fetched,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn transition(&mut self, to: InvocationState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                event_id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use InvocationState::*;

    fn invocation() -> Invocation {
        Invocation::new(
            EventId::new("evt-1"),
            b"{}".to_vec(),
            HashMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut inv = invocation();
        assert_eq!(inv.state(), Fetched);
        inv.transition(Dispatched).unwrap();
        inv.transition(Completing).unwrap();
        inv.transition(Completed).unwrap();
        assert!(inv.state().is_terminal());
    }

    #[rstest]
    #[case(Fetched, Completing)]
    #[case(Fetched, Completed)]
    #[case(Dispatched, Failed)]
    #[case(Completed, Dispatched)]
    #[case(Failed, Completing)]
    #[case(Completed, Failed)]
    fn rejects_skipping_or_leaving_terminal_states(
        #[case] from: InvocationState,
        #[case] to: InvocationState,
    ) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn invalid_transition_keeps_state() {
        let mut inv = invocation();
        let err = inv.transition(Completed).unwrap_err();
        assert_eq!(err.from, Fetched);
        assert_eq!(err.to, Completed);
        assert_eq!(inv.state(), Fetched);
    }
}

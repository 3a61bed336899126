//! ScriptedEventSource - テスト・ローカル開発用のフェイク event bus
//!
//! # 学習ポイント
//! - Mutex + VecDeque でスクリプト化された fetch 結果を再生
//! - 全リクエストを順番に記録（直列性・帰属の検証用）
//! - 同時 in-flight 数の最大値を計測
//!
//! スクリプトを使い切った後の fetch は `ClientError::Unreachable` を返す。
//! executor のループはそこで終わる。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ErrorRecord, EventId};
use crate::ports::{ClientError, EventSource, FetchedEvent};

/// One request observed by the fake control plane.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Fetch,
    Response { id: EventId, body: Option<Value> },
    Error { id: EventId, record: ErrorRecord },
    RuntimeError(ErrorRecord),
}

#[derive(Debug, Clone, Copy)]
enum PostBehavior {
    Accept,
    Fail,
    Reject(u16),
}

#[derive(Default)]
struct State {
    script: VecDeque<Result<FetchedEvent, ClientError>>,
    log: Vec<Recorded>,
}

pub struct ScriptedEventSource {
    state: Mutex<State>,
    posts: PostBehavior,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            posts: PostBehavior::Accept,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every post fails with a transport error.
    pub fn fail_posts(mut self) -> Self {
        self.posts = PostBehavior::Fail;
        self
    }

    /// Every post is answered with `status`.
    pub fn reject_posts(mut self, status: u16) -> Self {
        self.posts = PostBehavior::Reject(status);
        self
    }

    pub fn push_event(&self, event: FetchedEvent) {
        self.lock().script.push_back(Ok(event));
    }

    pub fn push_fetch_error(&self, err: ClientError) {
        self.lock().script.push_back(Err(err));
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.lock().log.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `entry`, then yields once so overlapping requests would be visible.
    async fn request(&self, entry: Recorded) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.lock().log.push(entry);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn post(&self, entry: Recorded, path: String) -> Result<(), ClientError> {
        self.request(entry).await;
        match self.posts {
            PostBehavior::Accept => Ok(()),
            PostBehavior::Fail => Err(ClientError::Transport(format!("scripted failure for {path}"))),
            PostBehavior::Reject(status) => Err(ClientError::Status { status, path }),
        }
    }
}

impl Default for ScriptedEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn next_event(&self) -> Result<FetchedEvent, ClientError> {
        self.request(Recorded::Fetch).await;
        let next = self.lock().script.pop_front();
        next.unwrap_or_else(|| Err(ClientError::Unreachable("script exhausted".to_string())))
    }

    async fn post_response(&self, id: &EventId, result: Option<&Value>) -> Result<(), ClientError> {
        let entry = Recorded::Response {
            id: id.clone(),
            body: result.cloned(),
        };
        self.post(entry, format!("/yafaas/events/{id}/response")).await
    }

    async fn post_error(&self, id: &EventId, error: &ErrorRecord) -> Result<(), ClientError> {
        let entry = Recorded::Error {
            id: id.clone(),
            record: error.clone(),
        };
        self.post(entry, format!("/yafaas/function/{id}/error")).await
    }

    async fn post_runtime_error(&self, error: &ErrorRecord) -> Result<(), ClientError> {
        self.post(Recorded::RuntimeError(error.clone()), "/yafaas/error".to_string())
            .await
    }
}

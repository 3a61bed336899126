//! EventSource port - コントロールプレーン（event bus）との通信
//!
//! # 実装
//! - **HttpEventSource**: 本番用（reqwest, keep-alive 接続1本）
//! - **ScriptedEventSource**: テスト・ローカル開発用のフェイク
//!
//! # 設計原則
//! - リクエストは常に直列（同時に in-flight なのは最大1件）
//! - connection refused は `ClientError::Unreachable` として区別する
//!   （呼び出し側が致命的エラーとして扱う、リトライはしない）

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ErrorRecord, EventId};

/// Result of a fetch-next long poll.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedEvent {
    pub id: EventId,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl FetchedEvent {
    pub fn new(id: impl Into<EventId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The control plane refused the connection. Never retried.
    #[error("event service unreachable: {0}")]
    Unreachable(String),

    #[error("fetch response did not carry an event-id header")]
    MissingEventId,

    #[error("event service returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Client half of the event bus protocol.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// `GET /yafaas/events/next`. Blocks until the server hands out work.
    async fn next_event(&self) -> Result<FetchedEvent, ClientError>;

    /// `POST /yafaas/events/{id}/response`. `None` is sent as `null`.
    async fn post_response(&self, id: &EventId, result: Option<&Value>)
    -> Result<(), ClientError>;

    /// `POST /yafaas/function/{id}/error`.
    async fn post_error(&self, id: &EventId, error: &ErrorRecord) -> Result<(), ClientError>;

    /// `POST /yafaas/error`. Failures not scoped to an invocation.
    async fn post_runtime_error(&self, error: &ErrorRecord) -> Result<(), ClientError>;
}

pub(crate) fn response_body(result: Option<&Value>) -> Result<String, ClientError> {
    Ok(serde_json::to_string(result.unwrap_or(&Value::Null))?)
}

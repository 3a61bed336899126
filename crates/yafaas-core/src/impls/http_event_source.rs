//! HttpEventSource - event bus への HTTP クライアント
//!
//! # 実装詳細
//! - reqwest::Client、ホストごとの idle keep-alive 接続は1本まで
//! - `tokio::sync::Mutex<()>` で全リクエストを直列化（in-flight は常に最大1件）
//! - タイムアウトなし（fetch は long poll）
//! - レスポンス本文は最後まで読んでから返す（接続を再利用するため）

use std::collections::HashMap;
use std::error::Error as StdError;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{ErrorRecord, EventId};
use crate::ports::event_source::response_body;
use crate::ports::{ClientError, EventSource, FetchedEvent};

pub const EVENT_ID_HEADER: &str = "event-id";

const NEXT_PATH: &str = "/yafaas/events/next";
const RUNTIME_ERROR_PATH: &str = "/yafaas/error";

pub struct HttpEventSource {
    client: reqwest::Client,
    base_url: String,
    gate: Mutex<()>,
}

impl HttpEventSource {
    /// `base_url` is `http://<host>:<port>` without a trailing slash.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gate: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: String, body: String) -> Result<(), ClientError> {
        let _in_flight = self.gate.lock().await;
        tracing::debug!(%path, "POST");

        let response = self
            .client
            .post(self.url(&path))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        response.bytes().await.map_err(classify)?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next_event(&self) -> Result<FetchedEvent, ClientError> {
        let _in_flight = self.gate.lock().await;
        tracing::debug!(path = NEXT_PATH, "GET");

        let response = self
            .client
            .get(self.url(NEXT_PATH))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let metadata = header_metadata(response.headers());
        let payload = response.bytes().await.map_err(classify)?.to_vec();

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: NEXT_PATH.to_string(),
            });
        }

        let id = metadata
            .get(EVENT_ID_HEADER)
            .cloned()
            .map(EventId::from)
            .ok_or(ClientError::MissingEventId)?;

        Ok(FetchedEvent {
            id,
            payload,
            metadata,
        })
    }

    async fn post_response(&self, id: &EventId, result: Option<&Value>) -> Result<(), ClientError> {
        let body = response_body(result)?;
        self.post(format!("/yafaas/events/{id}/response"), body).await
    }

    async fn post_error(&self, id: &EventId, error: &ErrorRecord) -> Result<(), ClientError> {
        let body = serde_json::to_string(error)?;
        self.post(format!("/yafaas/function/{id}/error"), body).await
    }

    async fn post_runtime_error(&self, error: &ErrorRecord) -> Result<(), ClientError> {
        let body = serde_json::to_string(error)?;
        self.post(RUNTIME_ERROR_PATH.to_string(), body).await
    }
}

/// Header names come back lowercased, so lookups are case-insensitive.
fn header_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn classify(err: reqwest::Error) -> ClientError {
    if connection_refused(&err) {
        ClientError::Unreachable(render_chain(&err))
    } else {
        ClientError::Transport(render_chain(&err))
    }
}

fn connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("connect failed")]
    struct Wrapper(#[source] io::Error);

    #[test]
    fn refused_is_found_anywhere_in_the_chain() {
        let err = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(connection_refused(&err));
        assert_eq!(render_chain(&err), "connect failed: refused");

        let other = Wrapper(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!connection_refused(&other));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let source = HttpEventSource::new("http://127.0.0.1:9001/").unwrap();
        assert_eq!(source.base_url(), "http://127.0.0.1:9001");
        assert_eq!(source.url(NEXT_PATH), "http://127.0.0.1:9001/yafaas/events/next");
    }

    #[test]
    fn metadata_keeps_utf8_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::HeaderName::from_bytes(b"Event-Id").unwrap(),
            "evt-1".parse().unwrap(),
        );
        headers.insert("x-trace", "abc".parse().unwrap());
        let metadata = header_metadata(&headers);
        assert_eq!(metadata.get("event-id").map(String::as_str), Some("evt-1"));
        assert_eq!(metadata.len(), 2);
    }
}

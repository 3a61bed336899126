//! Domain identifiers.
//!
//! Event id はコントロールプレーン側で採番される不透明な文字列です。
//! runtime 側では解釈せず、そのまま URL パスに埋め込んで返送します。

use serde::{Deserialize, Serialize};
use std::fmt;

/// EventId は1件の invocation を識別する
///
/// # 設計原則
/// - 中身は解釈しない（UUID かどうかも前提にしない）
/// - fetch-next のレスポンスヘッダ `event-id` からのみ生成される
/// - 文字列のまま `Display` できる（URL 組み立て・ログ用）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

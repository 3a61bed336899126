//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpEventSource**: 本番用の event bus クライアント
//! - **ScriptedEventSource**: テスト・ローカル開発用のフェイク

pub mod http_event_source;
pub mod inmem_event_source;

// 主要な型を再エクスポート
pub use self::http_event_source::{EVENT_ID_HEADER, HttpEventSource};
pub use self::inmem_event_source::{Recorded, ScriptedEventSource};

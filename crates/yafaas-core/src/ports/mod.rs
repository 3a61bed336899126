//! Ports - 抽象化レイヤー
//!
//! executor が外部に依存する箇所はすべてここの trait 越しに扱う。
//! - event bus（HTTP）
//! - handler の解決（ローダー）
//! - 時刻

pub mod clock;
pub mod event_source;
pub mod loader;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_source::{ClientError, EventSource, FetchedEvent};
pub use self::loader::{HandlerLoader, HandlerRef, LoadError, LoadErrorKind};

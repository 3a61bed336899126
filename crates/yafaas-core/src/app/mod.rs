//! App - アプリケーション層
//!
//! ports を組み合わせて invocation の実行ループを実装します。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder**: executor の構築とワイヤリング
//! - **InvocationExecutor**: fetch → dispatch → complete のループ
//! - **Completion**: succeed / fail / done / callback の exactly-once ステートマシン
//! - **QuiescenceHook**: quiescence 時に実行する継続を1つだけ保持するスロット
//! - **ErrorRoute**: 非同期エラーを今の invocation に帰属させる

pub mod builder;
pub mod completion;
pub mod error_route;
pub mod executor;
pub mod quiescence;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::completion::{Callback, InvocationContext};
pub use self::error_route::{ErrorRoute, Fault, FaultKind, FaultSender};
pub use self::executor::{
    ExecutorPhase, FATAL_EXIT_CODE, FatalReason, InvocationExecutor, Termination,
};
pub use self::quiescence::QuiescenceHook;

//! Typed - handler の呼び出し契約と、組み込みモジュールの登録
//!
//! # 二層構造
//! - **表層**: `EventHandler<E>`, `async_handler`, `handler_fn` - 書きやすさ優先
//! - **内部**: `Handler` trait - object-safe, executor が呼ぶのはこちら

pub mod handler;
pub mod registry;

// 主要な trait/型 を再エクスポート
pub use self::handler::{
    AsyncFnHandler, EventHandler, FnHandler, Handler, Response, TypedHandler, async_handler,
    handler_fn,
};
pub use self::registry::{Export, Module, ModuleRegistry, RegistryError};

//! yafaas-core
//!
//! Core building blocks for the yafaas function runtime client.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, invocation, errors, outcome）
//! - **ports**: 抽象化レイヤー（EventSource, HandlerLoader, Clock）
//! - **app**: 実行ループ（executor, completion, quiescence, error_route, builder）
//! - **typed**: handler の呼び出し契約とモジュールレジストリ
//! - **impls**: 実装（HttpEventSource, ScriptedEventSource）
//! - **config** / **observability**: 起動時設定とログ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{
    Callback, FATAL_EXIT_CODE, FatalReason, InvocationContext, InvocationExecutor,
    RuntimeBuilder, Termination,
};
pub use domain::{ErrorRecord, EventId, HandlerError};
pub use typed::{Handler, Module, ModuleRegistry, Response};

//! Handler trait - ユーザー関数の呼び出し契約
//!
//! # 三つの完了スタイル
//! - **戻り値**: `Response::Value` / `Response::Empty`（無視される）
//! - **deferred**: `Response::Deferred`（成功 → succeed、失敗 → fail）
//! - **明示呼び出し**: `InvocationContext::succeed/fail/done` または `Callback::call`
//!
//! # 学習ポイント
//! - object-safe な `Handler`（`Arc<dyn Handler>` でローダーから返せる）
//! - ジェネリック trait `EventHandler<E>` を `TypedHandler` で型消去する

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::{Callback, InvocationContext};
use crate::domain::HandlerError;

/// What a handler call hands back to the executor.
pub enum Response {
    /// Nothing returned.
    Empty,
    /// A plain value. Never completes the invocation on its own.
    Value(Value),
    /// Deferred result: `Ok` feeds `succeed`, `Err` (or a panic) feeds `fail`.
    Deferred(BoxFuture<'static, Result<Option<Value>, HandlerError>>),
}

impl Response {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// A loaded user function.
///
/// `call` runs synchronously on the executor's task. Returning `Err` (or
/// panicking) is the "raised synchronously" case and is routed through the
/// legacy callback as an invocation error.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        payload: Value,
        ctx: InvocationContext,
        callback: Callback,
    ) -> Result<Response, HandlerError>;
}

/// Handler backed by a raw closure.
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(Value, InvocationContext, Callback) -> Result<Response, HandlerError> + Send + Sync,
{
    FnHandler { f }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(Value, InvocationContext, Callback) -> Result<Response, HandlerError> + Send + Sync,
{
    fn call(
        &self,
        payload: Value,
        ctx: InvocationContext,
        callback: Callback,
    ) -> Result<Response, HandlerError> {
        (self.f)(payload, ctx, callback)
    }
}

/// Handler backed by an async closure; its future becomes the deferred result.
pub struct AsyncFnHandler<F> {
    f: F,
}

pub fn async_handler<F, Fut>(f: F) -> AsyncFnHandler<F>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    AsyncFnHandler { f }
}

impl<F, Fut> Handler for AsyncFnHandler<F>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    fn call(
        &self,
        payload: Value,
        ctx: InvocationContext,
        _callback: Callback,
    ) -> Result<Response, HandlerError> {
        Ok(Response::deferred((self.f)(payload, ctx)))
    }
}

/// EventHandler は型付きイベント E を処理して R を返す
///
/// # 使用例
/// ```ignore
/// struct Greeter;
///
/// #[async_trait]
/// impl EventHandler<Greet> for Greeter {
///     type Output = GreetReply;
///     async fn handle(&self, event: Greet, _ctx: InvocationContext) -> Result<GreetReply, HandlerError> {
///         Ok(GreetReply { text: format!("hello {}", event.name) })
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler<E>: Send + Sync + 'static
where
    E: DeserializeOwned + Send + 'static,
{
    type Output: Serialize + Send;

    async fn handle(&self, event: E, ctx: InvocationContext) -> Result<Self::Output, HandlerError>;
}

/// Type erasure: `EventHandler<E>` → `dyn Handler`.
pub struct TypedHandler<E, H> {
    handler: Arc<H>,
    _marker: PhantomData<fn(E)>,
}

impl<E, H> TypedHandler<E, H>
where
    E: DeserializeOwned + Send + 'static,
    H: EventHandler<E>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<E, H> Handler for TypedHandler<E, H>
where
    E: DeserializeOwned + Send + 'static,
    H: EventHandler<E>,
{
    fn call(
        &self,
        payload: Value,
        ctx: InvocationContext,
        _callback: Callback,
    ) -> Result<Response, HandlerError> {
        // decode 失敗は同期エラー扱い
        let event: E = serde_json::from_value(payload)?;
        let handler = Arc::clone(&self.handler);
        Ok(Response::deferred(async move {
            let output = handler.handle(event, ctx).await?;
            Ok::<_, HandlerError>(Some(serde_json::to_value(output)?))
        }))
    }
}

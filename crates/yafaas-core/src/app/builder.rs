//! RuntimeBuilder - executor の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: handler のロード失敗は最初の fetch より前に分かる

use std::sync::Arc;

use super::executor::InvocationExecutor;
use crate::ports::{Clock, EventSource, HandlerLoader, HandlerRef, LoadError, SystemClock};
use crate::typed::Handler;

/// RuntimeBuilder は InvocationExecutor を構築
///
/// # 使用例
/// ```ignore
/// let executor = RuntimeBuilder::new()
///     .event_source(Arc::new(HttpEventSource::new(&endpoint)?))
///     .loader(Arc::new(registry))
///     .handler_ref("index.handler")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    source: Option<Arc<dyn EventSource>>,
    loader: Option<Arc<dyn HandlerLoader>>,
    reference: Option<String>,
    handler: Option<Arc<dyn Handler>>,
    clock: Arc<dyn Clock>,
}

/// BuildError は executor 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no event source configured")]
    MissingEventSource,

    #[error("no handler configured; set a handler reference with a loader, or a handler")]
    MissingHandler,

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            loader: None,
            reference: None,
            handler: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn HandlerLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// `<module>.<export-path>` resolved through the loader at `build()`.
    pub fn handler_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Uses `handler` directly, bypassing the loader.
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # 検証
    /// - event source が設定されているか
    /// - handler 参照の形式と解決結果（LoadError はそのまま返す）
    pub fn build(self) -> Result<InvocationExecutor, BuildError> {
        let source = self.source.ok_or(BuildError::MissingEventSource)?;

        let handler = match (self.handler, self.reference, self.loader) {
            (Some(handler), _, _) => handler,
            (None, Some(reference), Some(loader)) => {
                let reference = HandlerRef::parse(&reference)?;
                let handler = loader.load(&reference)?;
                tracing::info!(handler = %reference, "handler loaded");
                handler
            }
            _ => return Err(BuildError::MissingHandler),
        };

        Ok(InvocationExecutor::new(source, handler).with_clock(self.clock))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::ScriptedEventSource;
    use crate::ports::LoadErrorKind;
    use crate::typed::{Module, ModuleRegistry, Response, handler_fn};

    fn registry() -> Arc<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();
        registry
            .register(
                "index",
                Module::new().handler("handler", handler_fn(|_p, _c, _cb| Ok(Response::Empty))),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_build_success() {
        let executor = RuntimeBuilder::new()
            .event_source(Arc::new(ScriptedEventSource::new()))
            .loader(registry())
            .handler_ref("index.handler")
            .build();
        assert!(executor.is_ok());
    }

    #[test]
    fn test_build_with_direct_handler() {
        let executor = RuntimeBuilder::new()
            .event_source(Arc::new(ScriptedEventSource::new()))
            .handler(handler_fn(|_p, _c, _cb| Ok(Response::Empty)))
            .build();
        assert!(executor.is_ok());
    }

    #[test]
    fn test_build_missing_event_source() {
        let result = RuntimeBuilder::new()
            .loader(registry())
            .handler_ref("index.handler")
            .build();
        assert!(matches!(result, Err(BuildError::MissingEventSource)));
    }

    #[test]
    fn test_build_missing_handler() {
        let result = RuntimeBuilder::new()
            .event_source(Arc::new(ScriptedEventSource::new()))
            .handler_ref("index.handler")
            .build();
        assert!(matches!(result, Err(BuildError::MissingHandler)));
    }

    #[test]
    fn test_build_surfaces_load_errors() {
        let result = RuntimeBuilder::new()
            .event_source(Arc::new(ScriptedEventSource::new()))
            .loader(registry())
            .handler_ref("index.nope")
            .build();
        assert!(matches!(result, Err(BuildError::Load(e)) if e.kind() == LoadErrorKind::NotFound));

        let result = RuntimeBuilder::new()
            .event_source(Arc::new(ScriptedEventSource::new()))
            .loader(registry())
            .handler_ref("nodot")
            .build();
        assert!(matches!(result, Err(BuildError::Load(e)) if e.kind() == LoadErrorKind::BadFormat));
    }
}

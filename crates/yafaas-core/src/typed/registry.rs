//! ModuleRegistry - バイナリに組み込まれた handler モジュールの表
//!
//! `HandlerLoader` の実装。`<module>.<export-path>` を
//! モジュール名 → ネストした export の順に辿って解決する。
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - 初期化に失敗したモジュールも「壊れたモジュール」として登録し、
//!   ロード時に分類済みエラー（SyntaxError）として返す

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use super::handler::Handler;
use crate::ports::{HandlerLoader, HandlerRef, LoadError};

/// One exported binding of a module.
#[derive(Clone)]
pub enum Export {
    Handler(Arc<dyn Handler>),
    /// Non-callable export (configuration, constants, ...).
    Value(Value),
    Namespace(Module),
}

/// A module: a tree of named exports.
#[derive(Clone, Default)]
pub struct Module {
    exports: BTreeMap<String, Export>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<H: Handler + 'static>(mut self, name: impl Into<String>, handler: H) -> Self {
        self.exports
            .insert(name.into(), Export::Handler(Arc::new(handler)));
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.exports.insert(name.into(), Export::Value(value));
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, module: Module) -> Self {
        self.exports.insert(name.into(), Export::Namespace(module));
        self
    }

    fn resolve<'a>(&self, mut segments: impl Iterator<Item = &'a str>) -> Option<&Export> {
        let first = segments.next()?;
        let mut current = self.exports.get(first)?;
        for segment in segments {
            current = match current {
                Export::Namespace(module) => module.exports.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

enum ModuleEntry {
    Ready(Module),
    /// Module whose initializer failed; loading it reports a syntax error.
    Broken(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Module '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, module: Module) -> Result<(), RegistryError> {
        self.insert(name.into(), ModuleEntry::Ready(module))
    }

    /// Registers a module built by `init`. An initializer error is kept and
    /// surfaces as `LoadError::SyntaxError` when the module is loaded.
    pub fn register_with<F>(&mut self, name: impl Into<String>, init: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> Result<Module, String>,
    {
        let name = name.into();
        let entry = match init() {
            Ok(module) => ModuleEntry::Ready(module),
            Err(message) => {
                tracing::warn!(module = %name, %message, "module failed to initialize");
                ModuleEntry::Broken(message)
            }
        };
        self.insert(name, entry)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    fn insert(&mut self, name: String, entry: ModuleEntry) -> Result<(), RegistryError> {
        if self.modules.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.modules.insert(name, entry);
        Ok(())
    }
}

impl HandlerLoader for ModuleRegistry {
    fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, LoadError> {
        let module = match self.modules.get(reference.module()) {
            None => return Err(LoadError::ModuleNotFound(reference.module().to_string())),
            Some(ModuleEntry::Broken(message)) => {
                return Err(LoadError::SyntaxError {
                    module: reference.module().to_string(),
                    message: message.clone(),
                });
            }
            Some(ModuleEntry::Ready(module)) => module,
        };

        match module.resolve(reference.export_segments()) {
            Some(Export::Handler(handler)) => Ok(Arc::clone(handler)),
            Some(_) => Err(LoadError::NotCallable(reference.to_string())),
            None => {
                tracing::info!(handler = %reference, "handler is undefined or not exported");
                Err(LoadError::NotFound(reference.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::LoadErrorKind;
    use crate::typed::handler::{Response, handler_fn};
    use rstest::rstest;
    use serde_json::json;

    fn noop() -> impl Handler {
        handler_fn(|_payload, _ctx, _cb| Ok(Response::Empty))
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry
            .register(
                "index",
                Module::new()
                    .handler("handler", noop())
                    .value("config", json!({ "region": "local" }))
                    .namespace("routes", Module::new().handler("get", noop())),
            )
            .unwrap();
        registry
            .register_with("broken", || Err("unexpected token '}'".to_string()))
            .unwrap();
        registry
    }

    #[rstest]
    #[case("index.handler")]
    #[case("index.routes.get")]
    fn resolves_handlers(#[case] reference: &str) {
        let reference = HandlerRef::parse(reference).unwrap();
        assert!(registry().load(&reference).is_ok());
    }

    #[rstest]
    #[case("index.missing", LoadErrorKind::NotFound)]
    #[case("index.", LoadErrorKind::NotFound)]
    #[case("index.routes.post", LoadErrorKind::NotFound)]
    #[case("index.handler.inner", LoadErrorKind::NotFound)]
    #[case("index.config", LoadErrorKind::NotCallable)]
    #[case("index.routes", LoadErrorKind::NotCallable)]
    #[case("broken.handler", LoadErrorKind::SyntaxError)]
    #[case("nope.handler", LoadErrorKind::ModuleNotFound)]
    fn classifies_load_failures(#[case] reference: &str, #[case] kind: LoadErrorKind) {
        let reference = HandlerRef::parse(reference).unwrap();
        let err = registry().load(&reference).err().unwrap();
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn not_found_message_names_the_reference() {
        let reference = HandlerRef::parse("index.missing").unwrap();
        let err = registry().load(&reference).err().unwrap();
        assert_eq!(err.to_string(), "index.missing is undefined or not exported");
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = registry();
        let result = registry.register("index", Module::new());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "index"));
    }

    #[test]
    fn module_names_lists_registered_modules() {
        let mut names = registry().module_names();
        names.sort();
        assert_eq!(names, vec!["broken".to_string(), "index".to_string()]);
    }
}

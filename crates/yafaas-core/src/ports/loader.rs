//! HandlerLoader port - `<module>.<export-path>` 文字列から handler を解決
//!
//! executor は解決の仕組みを知らない。結果（callable か分類済みエラー）だけを使う。
//!
//! # 実装
//! - **ModuleRegistry**（typed::registry）: バイナリに組み込まれたモジュール表

use std::fmt;
use std::sync::Arc;

use crate::typed::Handler;

/// Parsed handler reference, e.g. `index.handler` or `app.v2.routes.get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRef {
    module: String,
    export_path: String,
}

impl HandlerRef {
    /// Splits at the first `.`: everything before is the module name, the
    /// rest is a (possibly nested) export path.
    pub fn parse(reference: &str) -> Result<Self, LoadError> {
        match reference.split_once('.') {
            Some((module, export_path)) => Ok(Self {
                module: module.to_string(),
                export_path: export_path.to_string(),
            }),
            None => Err(LoadError::BadFormat(reference.to_string())),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn export_path(&self) -> &str {
        &self.export_path
    }

    pub fn export_segments(&self) -> impl Iterator<Item = &str> {
        self.export_path.split('.')
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.export_path)
    }
}

impl std::str::FromStr for HandlerRef {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// LoadErrorKind は handler ロード失敗の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    BadFormat,
    NotFound,
    NotCallable,
    SyntaxError,
    ModuleNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Bad handler format, got: {0} wanted: <module name>.<handler name>")]
    BadFormat(String),

    #[error("{0} is undefined or not exported")]
    NotFound(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("module '{module}' failed to initialize: {message}")]
    SyntaxError { module: String, message: String },

    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            Self::BadFormat(_) => LoadErrorKind::BadFormat,
            Self::NotFound(_) => LoadErrorKind::NotFound,
            Self::NotCallable(_) => LoadErrorKind::NotCallable,
            Self::SyntaxError { .. } => LoadErrorKind::SyntaxError,
            Self::ModuleNotFound(_) => LoadErrorKind::ModuleNotFound,
        }
    }
}

pub trait HandlerLoader: Send + Sync {
    fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("index.handler", "index", "handler")]
    #[case("app.routes.get", "app", "routes.get")]
    #[case(".handler", "", "handler")]
    #[case("index.", "index", "")]
    fn parses_module_and_export_path(
        #[case] input: &str,
        #[case] module: &str,
        #[case] export_path: &str,
    ) {
        let r = HandlerRef::parse(input).unwrap();
        assert_eq!(r.module(), module);
        assert_eq!(r.export_path(), export_path);
        assert_eq!(r.to_string(), input);
    }

    #[rstest]
    #[case("index")]
    #[case("")]
    fn rejects_references_without_a_dot(#[case] input: &str) {
        let err = HandlerRef::parse(input).unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::BadFormat);
        assert!(err.to_string().contains("wanted: <module name>.<handler name>"));
    }

    #[test]
    fn nested_export_segments() {
        let r: HandlerRef = "app.v2.routes.get".parse().unwrap();
        let segments: Vec<_> = r.export_segments().collect();
        assert_eq!(segments, vec!["v2", "routes", "get"]);
    }
}

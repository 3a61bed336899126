//! Errors - handler 由来のエラーとワイヤ上のエラーレコード
//!
//! # 二層構造
//! - **HandlerError**: handler コードが返す/投げるエラー（`?` で任意のエラーから変換可能）
//! - **ErrorRecord**: event bus に送るシリアライズ形式 `{message, code, name, stack}`

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ErrorRecord はコントロールプレーンに POST されるエラー本文
///
/// `code` と `stack` は値がない場合フィールドごと省略する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A failure produced by user handler code.
///
/// Any `std::error::Error + Send + Sync + 'static` converts into this with `?`,
/// so `HandlerError` itself does not implement `std::error::Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    name: String,
    message: String,
    code: Option<Value>,
    stack: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<Value>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Builds an error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new(message).with_name("Panic")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&Value> {
        self.code.as_ref()
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            message: self.message.clone(),
            code: self.code.clone(),
            name: self.name.clone(),
            stack: self.stack.clone(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let name = short_type_name::<E>().to_string();
        let message = err.to_string();

        // source() チェーンを stack 相当として残す
        let mut lines = vec![format!("{name}: {message}")];
        let mut source = err.source();
        while let Some(cause) = source {
            lines.push(format!("    caused by: {cause}"));
            source = cause.source();
        }

        Self {
            name,
            message,
            code: None,
            stack: Some(lines.join("\n")),
        }
    }
}

impl From<HandlerError> for ErrorRecord {
    fn from(err: HandlerError) -> Self {
        ErrorRecord {
            message: err.message,
            code: err.code,
            name: err.name,
            stack: err.stack,
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError {
        #[source]
        cause: std::io::Error,
    }

    #[test]
    fn record_omits_absent_code_and_stack() {
        let record = HandlerError::new("boom").to_record();
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v, serde_json::json!({ "message": "boom", "name": "Error" }));
    }

    #[test]
    fn record_keeps_code_and_stack_when_present() {
        let record = HandlerError::new("nope")
            .with_name("TypeError")
            .with_code("E_NOPE")
            .with_stack("TypeError: nope")
            .to_record();
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["code"], "E_NOPE");
        assert_eq!(v["name"], "TypeError");
        assert_eq!(v["stack"], "TypeError: nope");
    }

    #[test]
    fn std_errors_convert_with_type_name_and_source_chain() {
        let err = DiskError {
            cause: std::io::Error::other("fan stopped"),
        };
        let handler_err = HandlerError::from(err);

        assert_eq!(handler_err.name(), "DiskError");
        assert_eq!(handler_err.message(), "disk on fire");
        let stack = handler_err.stack().unwrap();
        assert!(stack.starts_with("DiskError: disk on fire"));
        assert!(stack.contains("caused by: fan stopped"));
    }

    #[test]
    fn question_mark_converts_into_handler_error() {
        fn parse() -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::from_str("{not json")?)
        }
        let err = parse().unwrap_err();
        assert_eq!(err.name(), "Error");
        assert!(!err.message().is_empty());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = HandlerError::from_panic(Box::new("kaboom"));
        assert_eq!(err.name(), "Panic");
        assert_eq!(err.message(), "kaboom");

        let err = HandlerError::from_panic(Box::new(String::from("owned kaboom")));
        assert_eq!(err.message(), "owned kaboom");

        let err = HandlerError::from_panic(Box::new(42_u8));
        assert_eq!(err.message(), "handler panicked");
    }
}

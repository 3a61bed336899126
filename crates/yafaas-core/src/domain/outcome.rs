//! Completion: the single value an invocation resolves to.
//!
//! Every completion style (returned future, `succeed`/`fail`/`done`, legacy
//! callback, implicit completion on quiescence) funnels into one of these.

use serde_json::Value;

use super::errors::ErrorRecord;

/// Result body posted when `fail()` is called without an error.
pub fn handled_marker() -> Value {
    serde_json::json!({ "message": "handled" })
}

/// Result body posted when an invocation completes implicitly on quiescence.
pub fn implicit_result() -> Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Posted to `/yafaas/events/{id}/response`; `None` is sent as `null`.
    Succeeded(Option<Value>),

    /// Posted to `/yafaas/function/{id}/error`.
    Failed(ErrorRecord),
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

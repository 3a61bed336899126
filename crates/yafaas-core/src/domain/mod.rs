//! Domain model (ids, invocation lifecycle, errors, completion values).
//!
//! このモジュールは HTTP や tokio を前提にしない。
//! executor / ports から共通で使う「形」だけを定義する。

pub mod errors;
pub mod ids;
pub mod invocation;
pub mod outcome;

pub use errors::{ErrorRecord, HandlerError};
pub use ids::EventId;
pub use invocation::{InvalidTransition, Invocation, InvocationState};
pub use outcome::Completion;

//! QuiescenceHook - 「もうやることがない」時に実行する継続のスロット
//!
//! # 設計
//! - スロットは1つだけ。`arm` は前の継続を上書きする
//! - `fire` は継続を取り出して実行する。自動で再装填はしない
//!   （継続自身が必要なら `arm` し直す）
//! - executor が所有し、dispatch ごとに `reset` する
//!
//! 継続の実行中はロックを保持しないので、継続の中から `arm` / `reset` してよい。

use std::sync::{Arc, Mutex, PoisonError};

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct QuiescenceHook {
    slot: Arc<Mutex<Option<Continuation>>>,
}

impl QuiescenceHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `continuation`, replacing whatever was armed before.
    pub fn arm<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.lock() = Some(Box::new(continuation));
    }

    /// Disarms the hook.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Runs the armed continuation, if any. Returns whether one ran.
    pub fn fire(&self) -> bool {
        let continuation = self.lock().take();
        match continuation {
            Some(continuation) => {
                continuation();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Continuation>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for QuiescenceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceHook")
            .field("armed", &self.is_armed())
            .finish()
    }
}

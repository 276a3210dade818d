//! Lifecycle hooks
//!
//! One slot per connection-level signal. Registering a hook replaces the
//! previous one, unlike event subscriptions which accumulate.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::Error;

/// Code and reason reported when a connection closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

pub type OpenHook = Arc<dyn Fn() + Send + Sync>;
pub type CloseHook = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;
/// Receives every inbound text verbatim, before decoding
pub type MessageHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Single-slot hook set
#[derive(Default, Clone)]
pub struct LifecycleHooks {
    open: Option<OpenHook>,
    close: Option<CloseHook>,
    error: Option<ErrorHook>,
    message: Option<MessageHook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_open(&mut self, hook: OpenHook) {
        self.open = Some(hook);
    }

    pub fn set_close(&mut self, hook: CloseHook) {
        self.close = Some(hook);
    }

    pub fn set_error(&mut self, hook: ErrorHook) {
        self.error = Some(hook);
    }

    pub fn set_message(&mut self, hook: MessageHook) {
        self.message = Some(hook);
    }

    pub fn open(&self) -> Option<OpenHook> {
        self.open.clone()
    }

    pub fn close(&self) -> Option<CloseHook> {
        self.close.clone()
    }

    pub fn error(&self) -> Option<ErrorHook> {
        self.error.clone()
    }

    pub fn message(&self) -> Option<MessageHook> {
        self.message.clone()
    }
}

/// Run a hook, logging instead of unwinding if it panics
pub fn run_hook(kind: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(hook = kind, "Lifecycle hook panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut hooks = LifecycleHooks::new();
        let f = first.clone();
        hooks.set_open(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = second.clone();
        hooks.set_open(Arc::new(move || {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        if let Some(hook) = hooks.open() {
            hook();
        }

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_slots() {
        let hooks = LifecycleHooks::new();
        assert!(hooks.open().is_none());
        assert!(hooks.close().is_none());
        assert!(hooks.error().is_none());
        assert!(hooks.message().is_none());
    }

    #[test]
    fn test_run_hook_contains_panic() {
        run_hook("open", || panic!("hook failure"));
    }
}

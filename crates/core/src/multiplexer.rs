//! Event multiplexer
//!
//! Holds a peer's subscriptions and lifecycle hooks and runs the inbound
//! pipeline: raw message hook, envelope decode, event dispatch.
//!
//! Locks are only held long enough to copy out the handlers; nothing is
//! invoked while a lock is held, so handlers may subscribe or replace hooks.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::envelope::{decode, DecodeFailure};
use crate::error::{Error, Result};
use crate::hooks::{run_hook, CloseInfo, LifecycleHooks};
use crate::registry::{invoke_all, EventHandler, Subscriptions};

/// What happened to one inbound message
#[derive(Debug)]
pub enum Inbound {
    /// Decoded and handed to this many handlers
    Dispatched { event: String, handlers: usize },
    /// Could not be decoded; no subscriber saw it
    Undecodable(DecodeFailure),
}

/// Subscription registry plus lifecycle hooks for one peer
#[derive(Default)]
pub struct Multiplexer {
    subscriptions: RwLock<Subscriptions>,
    hooks: RwLock<LifecycleHooks>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn subscribe(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.subscriptions.write().subscribe(event, handler)
    }

    pub fn unsubscribe(&self, event: &str, handler: &EventHandler) -> usize {
        self.subscriptions.write().unsubscribe(event, handler)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.subscriptions.read().handler_count(event)
    }

    /// Dispatch an already-decoded event
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let handlers = self.subscriptions.read().snapshot(event);
        invoke_all(event, &handlers, data)
    }

    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.write().set_open(Arc::new(f));
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.hooks.write().set_close(Arc::new(f));
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.hooks.write().set_error(Arc::new(f));
    }

    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.write().set_message(Arc::new(f));
    }

    pub(crate) fn fire_open(&self) {
        let hook = self.hooks.read().open();
        if let Some(hook) = hook {
            run_hook("open", || hook());
        }
    }

    pub(crate) fn fire_close(&self, info: &CloseInfo) {
        let hook = self.hooks.read().close();
        if let Some(hook) = hook {
            run_hook("close", || hook(info));
        }
    }

    pub(crate) fn fire_error(&self, err: &Error) {
        let hook = self.hooks.read().error();
        if let Some(hook) = hook {
            run_hook("error", || hook(err));
        }
    }

    /// Run one inbound text message through the pipeline
    pub fn deliver(&self, text: &str) -> Inbound {
        let hook = self.hooks.read().message();
        if let Some(hook) = hook {
            run_hook("message", || hook(text));
        }

        match decode(text) {
            Ok(envelope) => {
                let handlers = self.dispatch(&envelope.event, &envelope.data);
                Inbound::Dispatched {
                    event: envelope.event,
                    handlers,
                }
            }
            Err(failure) => {
                tracing::trace!(error = %failure, "Dropping undecodable message");
                Inbound::Undecodable(failure)
            }
        }
    }
}

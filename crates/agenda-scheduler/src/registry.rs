//! Callback registries — string-keyed notifier and action handlers.
//!
//! Handlers are registered at startup and resolved by name when a
//! [`ScheduledTask`](crate::tasks::ScheduledTask) is built. Binding captures
//! the resolved handler, so later registry changes never affect armed tasks.
//! An unknown or empty name binds to nothing; that is a no-op, not an error.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Future returned by every handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Notifier: `(event id, title) -> side effect`.
pub type NotifierHandler = Arc<dyn Fn(String, String) -> HandlerFuture + Send + Sync>;

/// Action: `() -> side effect`.
pub type ActionHandler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// A handler bound to a specific task, ready to invoke.
pub type Callback = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Notifier and action registries.
#[derive(Default)]
pub struct CallbackRegistry {
    notifiers: RwLock<HashMap<String, NotifierHandler>>,
    actions: RwLock<HashMap<String, ActionHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a notifier.
    pub fn register_notifier<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: NotifierHandler = Arc::new(move |id, title| f(id, title).boxed());
        let mut map = self.notifiers.write().unwrap_or_else(|e| e.into_inner());
        if map.insert(name.to_string(), handler).is_some() {
            tracing::debug!("🔁 Notifier '{name}' replaced");
        }
    }

    /// Register (or replace) an action.
    pub fn register_action<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: ActionHandler = Arc::new(move || f().boxed());
        let mut map = self.actions.write().unwrap_or_else(|e| e.into_inner());
        if map.insert(name.to_string(), handler).is_some() {
            tracing::debug!("🔁 Action '{name}' replaced");
        }
    }

    pub fn unregister_action(&self, name: &str) -> bool {
        let mut map = self.actions.write().unwrap_or_else(|e| e.into_inner());
        map.remove(name).is_some()
    }

    pub fn resolve_notifier(&self, name: &str) -> Option<NotifierHandler> {
        if name.is_empty() {
            return None;
        }
        let map = self.notifiers.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    pub fn resolve_action(&self, name: &str) -> Option<ActionHandler> {
        if name.is_empty() {
            return None;
        }
        let map = self.actions.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    /// Resolve a notifier and bind it to an event's identity.
    pub fn bind_notifier(&self, name: &str, id: &str, title: &str) -> Option<Callback> {
        let Some(handler) = self.resolve_notifier(name) else {
            if !name.is_empty() {
                tracing::debug!("🔕 Notifier '{name}' not registered; '{title}' will fire silently");
            }
            return None;
        };
        let id = id.to_string();
        let title = title.to_string();
        Some(Arc::new(move || handler(id.clone(), title.clone())))
    }

    pub fn bind_action(&self, name: &str) -> Option<Callback> {
        let Some(handler) = self.resolve_action(name) else {
            if !name.is_empty() {
                tracing::debug!("🔕 Action '{name}' not registered");
            }
            return None;
        };
        Some(handler)
    }

    /// Sorted notifier names.
    pub fn notifier_names(&self) -> Vec<String> {
        let map = self.notifiers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted action names.
    pub fn action_names(&self) -> Vec<String> {
        let map = self.actions.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}

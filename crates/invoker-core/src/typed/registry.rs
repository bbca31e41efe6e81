//! HandlerRegistry - Handler の登録と管理
//!
//! 文字列から関数を探す reflection は使いません。起動時に明示的に登録した
//! `Arc<dyn DynHandler>` を `namespace -> entry_point` の 2 段の HashMap で保持します。
//!
//! - 初期化中だけ mutable、実行中は immutable（ロック不要）

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::handler::{DynHandler, Handler, HandlerError, TypedHandler, handler_fn};
use super::resolver::ResolutionError;

/// `"<namespace>.<entryPoint>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId {
    namespace: String,
    entry_point: String,
}

impl HandlerId {
    pub fn new(namespace: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Split at the last `.`. Both halves must be non-empty.
    ///
    /// `"a.b.c"` is namespace `a.b`, entry point `c`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (namespace, entry_point) = raw.trim().rsplit_once('.')?;
        if namespace.is_empty() || entry_point.is_empty() {
            return None;
        }
        Some(Self::new(namespace, entry_point))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.entry_point)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler '{0}' is already registered")]
    AlreadyRegistered(HandlerId),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HashMap<String, Arc<dyn DynHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: DynHandler + 'static>(
        &mut self,
        id: HandlerId,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_arc(id, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        id: HandlerId,
        handler: Arc<dyn DynHandler>,
    ) -> Result<(), RegistryError> {
        let entries = self.handlers.entry(id.namespace.clone()).or_default();
        if entries.contains_key(&id.entry_point) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        entries.insert(id.entry_point, handler);
        Ok(())
    }

    /// Register a handler whose payload is deserialized into `T` first.
    pub fn register_typed<T, H>(&mut self, id: HandlerId, handler: H) -> Result<(), RegistryError>
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T> + 'static,
    {
        self.register(id, TypedHandler::<T, H>::new(handler))
    }

    pub fn register_fn<F, Fut>(&mut self, id: HandlerId, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(id, handler_fn(f))
    }

    /// Plain map lookup. Distinguishes a missing namespace from a missing
    /// entry point so the fallback log says which half was wrong.
    pub fn lookup(&self, id: &HandlerId) -> Result<Arc<dyn DynHandler>, ResolutionError> {
        let entries =
            self.handlers
                .get(&id.namespace)
                .ok_or_else(|| ResolutionError::NamespaceNotFound {
                    namespace: id.namespace.clone(),
                })?;
        entries
            .get(&id.entry_point)
            .cloned()
            .ok_or_else(|| ResolutionError::EntryPointNotFound {
                namespace: id.namespace.clone(),
                entry_point: id.entry_point.clone(),
            })
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.lookup(id).is_ok()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<HandlerId> {
        let mut ids: Vec<HandlerId> = self
            .handlers
            .iter()
            .flat_map(|(ns, entries)| entries.keys().map(move |ep| HandlerId::new(ns, ep)))
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

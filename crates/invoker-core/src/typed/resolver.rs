//! HandlerResolver - 設定文字列から HandlerRef を解決する
//!
//! 解決できない場合（未設定 / 形式不正 / 未登録）は必ず default handler に
//! フォールバックします。理由は `Resolved::fallback` で呼び出し側に返すので、
//! ログを出すかどうかは呼び出し側が決めます。
//!
//! プロセス状態を変更しないので、一度だけ呼んでキャッシュしても、
//! 毎回呼んでも結果は同じです。

use std::fmt;
use std::sync::Arc;

use super::handler::{DefaultHandler, DynHandler};
use super::registry::{HandlerId, HandlerRegistry};

pub const DEFAULT_NAMESPACE: &str = "invoker";
pub const DEFAULT_ENTRY_POINT: &str = "default";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no handler configured")]
    Unset,

    #[error("malformed handler identifier {0:?}, expected \"<namespace>.<entryPoint>\"")]
    Malformed(String),

    #[error("namespace '{namespace}' has no registered handlers")]
    NamespaceNotFound { namespace: String },

    #[error("namespace '{namespace}' has no entry point '{entry_point}'")]
    EntryPointNotFound {
        namespace: String,
        entry_point: String,
    },
}

/// A resolved, callable handler.
///
/// Equality compares ids only: two refs to the same registered entry point
/// are equal.
#[derive(Clone)]
pub struct HandlerRef {
    id: HandlerId,
    handler: Arc<dyn DynHandler>,
}

impl HandlerRef {
    pub fn new(id: HandlerId, handler: Arc<dyn DynHandler>) -> Self {
        Self { id, handler }
    }

    pub fn default_handler() -> Self {
        Self::new(
            HandlerId::new(DEFAULT_NAMESPACE, DEFAULT_ENTRY_POINT),
            Arc::new(DefaultHandler),
        )
    }

    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    pub fn handler(&self) -> &Arc<dyn DynHandler> {
        &self.handler
    }

    pub fn is_default(&self) -> bool {
        self.id.namespace() == DEFAULT_NAMESPACE && self.id.entry_point() == DEFAULT_ENTRY_POINT
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HandlerRef {}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRef").field(&self.id).finish()
    }
}

/// Result of a resolution. `fallback` is set whenever the default handler
/// was substituted.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub handler: HandlerRef,
    pub fallback: Option<ResolutionError>,
}

#[derive(Clone)]
pub struct HandlerResolver {
    registry: Arc<HandlerRegistry>,
}

impl HandlerResolver {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn resolve(&self, raw: Option<&str>) -> Resolved {
        match self.try_resolve(raw) {
            Ok(handler) => Resolved {
                handler,
                fallback: None,
            },
            Err(err) => Resolved {
                handler: HandlerRef::default_handler(),
                fallback: Some(err),
            },
        }
    }

    fn try_resolve(&self, raw: Option<&str>) -> Result<HandlerRef, ResolutionError> {
        let raw = raw
            .filter(|r| !r.trim().is_empty())
            .ok_or(ResolutionError::Unset)?;
        let id = HandlerId::parse(raw).ok_or_else(|| ResolutionError::Malformed(raw.to_string()))?;
        let handler = self.registry.lookup(&id)?;
        Ok(HandlerRef::new(id, handler))
    }
}

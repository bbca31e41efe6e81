//! RuntimeBuilder - handler の登録と起動時検証
//!
//! # Fail-fast 設計
//! - `expect_handlers()` で必ず存在すべき handler id を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `BuildError` を返す（CLI はこれを init error として報告する）
//!
//! `_HANDLER` の値そのものは検証しません。解決できなければ実行時に
//! default handler へフォールバックします。

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use super::executor::HandlerExecutor;
use super::invocation_loop::InvocationLoop;
use crate::config::RuntimeConfig;
use crate::domain::{ErrorRecord, Failure, format_failure};
use crate::impls::HttpControlPlane;
use crate::ports::{ClientError, ControlPlane};
use crate::typed::{
    DynHandler, Handler, HandlerError, HandlerId, HandlerRegistry, HandlerResolver, RegistryError,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing handlers: {0:?}. These handlers were expected but not registered.")]
    MissingHandlers(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to set up control plane client: {0}")]
    Client(#[from] ClientError),
}

impl BuildError {
    /// Record sent to the control plane's init error route.
    pub fn to_record(&self) -> ErrorRecord {
        let tag = match self {
            Self::MissingHandlers(_) => "MissingHandlers",
            Self::Registry(_) => "DuplicateHandler",
            Self::Client(_) => "ClientSetup",
        };
        format_failure(&Failure::typed(tag, self.to_string()), None)
    }
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registry: HandlerRegistry,
    expected: Option<Vec<String>>,
    control_plane: Option<Arc<dyn ControlPlane>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected: None,
            control_plane: None,
        }
    }

    /// Use this control plane instead of the HTTP one built from config.
    pub fn control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    pub fn register<H: DynHandler + 'static>(
        mut self,
        id: HandlerId,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register(id, handler)?;
        Ok(self)
    }

    pub fn register_typed<T, H>(mut self, id: HandlerId, handler: H) -> Result<Self, RegistryError>
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T> + 'static,
    {
        self.registry.register_typed::<T, H>(id, handler)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(mut self, id: HandlerId, f: F) -> Result<Self, RegistryError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(id, f)?;
        Ok(self)
    }

    /// Handler ids (`"<namespace>.<entryPoint>"`) that must be registered.
    pub fn expect_handlers(mut self, ids: &[&str]) -> Self {
        self.expected = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        if let Some(expected) = &self.expected {
            let missing: Vec<String> = expected
                .iter()
                .filter(|raw| {
                    HandlerId::parse(raw).is_none_or(|id| !self.registry.contains(&id))
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        }

        let control_plane = match self.control_plane {
            Some(cp) => cp,
            None => Arc::new(HttpControlPlane::new(&self.config)?),
        };

        Ok(Runtime {
            config: self.config,
            resolver: HandlerResolver::new(Arc::new(self.registry)),
            control_plane,
        })
    }
}

/// Everything needed to start the loop.
pub struct Runtime {
    config: RuntimeConfig,
    resolver: HandlerResolver,
    control_plane: Arc<dyn ControlPlane>,
}

impl Runtime {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &HandlerResolver {
        &self.resolver
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    pub fn into_loop(self) -> InvocationLoop {
        InvocationLoop::new(
            self.control_plane,
            self.resolver,
            self.config.handler,
            HandlerExecutor::new(self.config.handler_timeout),
            self.config.backoff,
        )
    }

    pub async fn run(self) {
        let mut invocation_loop = self.into_loop();
        // Resolve up front so a bad _HANDLER is logged at startup.
        invocation_loop.handler_ref();
        invocation_loop.run().await;
    }

    pub async fn run_until(self, shutdown: watch::Receiver<bool>) {
        let mut invocation_loop = self.into_loop();
        invocation_loop.handler_ref();
        invocation_loop.run_until(shutdown).await;
    }
}

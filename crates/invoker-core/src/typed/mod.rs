//! Typed - handler の登録・解決 API
//!
//! - **handler**: `Handler<T>` / `DynHandler` と失敗値 `HandlerError`
//! - **registry**: 起動時に明示登録する `HandlerRegistry`
//! - **resolver**: 設定文字列 → `HandlerRef`（失敗時は default handler）

pub mod handler;
pub mod registry;
pub mod resolver;

pub use self::handler::{
    DEFAULT_HANDLER_MESSAGE, DefaultHandler, DynHandler, Handler, HandlerError, TypedHandler,
    handler_fn,
};
pub use self::registry::{HandlerId, HandlerRegistry, RegistryError};
pub use self::resolver::{HandlerRef, HandlerResolver, ResolutionError, Resolved};

//! invoker-core
//!
//! Core building blocks for the invoker runtime: a long-poll client for the
//! control plane and the loop that runs registered handlers against each
//! invocation it hands out.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Invocation, Outcome, ErrorRecord）
//! - **ports**: 抽象化レイヤー（ControlPlane）
//! - **impls**: 実装（HttpControlPlane）
//! - **typed**: handler API（Handler trait, HandlerRegistry, HandlerResolver）
//! - **app**: アプリケーションロジック（builder, executor, invocation_loop, retry）
//! - **config**: 起動時の設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{BuildError, InvocationLoop, Iteration, Runtime, RuntimeBuilder};
pub use config::{ConfigError, RuntimeConfig};
pub use domain::{ErrorRecord, Invocation, Outcome, RequestId};
pub use ports::{ClientError, ControlPlane};
pub use typed::{Handler, HandlerError, HandlerId};

//! App - アプリケーション層
//!
//! ports と typed を組み合わせて invocation loop を構成します。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder / Runtime**: 構築とワイヤリング
//! - **HandlerExecutor**: handler の呼び出しと結果の正規化
//! - **InvocationLoop**: fetch → execute → report
//! - **RetryPolicy**: control plane 障害時の backoff

pub mod builder;
pub mod executor;
pub mod invocation_loop;
pub mod retry;

pub use self::builder::{BuildError, Runtime, RuntimeBuilder};
pub use self::executor::{HandlerExecutor, ReturnShape};
pub use self::invocation_loop::{InvocationLoop, Iteration};
pub use self::retry::RetryPolicy;

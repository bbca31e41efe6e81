//! ControlPlane port - invocation の取得と結果報告
//!
//! 4 つの操作だけを持つ抽象です。本番実装は HTTP（`impls::http_control_plane`）、
//! テストではスクリプト化した fake を使います。
//!
//! すべての操作は panic せず、型付きの `ClientError` を返します。
//! 失敗をどう扱うか（待って再試行 / ログだけ残す）は呼び出し側のループが決めます。

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ErrorRecord, Invocation, RequestId};

/// Failures talking to the control plane.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    /// Connection refused, reset, timed out, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// The control plane answered, but not in the expected shape.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The control plane answered with a non-success status.
    #[error("control plane returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A success value could not be serialized.
    #[error("failed to encode body: {0}")]
    Encode(String),
}

impl ClientError {
    /// Whether the control plane was reachable at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Long-poll for the next invocation. May block indefinitely.
    async fn next_invocation(&self) -> Result<Invocation, ClientError>;

    async fn report_success(&self, request_id: &RequestId, value: &Value)
    -> Result<(), ClientError>;

    async fn report_invocation_error(
        &self,
        request_id: &RequestId,
        record: &ErrorRecord,
    ) -> Result<(), ClientError>;

    /// Only used before the first fetch, when setup failed.
    async fn report_init_error(&self, record: &ErrorRecord) -> Result<(), ClientError>;
}

//! Invocation - control plane から受け取る 1 件の仕事
//!
//! `request_id` は fetch 時点で header から確定させます。
//! body の decode はその後に行うため、decode に失敗しても同じ id で
//! エラーを返すことができます。

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one invocation, assigned by the control plane.
///
/// Opaque to us: we never parse it, only echo it back in report URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional metadata delivered alongside an invocation.
///
/// Every field is best-effort: a missing or unparsable header leaves it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    /// Wall-clock time after which the host kills the invocation.
    pub deadline: Option<DateTime<Utc>>,
    pub trace_id: Option<String>,
    pub function_arn: Option<String>,
}

impl InvocationContext {
    /// Time left until the deadline, measured from `now`.
    ///
    /// `None` when no deadline was delivered; zero once it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let deadline = self.deadline?;
        Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// One unit of work fetched from the control plane.
///
/// Consumed exactly once by the loop; never persisted.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: RequestId,
    pub raw_body: Vec<u8>,
    pub context: InvocationContext,
}

impl Invocation {
    pub fn new(request_id: RequestId, raw_body: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            raw_body: raw_body.into(),
            context: InvocationContext::default(),
        }
    }

    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = context;
        self
    }

    /// Decode the raw body as JSON.
    pub fn decode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.raw_body)
    }
}

//! HandlerExecutor - handler を 1 回呼び出して Outcome に正規化する
//!
//! ユーザーコードを呼ぶのはここ 1 箇所だけです。`Err` も panic も timeout も
//! ここで捕まえて `Outcome::Failure` に変換するので、`execute` 自体は失敗しません。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{error, warn};

use crate::domain::errors::{PANIC, TIMEOUT};
use crate::domain::{Failure, Outcome, format_failure};
use crate::typed::HandlerRef;

/// How a handler's return value is read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnShape {
    /// `{"ok": v}`
    Ok(Value),
    /// `{"error": reason}`
    Error(Value),
    /// Anything else. Still a success.
    Other(Value),
}

impl ReturnShape {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.len() == 1 => {
                if let Some(v) = map.remove("ok") {
                    return Self::Ok(v);
                }
                if let Some(reason) = map.remove("error") {
                    return Self::Error(reason);
                }
                Self::Other(Value::Object(map))
            }
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerExecutor {
    timeout: Option<Duration>,
}

impl HandlerExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn execute(&self, payload: Value, handler: &HandlerRef) -> Outcome {
        let call = AssertUnwindSafe(handler.handler().call(payload)).catch_unwind();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(handler = %handler.id(), limit_ms = limit.as_millis() as u64, "handler timed out");
                    let failure = Failure::typed(
                        TIMEOUT,
                        format!("handler exceeded {} ms", limit.as_millis()),
                    );
                    return Outcome::Failure(format_failure(&failure, None));
                }
            },
            None => call.await,
        };

        match result {
            Ok(Ok(value)) => match ReturnShape::classify(value) {
                ReturnShape::Ok(value) => Outcome::Success(value),
                // Explicit failure: nothing was raised, so there is no stack.
                ReturnShape::Error(reason) => {
                    Outcome::Failure(format_failure(&Failure::from_value(&reason), None))
                }
                ReturnShape::Other(value) => {
                    warn!(
                        handler = %handler.id(),
                        "handler returned neither {{\"ok\": ..}} nor {{\"error\": ..}}; treating as success"
                    );
                    Outcome::Success(value)
                }
            },
            Ok(Err(err)) => {
                warn!(handler = %handler.id(), error = %err, "handler raised");
                Outcome::Failure(err.to_record())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(handler = %handler.id(), panic = %message, "handler panicked");
                Outcome::Failure(format_failure(&Failure::typed(PANIC, message), None))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

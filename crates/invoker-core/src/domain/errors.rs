//! Errors - 失敗値の分類と ErrorRecord への整形
//!
//! control plane に返すエラーは常に `errorType` / `errorMessage` / `stackTrace`
//! の 3 フィールドです。元の失敗がどんな形でも、ここで必ずこの形に揃えます。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label for failures that are plain text.
pub const RUNTIME_ERROR: &str = "RuntimeError";

/// Label for failures of a shape we cannot classify.
pub const UNKNOWN_ERROR: &str = "UnknownError";

/// Label for payloads that are not valid JSON.
pub const DECODE_ERROR: &str = "DecodeError";

/// Label for panics caught at the executor boundary.
pub const PANIC: &str = "Panic";

/// Label for handlers that overran their deadline.
pub const TIMEOUT: &str = "Timeout";

/// The wire shape of a failed invocation.
///
/// No optional fields: the control plane expects all three, always strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: String,
}

/// A failure value before it is reduced to an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Carries a type tag. `rendered` is the whole value as text, used when
    /// there is no message.
    Typed {
        tag: String,
        message: Option<String>,
        rendered: String,
    },

    /// Bare text.
    Text(String),

    /// Anything else, already rendered as text.
    Unknown(String),
}

impl Failure {
    pub fn typed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        let tag = tag.into();
        let message = message.into();
        Self::Typed {
            rendered: format!("{tag}: {message}"),
            tag,
            message: Some(message),
        }
    }

    /// Classify a JSON value by shape.
    ///
    /// An object with a `"type"` key is typed; its `"message"` key, when
    /// present, becomes the message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => match map.get("type") {
                Some(tag) => Self::Typed {
                    tag: render(tag),
                    message: map.get("message").map(render),
                    rendered: value.to_string(),
                },
                None => Self::Unknown(value.to_string()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl From<&str> for Failure {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Failure {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Reduce a failure to the wire record.
///
/// Priority: typed with message, typed without message, text, anything else.
pub fn format_failure(failure: &Failure, stack: Option<&[String]>) -> ErrorRecord {
    let (error_type, error_message) = match failure {
        Failure::Typed {
            tag,
            message: Some(message),
            ..
        } => (tag.clone(), message.clone()),
        Failure::Typed {
            tag,
            message: None,
            rendered,
        } => (tag.clone(), rendered.clone()),
        Failure::Text(text) => (RUNTIME_ERROR.to_string(), text.clone()),
        Failure::Unknown(rendered) => (UNKNOWN_ERROR.to_string(), rendered.clone()),
    };

    ErrorRecord {
        error_type,
        error_message,
        stack_trace: format_stack(stack),
    }
}

/// One frame per line. No stack yields an empty string, never a missing field.
pub fn format_stack(stack: Option<&[String]>) -> String {
    stack.map(|frames| frames.join("\n")).unwrap_or_default()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

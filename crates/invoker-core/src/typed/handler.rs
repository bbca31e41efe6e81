//! Handler trait - invocation を処理するユーザーコードの定義
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<T>` - payload を `T` に deserialize してから呼ぶ
//! - **内部（Dyn）**: `DynHandler` - object-safe, `serde_json::Value` のまま扱う
//!
//! # 返り値の規約
//! handler は `Value` を返します。executor が形を見て分類します:
//! - `{"ok": v}`    → 成功（`v` を返す）
//! - `{"error": r}` → 明示的な失敗（stack なし）
//! - それ以外       → 成功（生の値をそのまま返す）
//!
//! `Err(HandlerError)` は「例外」に相当し、stack 付きで失敗として報告されます。

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::domain::errors::{DECODE_ERROR, ErrorRecord, Failure, format_failure};

/// Message returned when no usable handler is configured.
pub const DEFAULT_HANDLER_MESSAGE: &str = "No handler configured. Set _HANDLER to \
     \"<namespace>.<entryPoint>\" naming a registered handler.";

/// A failure raised by handler code.
///
/// Any `std::error::Error` converts into this with `?`. The conversion keeps
/// the error's type path as the tag and its `source()` chain as stack frames.
/// Like `anyhow::Error`, this type deliberately does not implement
/// `std::error::Error` itself, which is what makes the blanket `From` legal.
pub struct HandlerError {
    failure: Failure,
    stack: Vec<String>,
}

impl HandlerError {
    pub fn new(failure: impl Into<Failure>) -> Self {
        Self {
            failure: failure.into(),
            stack: Vec::new(),
        }
    }

    pub fn typed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Failure::typed(tag, message))
    }

    pub fn with_stack(mut self, frames: Vec<String>) -> Self {
        self.stack = frames;
        self
    }

    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn to_record(&self) -> ErrorRecord {
        format_failure(&self.failure, Some(&self.stack))
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            failure: Failure::typed(short_type_name::<E>(), err.to_string()),
            stack,
        }
    }
}

/// Last path segment of the type name, generic arguments removed.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("failure", &self.failure)
            .field("stack", &self.stack)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = format_failure(&self.failure, None);
        write!(f, "{}: {}", record.error_type, record.error_message)
    }
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納できるよう、ジェネリクスを持ちません。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn call(&self, payload: Value) -> Result<Value, HandlerError>;
}

/// Handler は deserialize 済みの入力を受け取る
///
/// # 使用例
/// ```ignore
/// #[derive(Deserialize)]
/// struct Greeting { name: String }
///
/// struct Greeter;
///
/// #[async_trait]
/// impl Handler<Greeting> for Greeter {
///     async fn handle(&self, input: Greeting) -> Result<Value, HandlerError> {
///         Ok(json!({"ok": {"message": format!("Hello, {}!", input.name)}}))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: DeserializeOwned + Send + 'static>: Send + Sync {
    async fn handle(&self, input: T) -> Result<Value, HandlerError>;
}

/// `Handler<T>` を `DynHandler` に変換する type erasure
pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T, H> TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> DynHandler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn call(&self, payload: Value) -> Result<Value, HandlerError> {
        let input: T = serde_json::from_value(payload)
            .map_err(|e| HandlerError::typed(DECODE_ERROR, e.to_string()))?;
        self.handler.handle(input).await
    }
}

/// Closure adapter, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, payload: Value) -> Result<Value, HandlerError> {
        (self.f)(payload).await
    }
}

/// Fallback used when the configured handler cannot be resolved.
///
/// Always succeeds, so misconfiguration shows up in responses instead of
/// taking the process down.
pub struct DefaultHandler;

#[async_trait]
impl DynHandler for DefaultHandler {
    async fn call(&self, _payload: Value) -> Result<Value, HandlerError> {
        Ok(json!({ "ok": { "message": DEFAULT_HANDLER_MESSAGE } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Greeting {
        name: String,
    }

    struct Greeter;

    #[async_trait]
    impl Handler<Greeting> for Greeter {
        async fn handle(&self, input: Greeting) -> Result<Value, HandlerError> {
            Ok(json!({ "ok": { "message": format!("Hello, {}!", input.name) } }))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    #[tokio::test]
    async fn typed_handler_decodes_payload() {
        let handler = TypedHandler::new(Greeter);
        let out = handler.call(json!({ "name": "X" })).await.unwrap();
        assert_eq!(out, json!({ "ok": { "message": "Hello, X!" } }));
    }

    #[tokio::test]
    async fn typed_handler_rejects_wrong_shape_as_decode_error() {
        let handler = TypedHandler::new(Greeter);
        let err = handler.call(json!({ "nom": 1 })).await.unwrap_err();
        assert_eq!(err.to_record().error_type, DECODE_ERROR);
    }

    #[tokio::test]
    async fn closure_handler_runs() {
        let handler = handler_fn(|payload: Value| async move { Ok(json!({ "ok": payload })) });
        let out = handler.call(json!([1, 2])).await.unwrap();
        assert_eq!(out, json!({ "ok": [1, 2] }));
    }

    #[tokio::test]
    async fn default_handler_always_succeeds() {
        for payload in [Value::Null, json!({ "should_fail": true }), json!("x")] {
            let out = DefaultHandler.call(payload).await.unwrap();
            assert_eq!(out["ok"]["message"], DEFAULT_HANDLER_MESSAGE);
        }
    }

    #[test]
    fn std_errors_convert_with_source_chain() {
        fn fails() -> Result<(), HandlerError> {
            let result: Result<(), Outer> = Err(Outer {
                inner: std::io::Error::other("disk gone"),
            });
            result?;
            Ok(())
        }

        let err = fails().unwrap_err();
        let record = err.to_record();
        assert_eq!(record.error_type, "Outer");
        assert_eq!(record.error_message, "outer failure");
        assert_eq!(record.stack_trace, "caused by: disk gone");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("bad value {0}")]
    struct Rejected<T: std::fmt::Debug + std::fmt::Display>(T);

    #[test]
    fn error_type_is_the_short_type_name() {
        let parse = HandlerError::from("x".parse::<u32>().unwrap_err()).to_record();
        assert_eq!(parse.error_type, "ParseIntError");

        let generic = HandlerError::from(Rejected::<u32>(7)).to_record();
        assert_eq!(generic.error_type, "Rejected");
        assert_eq!(generic.error_message, "bad value 7");
    }

    #[test]
    fn text_errors_are_runtime_errors() {
        let record = HandlerError::new("plain").to_record();
        assert_eq!(record.error_type, "RuntimeError");
        assert_eq!(record.stack_trace, "");
    }
}

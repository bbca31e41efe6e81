//! HttpControlPlane - ControlPlane port の HTTP 実装
//!
//! fetch は long-poll なので timeout を付けません。
//! report 系は `report_timeout` で必ず打ち切ります（ここで詰まるとループ全体が止まるため）。

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::domain::{ErrorRecord, Invocation, InvocationContext, RequestId};
use crate::ports::{ClientError, ControlPlane};

// Header names are case-insensitive on the wire; http wants them lowercase.
pub const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
pub const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
pub const TRACE_ID_HEADER: &str = "lambda-runtime-trace-id";
pub const FUNCTION_ARN_HEADER: &str = "lambda-runtime-invoked-function-arn";
pub const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    report_timeout: Duration,
}

impl HttpControlPlane {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ClientError> {
        // No client-wide timeout: it would cut the long-poll short.
        let client = Client::builder().build().map_err(transport)?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            report_timeout: config.report_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::Transport(format!("invalid base url {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::Transport(format!("base url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
        error_type: Option<&str>,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_vec(body).map_err(|e| ClientError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .post(url)
            .timeout(self.report_timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        // A tag that is not a valid header value is still in the body.
        if let Some(value) = error_type.and_then(|t| HeaderValue::from_str(t).ok()) {
            request = request.header(ERROR_TYPE_HEADER, value);
        }

        let response = request.send().await.map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn next_invocation(&self) -> Result<Invocation, ClientError> {
        let response = self
            .client
            .get(self.endpoint(&["invocation", "next"])?)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;

        // Capture the id before touching the body.
        let request_id = request_id(response.headers())?;
        let context = context_from_headers(response.headers());

        let body = response.bytes().await.map_err(transport)?;
        Ok(Invocation::new(request_id, body.to_vec()).with_context(context))
    }

    async fn report_success(
        &self,
        request_id: &RequestId,
        value: &Value,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["invocation", request_id.as_str(), "response"])?;
        self.post_json(url, value, None).await
    }

    async fn report_invocation_error(
        &self,
        request_id: &RequestId,
        record: &ErrorRecord,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["invocation", request_id.as_str(), "error"])?;
        self.post_json(url, record, Some(&record.error_type)).await
    }

    async fn report_init_error(&self, record: &ErrorRecord) -> Result<(), ClientError> {
        let url = self.endpoint(&["init", "error"])?;
        self.post_json(url, record, Some(&record.error_type)).await
    }
}

fn request_id(headers: &HeaderMap) -> Result<RequestId, ClientError> {
    header_str(headers, REQUEST_ID_HEADER)
        .map(RequestId::new)
        .ok_or_else(|| ClientError::Protocol(format!("missing {REQUEST_ID_HEADER} header")))
}

fn context_from_headers(headers: &HeaderMap) -> InvocationContext {
    let deadline = header_str(headers, DEADLINE_HEADER)
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    InvocationContext {
        deadline,
        trace_id: header_str(headers, TRACE_ID_HEADER).map(str::to_string),
        function_arn: header_str(headers, FUNCTION_ARN_HEADER).map(str::to_string),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// reqwest's Display omits the cause ("error sending request"), so walk the
/// source chain.
fn transport(err: reqwest::Error) -> ClientError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ClientError::Transport(message)
}

//! HttpControlPlane against an in-process fake control plane.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

use invoker_core::impls::HttpControlPlane;
use invoker_core::impls::http_control_plane::{
    DEADLINE_HEADER, ERROR_TYPE_HEADER, REQUEST_ID_HEADER, TRACE_ID_HEADER,
};
use invoker_core::{
    ClientError, ControlPlane, ErrorRecord, HandlerId, Iteration, RequestId, RuntimeBuilder,
    RuntimeConfig,
};

struct NextResponse {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl NextResponse {
    fn invocation(id: &str, body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![(REQUEST_ID_HEADER, id.to_string())],
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Post {
    path: String,
    error_type: Option<String>,
    body: Value,
}

struct Inner {
    next: VecDeque<NextResponse>,
    posts: Vec<Post>,
    post_status: StatusCode,
    post_delay: Duration,
}

#[derive(Clone)]
struct Fake(Arc<Mutex<Inner>>);

impl Fake {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Inner {
            next: VecDeque::new(),
            posts: Vec::new(),
            post_status: StatusCode::ACCEPTED,
            post_delay: Duration::ZERO,
        })))
    }

    fn push_next(&self, response: NextResponse) {
        self.0.lock().unwrap().next.push_back(response);
    }

    fn posts(&self) -> Vec<Post> {
        self.0.lock().unwrap().posts.clone()
    }

    async fn record(&self, path: String, headers: &HeaderMap, body: Bytes) -> StatusCode {
        let delay = self.0.lock().unwrap().post_delay;
        tokio::time::sleep(delay).await;

        let mut inner = self.0.lock().unwrap();
        inner.posts.push(Post {
            path,
            error_type: headers
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });
        inner.post_status
    }
}

async fn next(State(fake): State<Fake>) -> Response {
    let scripted = fake.0.lock().unwrap().next.pop_front();
    let Some(scripted) = scripted else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let mut response = (scripted.status, scripted.body).into_response();
    for (name, value) in scripted.headers {
        response
            .headers_mut()
            .insert(name, HeaderValue::from_str(&value).unwrap());
    }
    response
}

async fn invocation_response(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    fake.record(format!("invocation/{id}/response"), &headers, body).await
}

async fn invocation_error(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    fake.record(format!("invocation/{id}/error"), &headers, body).await
}

async fn init_error(State(fake): State<Fake>, headers: HeaderMap, body: Bytes) -> StatusCode {
    fake.record("init/error".to_string(), &headers, body).await
}

/// Serve the fake and return its `host:port`.
async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/2018-06-01/invocation/next", get(next))
        .route("/2018-06-01/invocation/{id}/response", post(invocation_response))
        .route("/2018-06-01/invocation/{id}/error", post(invocation_error))
        .route("/2018-06-01/init/error", post(init_error))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

async fn client_for(fake: &Fake) -> HttpControlPlane {
    let api = serve(fake.clone()).await;
    HttpControlPlane::new(&RuntimeConfig::new(api)).unwrap()
}

fn record(error_type: &str, message: &str) -> ErrorRecord {
    ErrorRecord {
        error_type: error_type.into(),
        error_message: message.into(),
        stack_trace: String::new(),
    }
}

#[tokio::test]
async fn fetch_reads_id_body_and_context() {
    let fake = Fake::new();
    fake.push_next(NextResponse {
        status: StatusCode::OK,
        headers: vec![
            (REQUEST_ID_HEADER, "req-1".into()),
            (DEADLINE_HEADER, "1700000000000".into()),
            (TRACE_ID_HEADER, "Root=1-abc".into()),
        ],
        body: r#"{"name":"X"}"#.into(),
    });
    let client = client_for(&fake).await;

    let invocation = client.next_invocation().await.unwrap();
    assert_eq!(invocation.request_id, RequestId::new("req-1"));
    assert_eq!(invocation.decode().unwrap(), json!({ "name": "X" }));
    assert_eq!(
        invocation.context.deadline.map(|d| d.timestamp_millis()),
        Some(1_700_000_000_000)
    );
    assert_eq!(invocation.context.trace_id.as_deref(), Some("Root=1-abc"));
}

#[tokio::test]
async fn fetch_keeps_undecodable_body() {
    let fake = Fake::new();
    fake.push_next(NextResponse::invocation("req-raw", "not-json"));
    let client = client_for(&fake).await;

    let invocation = client.next_invocation().await.unwrap();
    assert_eq!(invocation.raw_body, b"not-json".to_vec());
    assert!(invocation.decode().is_err());
}

#[tokio::test]
async fn fetch_without_request_id_is_a_protocol_violation() {
    let fake = Fake::new();
    fake.push_next(NextResponse {
        status: StatusCode::OK,
        headers: vec![],
        body: "{}".into(),
    });
    let client = client_for(&fake).await;

    let err = client.next_invocation().await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn fetch_error_status_is_surfaced() {
    let fake = Fake::new();
    fake.push_next(NextResponse {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        headers: vec![],
        body: "boom".into(),
    });
    let client = client_for(&fake).await;

    let err = client.next_invocation().await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Status {
            status: 500,
            body: "boom".into()
        }
    );
}

#[tokio::test]
async fn unreachable_control_plane_is_a_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpControlPlane::new(&RuntimeConfig::new(addr.to_string())).unwrap();
    let err = client.next_invocation().await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn success_is_posted_as_json() {
    let fake = Fake::new();
    let client = client_for(&fake).await;

    client
        .report_success(&RequestId::new("req-1"), &json!({ "message": "Hello, X!" }))
        .await
        .unwrap();

    let posts = fake.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].path, "invocation/req-1/response");
    assert_eq!(posts[0].body, json!({ "message": "Hello, X!" }));
    assert_eq!(posts[0].error_type, None);
}

#[tokio::test]
async fn request_id_with_reserved_characters_hits_its_own_route() {
    let fake = Fake::new();
    let client = client_for(&fake).await;

    client
        .report_success(&RequestId::new("a/b?c#d"), &json!(1))
        .await
        .unwrap();

    let posts = fake.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].path, "invocation/a/b?c#d/response");
    assert_eq!(posts[0].body, json!(1));
}

#[tokio::test]
async fn invocation_error_carries_record_and_type_header() {
    let fake = Fake::new();
    let client = client_for(&fake).await;

    client
        .report_invocation_error(&RequestId::new("req-2"), &record("RuntimeError", "Requested failure"))
        .await
        .unwrap();

    let posts = fake.posts();
    assert_eq!(posts[0].path, "invocation/req-2/error");
    assert_eq!(posts[0].error_type.as_deref(), Some("RuntimeError"));
    assert_eq!(
        posts[0].body,
        json!({
            "errorType": "RuntimeError",
            "errorMessage": "Requested failure",
            "stackTrace": ""
        })
    );
}

#[tokio::test]
async fn init_error_is_posted() {
    let fake = Fake::new();
    let client = client_for(&fake).await;

    client
        .report_init_error(&record("MissingHandlers", "greeter.hello"))
        .await
        .unwrap();

    let posts = fake.posts();
    assert_eq!(posts[0].path, "init/error");
    assert_eq!(posts[0].body["errorType"], "MissingHandlers");
}

#[tokio::test]
async fn rejected_report_is_a_status_error() {
    let fake = Fake::new();
    fake.0.lock().unwrap().post_status = StatusCode::PAYLOAD_TOO_LARGE;
    let client = client_for(&fake).await;

    let err = client
        .report_success(&RequestId::new("req-3"), &json!("big"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 413, .. }), "got {err:?}");
}

#[tokio::test]
async fn slow_report_times_out() {
    let fake = Fake::new();
    fake.0.lock().unwrap().post_delay = Duration::from_secs(5);
    let api = serve(fake.clone()).await;
    let config = RuntimeConfig::new(api).with_report_timeout(Duration::from_millis(100));
    let client = HttpControlPlane::new(&config).unwrap();

    let err = client
        .report_success(&RequestId::new("req-4"), &json!(1))
        .await
        .unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn runtime_round_trip_over_http() {
    let fake = Fake::new();
    fake.push_next(NextResponse::invocation("req-e2e", r#"{"name":"X"}"#));
    let api = serve(fake.clone()).await;

    let runtime = RuntimeBuilder::new(RuntimeConfig::new(api).with_handler("greeter.hello"))
        .register_fn(HandlerId::new("greeter", "hello"), |v: Value| async move {
            let name = v["name"].as_str().unwrap_or("world").to_string();
            Ok(json!({ "ok": { "message": format!("Hello, {name}!") } }))
        })
        .unwrap()
        .build()
        .unwrap();

    let mut invocation_loop = runtime.into_loop();
    let iteration = invocation_loop.run_once().await;
    assert!(matches!(iteration, Iteration::Completed { delivered: true, .. }));

    let posts = fake.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].path, "invocation/req-e2e/response");
    assert_eq!(posts[0].body, json!({ "message": "Hello, X!" }));
}

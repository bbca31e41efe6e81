use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use invoker_core::impls::HttpControlPlane;
use invoker_core::{
    BuildError, ControlPlane, Handler, HandlerError, HandlerId, RuntimeBuilder, RuntimeConfig,
};

/// Turn the signal into a shutdown request. If the signal cannot be listened
/// for, the sender is held forever so the loop keeps running.
async fn forward_shutdown<F>(signal: F, shutdown_tx: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutdown requested");
            // ignore send error: the loop may already be gone
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!(error = %err, "cannot listen for ctrl-c");
            let _keep = shutdown_tx;
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    should_fail: bool,
}

/// greeter.hello: `{"name": X}` -> `{"message": "Hello, X!"}`
struct HelloHandler;

#[async_trait]
impl Handler<HelloPayload> for HelloHandler {
    async fn handle(&self, input: HelloPayload) -> Result<Value, HandlerError> {
        if input.should_fail {
            return Ok(json!({ "error": "Requested failure" }));
        }
        let name = input.name.unwrap_or_else(|| "world".to_string());
        Ok(json!({ "ok": { "message": format!("Hello, {name}!") } }))
    }
}

/// 登録する handler 一覧
fn register_handlers(builder: RuntimeBuilder) -> Result<RuntimeBuilder, BuildError> {
    let builder = builder
        .register_typed::<HelloPayload, _>(HandlerId::new("greeter", "hello"), HelloHandler)?
        // Returns the payload untagged, so it goes through the "anything else" rule.
        .register_fn(HandlerId::new("greeter", "echo"), |payload: Value| async move {
            Ok(payload)
        })?
        .expect_handlers(&["greeter.hello"]);
    Ok(builder)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Without an endpoint there is nowhere to report an init error to.
    let config = RuntimeConfig::from_env().context("failed to read runtime configuration")?;
    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(&config).context("failed to create control plane client")?,
    );
    info!(endpoint = %config.base_url(), handler = ?config.handler, "starting invoker");

    let built = register_handlers(
        RuntimeBuilder::new(config).control_plane(Arc::clone(&control_plane)),
    )
    .and_then(RuntimeBuilder::build);

    let runtime = match built {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "initialization failed");
            if let Err(report_err) = control_plane.report_init_error(&err.to_record()).await {
                error!(error = %report_err, "failed to report init error");
            }
            return Err(err).context("failed to build runtime");
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    runtime.run_until(shutdown_rx).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_requests_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        forward_shutdown(async { Ok(()) }, tx).await;

        assert!(*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_signal_listener_keeps_loop_running() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(forward_shutdown(
            async { Err(std::io::Error::other("no signal support")) },
            tx,
        ));

        let changed = tokio::time::timeout(Duration::from_secs(3600), rx.changed()).await;
        assert!(changed.is_err(), "sender was released: {changed:?}");
        assert!(!*rx.borrow());
    }
}

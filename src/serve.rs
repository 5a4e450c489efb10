//! Purpose: Run a relay node: ingestion endpoint, connection host and health check.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server wiring for `fanrelay serve`.
//! Invariants: The relay endpoint sees every request first and passes unrelated ones on.
//! Invariants: Shutdown is graceful on Ctrl-C/SIGTERM and bounded in time.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde_json::json;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fanrelay::api::{ConnectionHost, Endpoint, Error, ErrorKind, MemoryRegistry, MemoryRooms, Options};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub options: Options,
    pub max_body_bytes: u64,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    let relay = config.options.normalize()?;
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let registry = MemoryRegistry::new();
    let rooms = MemoryRooms::new();
    let endpoint = Endpoint::new(relay.clone(), Arc::new(registry.clone()))
        .with_groups(Arc::new(rooms.clone()))
        .with_max_body_bytes(max_body_bytes);

    let app = ConnectionHost::new(registry, rooms)
        .router()
        .route("/healthz", get(healthz))
        .fallback(not_found);
    let app = endpoint.attach(app).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        method = relay.method(),
        route = relay.route().as_str(),
        "relay node listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                // Open connection streams never end on their own.
                Err(_) => tracing::warn!("server shutdown timed out; dropping open connections"),
            }
        }
    };
    Ok(())
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero"));
    }
    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits"));
    }
    Ok(())
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "reason": "not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::{ServeConfig, serve, validate_config};
    use fanrelay::api::{ErrorKind, Options};

    fn config(max_body_bytes: u64) -> ServeConfig {
        ServeConfig {
            bind: "127.0.0.1:0".parse().expect("bind"),
            options: Options::default(),
            max_body_bytes,
        }
    }

    #[test]
    fn body_limit_must_be_positive() {
        let err = validate_config(&config(0)).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
        validate_config(&config(1024)).expect("config ok");
    }

    #[tokio::test]
    async fn serve_rejects_invalid_relay_options() {
        let mut config = config(1024);
        config.options.concurrently = Some(0);
        let err = serve(config).await.expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}

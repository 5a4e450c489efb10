//! Purpose: Authenticated HTTP ingestion endpoint that delivers relayed messages locally.
//! Exports: `Endpoint`, `REJECTION_REASON`.
//! Role: Axum middleware; coexists with the rest of a node's router.
//! Invariants: Wrong path, wrong method or missing `Authorization` passes through untouched.
//! Invariants: A present but wrong `Authorization` header is always a 401.
//! Invariants: Status codes: 200 delivered, 401 auth, 500 malformed body, 400 group lookup.
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};
use crate::core::registry::ConnectionRegistry;
use crate::core::resolver::resolve;
use crate::core::rooms::GroupLookup;
use crate::core::selector::{INVALID_DATA_STRUCTURE, Protocol, decode_packet};

pub const REJECTION_REASON: &str = "relay credentials rejected; check the shared username and password";

const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    config: Config,
    registry: Arc<dyn ConnectionRegistry>,
    groups: Option<Arc<dyn GroupLookup>>,
    max_body_bytes: usize,
}

/// Successful ingestion of one relayed packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ingested {
    pub protocol: Protocol,
    pub delivered: u64,
}

impl Endpoint {
    pub fn new(config: Config, registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                config,
                registry,
                groups: None,
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            }),
        }
    }

    pub fn with_groups(self, groups: Arc<dyn GroupLookup>) -> Self {
        self.rebuild(|inner| inner.groups = Some(groups))
    }

    pub fn with_max_body_bytes(self, max_body_bytes: usize) -> Self {
        self.rebuild(|inner| inner.max_body_bytes = max_body_bytes)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Wrap `router` so relay requests are intercepted ahead of its routes and fallback.
    pub fn attach(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, intercept))
    }

    /// Decode a buffered body and deliver it to the matching local connections.
    pub async fn ingest(&self, raw: &str) -> Result<Ingested, Error> {
        let packet = decode_packet(raw, self.inner.groups.is_some())?;
        let resolution = resolve(
            &packet.selector,
            &packet.msg,
            self.inner.registry.as_ref(),
            self.inner.groups.as_deref(),
        )
        .await?;
        Ok(Ingested {
            protocol: packet.protocol,
            delivered: resolution.delivered,
        })
    }

    fn claims(&self, request: &Request) -> bool {
        let config = &self.inner.config;
        config.route().matches(request.uri().path())
            && request.headers().contains_key(header::AUTHORIZATION)
            && request.method().as_str() == config.method()
    }

    fn rebuild(self, apply: impl FnOnce(&mut EndpointInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => EndpointInner {
                config: shared.config.clone(),
                registry: shared.registry.clone(),
                groups: shared.groups.clone(),
                max_body_bytes: shared.max_body_bytes,
            },
        };
        apply(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}

async fn intercept(State(endpoint): State<Endpoint>, request: Request, next: Next) -> Response {
    if !endpoint.claims(&request) {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == endpoint.config().authorization().as_bytes());
    if !authorized {
        return error_response(
            Error::new(ErrorKind::AuthRejected)
                .with_message(REJECTION_REASON)
                .with_url(request.uri().path()),
        );
    }

    let body = match axum::body::to_bytes(request.into_body(), endpoint.inner.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "failed to buffer relay request body");
            return malformed();
        }
    };
    let Ok(raw) = std::str::from_utf8(&body) else {
        return malformed();
    };

    match endpoint.ingest(raw).await {
        Ok(Ingested {
            protocol: Protocol::DataDriven,
            delivered,
        }) => {
            tracing::info!(delivered, "relayed message delivered");
            reply(StatusCode::OK, json!({ "ok": true, "send": delivered }))
        }
        Ok(Ingested {
            protocol: Protocol::Legacy,
            delivered,
        }) => {
            tracing::info!(delivered, "legacy relayed message delivered");
            reply(StatusCode::OK, json!({ "ok": true }))
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::MalformedPayload => return malformed(),
        ErrorKind::GroupLookupFailed => StatusCode::BAD_REQUEST,
        ErrorKind::AuthRejected => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %err, "relay request failed");
    let reason = err.message().unwrap_or("relay request failed");
    reply(status, json!({ "ok": false, "reason": reason }))
}

fn malformed() -> Response {
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "ok": false, "reason": INVALID_DATA_STRUCTURE }),
    )
}

fn reply(status: StatusCode, payload: Value) -> Response {
    (status, Json(payload)).into_response()
}

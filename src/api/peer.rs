//! Purpose: HTTP client for one authenticated call to a peer's relay endpoint.
//! Exports: `PeerClient`.
//! Role: Transport used by the forwarder; one call per peer per forward.
//! Invariants: The `Authorization` header is sent up front, never after a 401 challenge.
//! Invariants: A call succeeds only on status 200 with a body whose `ok` is `true`.
//! Invariants: Failures carry url, status (500 when absent), body, selector type and packet.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use url::Url;

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<PeerClientInner>,
}

struct PeerClientInner {
    agent: ureq::Agent,
    method: String,
    route: String,
    authorization: String,
}

/// Context attached to every failed call.
struct CallContext {
    url: String,
    selector_type: &'static str,
    packet: Arc<Value>,
}

impl PeerClient {
    pub fn new(config: &Config) -> Self {
        Self::with_agent(config, ureq::AgentBuilder::new().build())
    }

    /// Bound each call; an elapsed timeout surfaces as `PeerUnreachable`.
    pub fn with_timeout(config: &Config, timeout: Duration) -> Self {
        Self::with_agent(config, ureq::AgentBuilder::new().timeout(timeout).build())
    }

    fn with_agent(config: &Config, agent: ureq::Agent) -> Self {
        Self {
            inner: Arc::new(PeerClientInner {
                agent,
                method: config.method().to_string(),
                route: config.route().as_str().to_string(),
                authorization: config.authorization().to_string(),
            }),
        }
    }

    /// The peer's relay endpoint: its base address resolved against the configured route.
    pub fn endpoint_url(&self, peer: &str) -> ApiResult<Url> {
        let base = Url::parse(peer).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid peer address: {peer}"))
                .with_source(err)
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("peer address cannot be a base url: {peer}")));
        }
        base.join(&self.inner.route).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("failed to build relay url for {peer}"))
                .with_source(err)
        })
    }

    /// Send `packet` to `peer` and return the peer's reported delivery count.
    pub async fn deliver(
        &self,
        peer: &str,
        selector_type: &'static str,
        packet: Arc<Value>,
    ) -> ApiResult<u64> {
        let context = CallContext {
            url: peer.to_string(),
            selector_type,
            packet,
        };
        let url = match self.endpoint_url(peer) {
            Ok(url) => url,
            Err(err) => {
                let message = err.message().unwrap_or("invalid peer address").to_string();
                return Err(context.fail(
                    Error::new(ErrorKind::PeerUnreachable)
                        .with_message(message)
                        .with_source(err),
                    None,
                    empty_body(),
                ));
            }
        };
        let context = CallContext {
            url: url.to_string(),
            ..context
        };

        let payload = match serde_json::to_string(context.packet.as_ref()) {
            Ok(payload) => payload,
            Err(err) => {
                let error = Error::new(ErrorKind::Internal)
                    .with_message("failed to encode relay packet")
                    .with_source(err);
                return Err(context.fail(error, None, empty_body()));
            }
        };
        let inner = self.inner.clone();
        let call = tokio::task::spawn_blocking(move || inner.call(&url, &payload)).await;

        let (status, body) = match call {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                let error = Error::new(ErrorKind::PeerUnreachable)
                    .with_message(format!("request failed: {err}"))
                    .with_source(err);
                return Err(context.fail(error, None, empty_body()));
            }
            Err(err) => {
                let error = Error::new(ErrorKind::Internal)
                    .with_message("peer call task failed")
                    .with_source(err);
                return Err(context.fail(error, None, empty_body()));
            }
        };

        let reason = body
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        if status != 200 {
            let message =
                reason.unwrap_or_else(|| format!("Invalid status code ({status}) returned"));
            let error = Error::new(ErrorKind::PeerRejected).with_message(message);
            return Err(context.fail(error, Some(status), body));
        }
        if body.get("ok") != Some(&Value::Bool(true)) {
            let message = reason.unwrap_or_else(|| "Unable to process the request".to_string());
            let error = Error::new(ErrorKind::PeerRejected).with_message(message);
            return Err(context.fail(error, Some(status), body));
        }

        Ok(body.get("send").and_then(Value::as_u64).unwrap_or(0))
    }
}

impl PeerClientInner {
    fn call(&self, url: &Url, payload: &str) -> Result<(u16, Value), ureq::Transport> {
        let response = self
            .agent
            .request(&self.method, url.as_str())
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_string(payload);
        match response {
            Ok(resp) => Ok((resp.status(), read_body(resp))),
            Err(ureq::Error::Status(code, resp)) => Ok((code, read_body(resp))),
            Err(ureq::Error::Transport(err)) => Err(err),
        }
    }
}

impl CallContext {
    fn fail(self, error: Error, status: Option<u16>, body: Value) -> Error {
        tracing::warn!(url = %self.url, status = status.unwrap_or(500), error = %error, "peer call failed");
        error
            .with_url(self.url)
            .with_status(status.unwrap_or(500))
            .with_body(body)
            .with_selector_type(self.selector_type)
            .with_packet(Arc::unwrap_or_clone(self.packet))
    }
}

fn read_body(response: ureq::Response) -> Value {
    response
        .into_string()
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_else(empty_body)
}

fn empty_body() -> Value {
    Value::Object(Map::new())
}

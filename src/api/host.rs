//! Purpose: Host client connections over HTTP so a node has something to deliver to.
//! Exports: `ConnectionHost`.
//! Role: `GET /connect` registers a connection and streams its messages as JSONL.
//! Invariants: A connection lives exactly as long as its response stream.
//! Invariants: Dropping the stream removes the id from the registry and every room.
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::core::registry::{Connection, MemoryRegistry};
use crate::core::rooms::MemoryRooms;

pub const CONNECTION_ID_HEADER: &str = "fanrelay-connection";

#[derive(Clone, Debug, Default)]
pub struct ConnectionHost {
    registry: MemoryRegistry,
    rooms: MemoryRooms,
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    id: Option<String>,
    /// Comma-separated room names to join on connect.
    rooms: Option<String>,
}

struct Disconnect {
    id: String,
    registry: MemoryRegistry,
    rooms: MemoryRooms,
}

impl Drop for Disconnect {
    fn drop(&mut self) {
        self.rooms.leave_all(&self.id);
        self.registry.disconnect(&self.id);
        tracing::debug!(connection = %self.id, "connection closed");
    }
}

impl ConnectionHost {
    pub fn new(registry: MemoryRegistry, rooms: MemoryRooms) -> Self {
        Self { registry, rooms }
    }

    pub fn registry(&self) -> &MemoryRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &MemoryRooms {
        &self.rooms
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/connect", get(connect))
            .with_state(self)
    }
}

async fn connect(State(host): State<ConnectionHost>, Query(query): Query<ConnectQuery>) -> Response {
    let (connection, rx) = match host.registry.connect(query.id) {
        Ok(pair) => pair,
        Err(err) => {
            let reason = err.message().unwrap_or("connect failed").to_string();
            return (
                StatusCode::CONFLICT,
                Json(json!({ "ok": false, "reason": reason })),
            )
                .into_response();
        }
    };
    let id = connection.id().to_string();
    let rooms: Vec<&str> = query
        .rooms
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|room| !room.is_empty())
        .collect();
    for room in &rooms {
        host.rooms.join(*room, id.clone());
    }
    tracing::info!(connection = %id, rooms = rooms.len(), "connection opened");

    let guard = Disconnect {
        id: id.clone(),
        registry: host.registry.clone(),
        rooms: host.rooms.clone(),
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |msg| {
        let _alive = &guard;
        serde_json::to_vec(&msg)
            .map(|mut line| {
                line.push(b'\n');
                Bytes::from(line)
            })
            .map_err(std::io::Error::other)
    });

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/jsonl"),
    );
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CONNECTION_ID_HEADER, value);
    }
    response
}

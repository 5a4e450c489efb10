//! Purpose: Define the connection registry contract and an in-memory implementation.
//! Exports: `Connection`, `ConnectionRegistry`, `MemoryRegistry`, `ChannelConnection`.
//! Role: Injected capability; the relay core only reads it and writes payloads.
//! Invariants: Writes are fire-and-forget; a closed receiver is not an error.
//! Invariants: Registry iteration works on a snapshot, never while holding the lock.
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use super::error::{Error, ErrorKind};

pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    fn write(&self, msg: &Value);
}

pub trait ConnectionRegistry: Send + Sync {
    fn for_each_connection(&self, f: &mut dyn FnMut(&dyn Connection));

    fn get_connection(&self, id: &str) -> Option<Arc<dyn Connection>>;
}

/// Connection whose writes land on an unbounded channel drained by the socket task.
#[derive(Debug)]
pub struct ChannelConnection {
    id: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl Connection for ChannelConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&self, msg: &Value) {
        if self.tx.send(msg.clone()).is_err() {
            tracing::debug!(connection = %self.id, "dropping write to closed connection");
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<ChannelConnection>>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, generating an id when none is given.
    pub fn connect(
        &self,
        id: Option<String>,
    ) -> Result<(Arc<ChannelConnection>, mpsc::UnboundedReceiver<Value>), Error> {
        let id = match id {
            Some(id) if !id.is_empty() => id,
            Some(_) => {
                return Err(
                    Error::new(ErrorKind::Usage).with_message("connection id must not be empty")
                );
            }
            None => random_id()?,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ChannelConnection { id: id.clone(), tx });

        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        if connections.contains_key(&id) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("connection id already in use: {id}")));
        }
        connections.insert(id, connection.clone());
        Ok((connection, rx))
    }

    pub fn disconnect(&self, id: &str) -> bool {
        self.connections
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<ChannelConnection>> {
        self.connections
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

impl ConnectionRegistry for MemoryRegistry {
    fn for_each_connection(&self, f: &mut dyn FnMut(&dyn Connection)) {
        for connection in self.snapshot() {
            f(connection.as_ref());
        }
    }

    fn get_connection(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.connections
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(id)
            .map(|connection| connection.clone() as Arc<dyn Connection>)
    }
}

fn random_id() -> Result<String, Error> {
    let mut bytes = [0u8; 12];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to generate connection id: {err}"))
    })?;
    let mut id = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    Ok(id)
}

//! Purpose: Define the public Rust API boundary for fanrelay.
//! Exports: Endpoint, forwarder, peer client, connection host and the core types they use.
//! Role: Public surface used by the CLI, embedders and integration tests.
//! Invariants: This module is the only public path embedders need; `core` stays an implementation detail.

mod endpoint;
mod forward;
mod host;
mod peer;

pub use crate::core::config::{
    Config, DEFAULT_CONCURRENTLY, DEFAULT_METHOD, DEFAULT_PASSWORD, DEFAULT_ROUTE,
    DEFAULT_USERNAME, Options, RoutePattern,
};
pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::outcome::DeliveryOutcome;
pub use crate::core::registry::{ChannelConnection, Connection, ConnectionRegistry, MemoryRegistry};
pub use crate::core::resolver::{Resolution, resolve};
pub use crate::core::rooms::{GroupLookup, Membership, MemoryRooms};
pub use crate::core::selector::{Packet, Protocol, Selector, decode_packet};
pub use endpoint::{Endpoint, Ingested, REJECTION_REASON};
pub use forward::Forwarder;
pub use host::{CONNECTION_ID_HEADER, ConnectionHost};
pub use peer::PeerClient;

//! Purpose: Deliver a message to its targets wherever they are connected.
//! Exports: `Forwarder`.
//! Role: Outward-facing API; local delivery first, then bounded fan-out to peers.
//! Invariants: Fully local deliveries never touch the network.
//! Invariants: At most `concurrently` peer calls are in flight at any instant.
//! Invariants: The result is produced once, after every dispatched call has settled.
//! Invariants: Ids delivered locally are never sent onward, so counts are never doubled.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use super::peer::PeerClient;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};
use crate::core::outcome::DeliveryOutcome;
use crate::core::registry::ConnectionRegistry;
use crate::core::resolver::{Resolution, resolve};
use crate::core::rooms::GroupLookup;
use crate::core::selector::Selector;

#[derive(Clone)]
pub struct Forwarder {
    config: Config,
    registry: Arc<dyn ConnectionRegistry>,
    groups: Option<Arc<dyn GroupLookup>>,
    client: PeerClient,
}

impl Forwarder {
    pub fn new(config: Config, registry: Arc<dyn ConnectionRegistry>) -> Self {
        let client = PeerClient::new(&config);
        Self {
            config,
            registry,
            groups: None,
            client,
        }
    }

    pub fn with_groups(mut self, groups: Arc<dyn GroupLookup>) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_client(mut self, client: PeerClient) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Forward with the configured concurrency cap.
    pub async fn forward<S: AsRef<str>>(
        &self,
        peers: &[S],
        msg: Value,
        selector: Selector,
    ) -> Result<DeliveryOutcome, Error> {
        self.forward_with_limit(peers, msg, selector, self.config.concurrently())
            .await
    }

    pub async fn forward_with_limit<S: AsRef<str>>(
        &self,
        peers: &[S],
        msg: Value,
        selector: Selector,
        concurrency_limit: usize,
    ) -> Result<DeliveryOutcome, Error> {
        let peers: Vec<String> = peers
            .iter()
            .map(|peer| peer.as_ref().trim())
            .filter(|peer| !peer.is_empty())
            .map(str::to_string)
            .collect();

        // An empty spark travels as a falsy `sparks`, which every endpoint reads as broadcast.
        let selector = match selector {
            Selector::One(id) if id.is_empty() => Selector::All,
            other => other,
        };

        let resolution = match (&selector, self.groups.as_deref()) {
            (Selector::Group { .. }, None) if !peers.is_empty() => {
                tracing::debug!("no local group lookup; peers resolve the rooms");
                Resolution {
                    delivered: 0,
                    residual: Some(selector.clone()),
                }
            }
            (_, groups) => resolve(&selector, &msg, self.registry.as_ref(), groups).await?,
        };
        let local_count = resolution.delivered;

        let fully_local = match selector {
            Selector::All | Selector::Group { .. } => peers.is_empty(),
            Selector::One(_) | Selector::Many(_) => resolution.residual.is_none(),
        };
        if fully_local {
            tracing::debug!(delivered = local_count, "delivered without contacting peers");
            return Ok(DeliveryOutcome::delivered(local_count, true));
        }

        if peers.is_empty() {
            return Err(Error::new(ErrorKind::NoServers)
                .with_message("No servers provided")
                .with_selector_type(selector.type_name())
                .with_outcome(
                    DeliveryOutcome::failed(local_count, false).with_reason("No servers provided"),
                ));
        }

        let residual = resolution.residual.unwrap_or(Selector::All);
        let selector_type = residual.type_name();
        let packet = Arc::new(residual.to_packet(&msg));
        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));

        tracing::debug!(
            peers = peers.len(),
            selector = selector_type,
            local = local_count,
            "fanning out to peers"
        );

        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let permit = semaphore.clone().acquire_owned().await.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("peer call limiter closed")
                    .with_source(err)
            })?;
            let client = self.client.clone();
            let packet = packet.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                client.deliver(&peer, selector_type, packet).await
            }));
        }

        let mut delivered = local_count;
        let mut first_error: Option<Error> = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(Error::new(ErrorKind::Internal)
                    .with_message("peer call task failed")
                    .with_source(err)),
            };
            match result {
                Ok(send) => delivered += send,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => {
                let reason = err.message().unwrap_or("peer call failed").to_string();
                Err(err.with_outcome(DeliveryOutcome::failed(delivered, false).with_reason(reason)))
            }
            None => Ok(DeliveryOutcome::delivered(delivered, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Forwarder;
    use crate::core::config::Options;
    use crate::core::error::ErrorKind;
    use crate::core::outcome::DeliveryOutcome;
    use crate::core::registry::MemoryRegistry;
    use crate::core::rooms::MemoryRooms;
    use crate::core::selector::Selector;
    use serde_json::json;
    use std::sync::Arc;

    fn forwarder(registry: &MemoryRegistry) -> Forwarder {
        let config = Options::default().normalize().expect("config");
        Forwarder::new(config, Arc::new(registry.clone()))
    }

    const NO_PEERS: [&str; 0] = [];

    #[tokio::test]
    async fn local_targets_short_circuit() {
        let registry = MemoryRegistry::new();
        let (_a, mut rx) = registry.connect(Some("a".into())).expect("a");
        let (_b, _rx_b) = registry.connect(Some("b".into())).expect("b");

        // Peers are unreachable on purpose: any network call would fail the forward.
        let peers = ["http://127.0.0.1:9"];
        let outcome = forwarder(&registry)
            .forward(&peers, json!("hi"), Selector::Many(vec!["a".into(), "b".into()]))
            .await
            .expect("local");
        assert_eq!(outcome, DeliveryOutcome::delivered(2, true));
        assert_eq!(rx.try_recv().expect("delivered"), json!("hi"));

        let outcome = forwarder(&registry)
            .forward(&peers, json!("hi"), Selector::One("a".into()))
            .await
            .expect("local");
        assert_eq!(outcome, DeliveryOutcome::delivered(1, true));
    }

    #[tokio::test]
    async fn broadcast_without_peers_is_local() {
        let registry = MemoryRegistry::new();
        let _connections: Vec<_> = (0..4)
            .map(|_| registry.connect(None).expect("connect"))
            .collect();
        let outcome = forwarder(&registry)
            .forward(&NO_PEERS, json!("hi"), Selector::All)
            .await
            .expect("local");
        assert_eq!(outcome, DeliveryOutcome::delivered(4, true));
    }

    #[tokio::test]
    async fn remote_targets_without_peers_fail() {
        let registry = MemoryRegistry::new();
        let (_a, _rx) = registry.connect(Some("a".into())).expect("a");

        let err = forwarder(&registry)
            .forward(
                &["", "  "],
                json!("hi"),
                Selector::Many(vec!["a".into(), "elsewhere".into()]),
            )
            .await
            .expect_err("no servers");
        assert_eq!(err.kind(), ErrorKind::NoServers);
        assert_eq!(err.message(), Some("No servers provided"));
        let outcome = err.outcome().expect("outcome");
        assert!(!outcome.ok);
        assert!(!outcome.local);
        assert_eq!(outcome.delivered, 1);
    }

    #[tokio::test]
    async fn group_without_peers_is_local() {
        let registry = MemoryRegistry::new();
        let rooms = MemoryRooms::new();
        for id in ["a", "b", "c"] {
            let (_connection, _rx) = registry.connect(Some(id.into())).expect("connect");
            rooms.join("lobby", id);
        }
        let outcome = forwarder(&registry)
            .with_groups(Arc::new(rooms))
            .forward(&NO_PEERS, json!("hi"), Selector::group(["lobby"], ["c"]))
            .await
            .expect("local");
        assert_eq!(outcome, DeliveryOutcome::delivered(2, true));
    }

    #[tokio::test]
    async fn empty_spark_is_a_broadcast() {
        let registry = MemoryRegistry::new();
        let (_local, mut rx) = registry.connect(Some("local".into())).expect("local");

        let outcome = forwarder(&registry)
            .forward(&NO_PEERS, json!("hi"), Selector::One(String::new()))
            .await
            .expect("local broadcast");
        assert_eq!(outcome, DeliveryOutcome::delivered(1, true));
        assert_eq!(rx.try_recv().expect("delivered"), json!("hi"));

        let err = forwarder(&registry)
            .forward(&["http://127.0.0.1:9"], json!("again"), Selector::One(String::new()))
            .await
            .expect_err("unreachable");
        assert_eq!(err.selector_type(), Some("broadcast"));
        assert_eq!(err.packet(), Some(&json!({ "msg": "again" })));
        assert_eq!(err.outcome().map(|outcome| outcome.delivered), Some(1));
        assert_eq!(rx.try_recv().expect("delivered"), json!("again"));
    }

    #[tokio::test]
    async fn rooms_without_lookup_are_left_to_peers() {
        let registry = MemoryRegistry::new();
        let forwarder = forwarder(&registry);

        let err = forwarder
            .forward(&NO_PEERS, json!("hi"), Selector::group(["lobby"], ["a"]))
            .await
            .expect_err("nothing can resolve the rooms");
        assert_eq!(err.kind(), ErrorKind::GroupLookupFailed);

        let err = forwarder
            .forward(
                &["http://127.0.0.1:9"],
                json!("hi"),
                Selector::group(["lobby"], ["a"]),
            )
            .await
            .expect_err("unreachable");
        assert_eq!(err.kind(), ErrorKind::PeerUnreachable);
        assert_eq!(err.selector_type(), Some("rooms"));
        assert_eq!(
            err.packet(),
            Some(&json!({ "msg": "hi", "rooms": ["lobby"], "except": ["a"] }))
        );
    }

    #[tokio::test]
    async fn unreachable_peer_reports_partial_tally() {
        let registry = MemoryRegistry::new();
        let (_a, _rx) = registry.connect(Some("a".into())).expect("a");

        let err = forwarder(&registry)
            .forward(
                &["http://127.0.0.1:9"],
                json!("hi"),
                Selector::Many(vec!["a".into(), "b".into()]),
            )
            .await
            .expect_err("unreachable");
        assert_eq!(err.kind(), ErrorKind::PeerUnreachable);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.url(), Some("http://127.0.0.1:9/primus/omega/supreme"));
        assert_eq!(err.selector_type(), Some("sparks"));
        assert_eq!(err.packet(), Some(&json!({ "msg": "hi", "sparks": ["b"] })));
        assert_eq!(err.outcome().map(|outcome| outcome.delivered), Some(1));
    }
}

//! The pair worker
//!
//! Discovery callbacks and the `paring_services` handler are cheap: they
//! enqueue a candidate and return. This single consumer does the heavy part:
//! admission checks, the catalog fetch, and the observe subscriptions.
//! Being the sole mutator of the peer table, it needs no ordering tricks.

use std::net::Ipv6Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trellis_coap::uri::WELL_KNOWN_CORE;
use trellis_coap::{CoapAdapter, Token, catalog};
use trellis_common::{PAIR_QUEUE_DEPTH, PAIRED_OBSERVERS_MAX, TrellisError};
use trellis_naming::LocalIdentity;

use crate::registry::{AddOutcome, PairRegistry, Peer, PeerUri};
use crate::rules::PairRules;

/// Admission policy capability, implemented by the device profile.
pub trait PairPolicy: Send + Sync {
    fn pair_rules(&self) -> PairRules;
}

/// Listener invoked whenever the pairing list changes for a device.
pub trait PairedObserver: Send + Sync {
    fn on_paired(&self, peer: &Peer);
}

/// Work items accepted by the pair queue.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PairCommand {
    CheckAndAdd { name: String, addr: Ipv6Addr },
}

/// Non-blocking producer side of the pair queue. Enqueueing never waits; a
/// full queue drops the item.
#[derive(Clone)]
pub struct PairQueue {
    tx: mpsc::Sender<PairCommand>,
}

impl PairQueue {
    pub fn enqueue(&self, command: PairCommand) -> Result<(), TrellisError> {
        self.tx.try_send(command).map_err(|err| {
            warn!("pair queue refused an item: {err}");
            TrellisError::Capacity("pair queue")
        })
    }

    pub fn check_and_add(&self, name: impl Into<String>, addr: Ipv6Addr) -> Result<(), TrellisError> {
        self.enqueue(PairCommand::CheckAndAdd {
            name: name.into(),
            addr,
        })
    }
}

/// Bounded registration list for paired-device listeners.
#[derive(Default)]
pub struct PairedObservers {
    listeners: RwLock<Vec<Arc<dyn PairedObserver>>>,
}

impl PairedObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn PairedObserver>) -> Result<(), TrellisError> {
        let mut listeners = self.listeners.write();
        if listeners.len() >= PAIRED_OBSERVERS_MAX {
            return Err(TrellisError::Capacity("paired-observer list"));
        }
        listeners.push(listener);
        Ok(())
    }

    pub fn notify(&self, peer: &Peer) {
        for listener in self.listeners.read().iter() {
            listener.on_paired(peer);
        }
    }
}

pub struct PairWorker {
    rx: mpsc::Receiver<PairCommand>,
    registry: Arc<PairRegistry>,
    identity: LocalIdentity,
    policy: Arc<dyn PairPolicy>,
    adapter: CoapAdapter,
    observers: Arc<PairedObservers>,
}

/// Build the queue plus its single consumer.
pub fn pair_channel(
    registry: Arc<PairRegistry>,
    identity: LocalIdentity,
    policy: Arc<dyn PairPolicy>,
    adapter: CoapAdapter,
    observers: Arc<PairedObservers>,
) -> (PairQueue, PairWorker) {
    let (tx, rx) = mpsc::channel(PAIR_QUEUE_DEPTH);
    (
        PairQueue { tx },
        PairWorker {
            rx,
            registry,
            identity,
            policy,
            adapter,
            observers,
        },
    )
}

impl PairWorker {
    /// Drain the queue until every producer handle is gone.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                PairCommand::CheckAndAdd { name, addr } => {
                    self.check_and_add(&name, addr).await;
                }
            }
        }
        debug!("pair worker stopped");
    }

    async fn check_and_add(&self, name: &str, addr: Ipv6Addr) {
        info!("pairing candidate {name}");

        if !self.identity.matches_local(name) {
            debug!("pairing skipped: {name} is this node or another group");
            return;
        }

        let device_type = match trellis_naming::device_type_of(name) {
            Ok(ty) => ty,
            Err(err) => {
                warn!("pairing skipped: {name}: {err}");
                return;
            }
        };
        if !self.policy.pair_rules().allows(device_type) {
            debug!("pairing skipped: {device_type} not allowed by policy");
            return;
        }

        match self.registry.add(name, addr) {
            Err(err) => warn!("pairing {name} failed: {err}"),
            Ok(AddOutcome::NoSpace) => warn!("pairing {name} failed: peer table full"),
            Ok(AddOutcome::Admitted(index)) => {
                info!("paired {name} at index {index}");
                if let Err(err) = self.learn_catalog(name, addr).await {
                    warn!("catalog fetch from {name} failed: {err}");
                }
                self.notify_observers(name);
            }
            Ok(AddOutcome::Updated) => {
                info!("peer {name} re-addressed, refreshing subscriptions");
                self.refresh_subscriptions(name, addr).await;
                self.notify_observers(name);
            }
            Ok(AddOutcome::NoChange) => {
                // the peer may have seen our address change; re-bind the
                // subscriptions we hold across the whole table
                let updated = send_update_ip(&self.registry, &self.adapter, self.identity.full()).await;
                debug!("peer {name} unchanged; {updated} subscription updates sent");
                self.notify_observers(name);
            }
        }
    }

    /// GET the peer's `.well-known/core`, subscribe to every observable
    /// entry, and install the resulting URI slots.
    async fn learn_catalog(&self, name: &str, addr: Ipv6Addr) -> Result<(), TrellisError> {
        let response = self.adapter.send_get_bytes(addr, WELL_KNOWN_CORE).await?;
        let descriptors = catalog::decode(&response.payload)?;

        let mut uris = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let token = if descriptor.observable {
                match self
                    .adapter
                    .send_subscribe(addr, &descriptor.path, self.identity.full().as_bytes())
                    .await
                {
                    Ok((token, _response)) => token,
                    Err(err) => {
                        warn!("subscribe to {name} {} failed: {err}", descriptor.path);
                        Token::EMPTY
                    }
                }
            } else {
                Token::EMPTY
            };
            uris.push(PeerUri::from_descriptor(descriptor, token));
        }

        self.registry.set_uris(name, uris)
    }

    /// Re-bind the subscriptions held on one re-addressed peer.
    async fn refresh_subscriptions(&self, name: &str, addr: Ipv6Addr) {
        let Some(peer) = self.registry.get(name) else {
            return;
        };
        for uri in peer.uris.iter().filter(|uri| uri.is_observed()) {
            if let Err(err) = self
                .adapter
                .send_subscribe_update(addr, &uri.path, uri.token, self.identity.full().as_bytes())
                .await
            {
                warn!("subscription refresh to {name} {} failed: {err}", uri.path);
            }
        }
    }

    fn notify_observers(&self, name: &str) {
        if let Some(peer) = self.registry.get(name) {
            self.observers.notify(&peer);
        }
    }
}

/// Walk the peer table and send an observe refresh for every URI slot this
/// node holds a token on. Used after a local address change. Returns the
/// number of updates attempted.
pub async fn send_update_ip(
    registry: &PairRegistry,
    adapter: &CoapAdapter,
    announce: &str,
) -> usize {
    let mut updated = 0;
    for peer in registry.snapshot() {
        for uri in peer.uris.iter().filter(|uri| uri.is_observed()) {
            if let Err(err) = adapter
                .send_subscribe_update(peer.addr, &uri.path, uri.token, announce.as_bytes())
                .await
            {
                warn!("ip update to {} {} failed: {err}", peer.name, uri.path);
            }
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use trellis_coap::transport::testing::RecordingTransport;
    use trellis_coap::{CoapResponse, ResponseCode, UriDescriptor};
    use trellis_common::DeviceType;

    const LOCAL: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 7);
    const PEER_A: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0xA);
    const PEER_B: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0xB);
    const PEER_NAME: &str = "kitchen_3_aabbccddeeff0011";
    const EUI: [u8; 8] = [0x58, 0x8c, 0x81, 0xff, 0xfe, 0x30, 0x1e, 0xa4];

    struct AllowEverything;

    impl PairPolicy for AllowEverything {
        fn pair_rules(&self) -> PairRules {
            PairRules::AllowAll
        }
    }

    struct LightsOnly;

    impl PairPolicy for LightsOnly {
        fn pair_rules(&self) -> PairRules {
            PairRules::Only(vec![DeviceType::LightingOnOff])
        }
    }

    struct CountingObserver(std::sync::atomic::AtomicUsize);

    impl PairedObserver for CountingObserver {
        fn on_paired(&self, _peer: &Peer) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct Fixture {
        transport: Arc<RecordingTransport>,
        registry: Arc<PairRegistry>,
        queue: PairQueue,
        observer: Arc<CountingObserver>,
        worker_handle: tokio::task::JoinHandle<()>,
    }

    fn fixture(policy: Arc<dyn PairPolicy>) -> Fixture {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = CoapAdapter::new(transport.clone(), LOCAL);
        let registry = Arc::new(PairRegistry::new());
        let identity = LocalIdentity::new("kitchen", DeviceType::Switch, EUI).unwrap();

        let observers = Arc::new(PairedObservers::new());
        let observer = Arc::new(CountingObserver(std::sync::atomic::AtomicUsize::new(0)));
        observers.register(observer.clone()).unwrap();

        let (queue, worker) =
            pair_channel(registry.clone(), identity, policy, adapter, observers);
        let worker_handle = tokio::spawn(worker.run());

        Fixture {
            transport,
            registry,
            queue,
            observer,
            worker_handle,
        }
    }

    fn catalog_reply(descriptors: &[UriDescriptor]) -> CoapResponse {
        CoapResponse::new(
            ResponseCode::Content,
            Bytes::from(catalog::encode(descriptors).unwrap()),
        )
    }

    // give the worker a few scheduling points to drain the queue
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_pair_by_catalog() {
        let fixture = fixture(Arc::new(AllowEverything));

        // reply to the catalog GET, then default-ACK the subscribe PUT
        fixture.transport.push_reply(Ok(catalog_reply(&[UriDescriptor::new(
            "light/on_off",
            DeviceType::LightingOnOff,
            true,
        )])));

        fixture.queue.check_and_add(PEER_NAME, PEER_A).unwrap();
        settle().await;

        let sent = fixture.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.path, WELL_KNOWN_CORE);
        assert_eq!(sent[1].1.path, "light/on_off");
        assert_eq!(sent[1].1.observe, Some(0));
        // subscribe announces the local canonical name
        assert_eq!(&sent[1].1.payload[..], b"kitchen_2_588c81fffe301ea4");

        let peer = fixture.registry.get(PEER_NAME).unwrap();
        assert_eq!(peer.uris.len(), 1);
        assert!(peer.uris[0].is_observed());
        assert_eq!(
            fixture.observer.0.load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        fixture.worker_handle.abort();
    }

    #[tokio::test]
    async fn test_own_name_and_foreign_group_skipped() {
        let fixture = fixture(Arc::new(AllowEverything));

        fixture
            .queue
            .check_and_add("kitchen_2_588c81fffe301ea4", PEER_A)
            .unwrap();
        fixture
            .queue
            .check_and_add("garage_3_aabbccddeeff0011", PEER_A)
            .unwrap();
        settle().await;

        assert!(fixture.registry.is_empty());
        assert_eq!(fixture.transport.sent_count(), 0);

        fixture.worker_handle.abort();
    }

    #[tokio::test]
    async fn test_policy_rejects_type() {
        let fixture = fixture(Arc::new(LightsOnly));

        // a switch (type 2) knocking on a lights-only policy
        fixture
            .queue
            .check_and_add("kitchen_2_aabbccddeeff0011", PEER_A)
            .unwrap();
        settle().await;
        assert!(fixture.registry.is_empty());

        // a light (type 4) passes
        fixture.transport.push_reply(Ok(catalog_reply(&[UriDescriptor::new(
            "light/on_off",
            DeviceType::LightingOnOff,
            true,
        )])));
        fixture
            .queue
            .check_and_add("kitchen_4_aabbccddeeff0011", PEER_A)
            .unwrap();
        settle().await;
        assert_eq!(fixture.registry.len(), 1);

        fixture.worker_handle.abort();
    }

    #[tokio::test]
    async fn test_readdressed_peer_gets_refresh() {
        let fixture = fixture(Arc::new(AllowEverything));

        fixture.transport.push_reply(Ok(catalog_reply(&[UriDescriptor::new(
            "light/on_off",
            DeviceType::LightingOnOff,
            true,
        )])));
        fixture.queue.check_and_add(PEER_NAME, PEER_A).unwrap();
        settle().await;
        fixture.transport.clear();

        // same name from a new address: IP overwritten, observe refresh sent
        fixture.queue.check_and_add(PEER_NAME, PEER_B).unwrap();
        settle().await;

        assert_eq!(fixture.registry.len(), 1);
        assert_eq!(fixture.registry.get(PEER_NAME).unwrap().addr, PEER_B);

        let sent = fixture.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, PEER_B);
        assert_eq!(sent[0].1.observe, Some(2));

        fixture.worker_handle.abort();
    }

    #[tokio::test]
    async fn test_send_update_ip_counts_observed_slots() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = CoapAdapter::new(transport.clone(), LOCAL);
        let registry = PairRegistry::new();

        registry.add(PEER_NAME, PEER_A).unwrap();
        registry
            .set_uris(
                PEER_NAME,
                vec![
                    PeerUri {
                        path: "light/on_off".into(),
                        function: DeviceType::LightingOnOff,
                        state: 0,
                        token: Token([1, 2, 3, 4]),
                    },
                    PeerUri {
                        path: "light/info".into(),
                        function: DeviceType::Lighting,
                        state: 0,
                        token: Token::EMPTY,
                    },
                ],
            )
            .unwrap();

        let updated = send_update_ip(&registry, &adapter, "kitchen_2_588c81fffe301ea4").await;
        assert_eq!(updated, 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.observe, Some(2));
        assert_eq!(sent[0].1.token, Token([1, 2, 3, 4]));
    }
}

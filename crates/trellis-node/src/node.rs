//! The framework root
//!
//! One [`Node`] value owns every component: identity, settings store, peer
//! registry, observer engine, CoAP adapter, and the background workers
//! (pair worker, settings flush, SRP lease watchdog). Components hold no
//! references back into the node; the node wires them together and threads
//! itself through the URI handlers.

use std::net::Ipv6Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trellis_coap::uri::PARING_SERVICES;
use trellis_coap::{CoapAdapter, CoapTransport};
use trellis_naming::LocalIdentity;
use trellis_observer::ObserverEngine;
use trellis_pair::{PairQueue, PairRegistry, PairedObserver, PairedObservers, pair_channel};
use trellis_settings::flash::FlashPage;
use trellis_settings::{SettingsStore, app_keys};

use crate::dns::{DnsBrowser, browse_and_enqueue};
use crate::driver::DeviceDriver;
use crate::srp::{SrpClient, SrpLifecycle};
use crate::uris::UriRouter;

/// Radio-layer events the host forwards to the framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    RoutingLocatorAdded(Ipv6Addr),
    RoutingLocatorRemoved,
}

/// External collaborators handed over at startup.
pub struct Platform {
    pub transport: Arc<dyn CoapTransport>,
    pub srp: Arc<dyn SrpClient>,
    pub dns: Arc<dyn DnsBrowser>,
    pub flash: Box<dyn FlashPage>,
    /// Factory EUI-64 read from the radio.
    pub eui64: [u8; 8],
    pub local_addr: Ipv6Addr,
    /// Mesh-local multicast group used for pairing announcements.
    pub multicast_addr: Ipv6Addr,
}

/// Peer identity persisted across reboots so pairing can resume without
/// waiting for a fresh browse round.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedPeer {
    name: String,
    addr: Ipv6Addr,
}

pub struct Node {
    identity: LocalIdentity,
    driver: DeviceDriver,
    adapter: CoapAdapter,
    settings: SettingsStore,
    registry: Arc<PairRegistry>,
    observer: Arc<ObserverEngine>,
    pair_queue: PairQueue,
    pub(crate) router: UriRouter,
    srp: Arc<SrpLifecycle>,
    dns: Arc<dyn DnsBrowser>,
    multicast: Ipv6Addr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bring the node up: persist identity, register with SRP, start the
    /// workers, replay persisted pairings, and kick off discovery.
    pub async fn start(
        group: &str,
        driver: DeviceDriver,
        platform: Platform,
    ) -> anyhow::Result<Arc<Node>> {
        let driver = driver.validated()?;

        let (settings, flush_worker) = trellis_settings::open(platform.flash);
        settings.save_string(app_keys::GROUP, group)?;
        settings.set(app_keys::DEVICE_TYPE, &[driver.device_type.tag()])?;

        let identity = LocalIdentity::new(group, driver.device_type, platform.eui64)?;
        info!("node identity: {}", identity.full());

        let adapter = CoapAdapter::new(platform.transport, platform.local_addr);
        let registry = Arc::new(PairRegistry::new());
        let observer = ObserverEngine::new(adapter.clone());
        let router = UriRouter::new(&driver.uris.uri_list())?;

        let observers = Arc::new(PairedObservers::new());
        observers.register(driver.paired.clone())?;
        observers.register(Arc::new(PairingPersister {
            registry: registry.clone(),
            settings: settings.clone(),
        }))?;

        let (pair_queue, pair_worker) = pair_channel(
            registry.clone(),
            identity.clone(),
            driver.policy.clone(),
            adapter.clone(),
            observers,
        );

        let srp = SrpLifecycle::new(platform.srp, identity.full());

        let node = Arc::new(Node {
            identity,
            driver,
            adapter,
            settings,
            registry,
            observer,
            pair_queue,
            router,
            srp,
            dns: platform.dns,
            multicast: platform.multicast_addr,
            tasks: Mutex::new(Vec::new()),
        });

        {
            let mut tasks = node.tasks.lock();
            tasks.push(tokio::spawn(flush_worker.run()));
            tasks.push(tokio::spawn(pair_worker.run()));
            tasks.push(tokio::spawn(node.srp.clone().lease_watchdog()));
        }

        node.srp.register(platform.local_addr).await?;
        node.announce().await;
        node.requeue_persisted_peers();
        node.browse_once().await;

        Ok(node)
    }

    /// PUT the canonical name to the mesh multicast pairing endpoint so
    /// already-running peers learn about this node immediately.
    pub async fn announce(&self) {
        if let Err(err) = self
            .adapter
            .send_put_bytes(self.multicast, PARING_SERVICES, self.identity.full().as_bytes())
            .await
        {
            warn!("pairing announcement failed: {err}");
        }
    }

    /// One DNS-SD browse pass over the well-known service.
    pub async fn browse_once(&self) {
        match browse_and_enqueue(self.dns.as_ref(), &self.pair_queue).await {
            Ok(queued) => info!("discovery queued {queued} candidates"),
            Err(err) => warn!("discovery browse failed: {err}"),
        }
    }

    /// React to IPv6 address churn: refresh the SRP host record,
    /// re-announce, and re-bind the subscriptions this node holds.
    pub async fn local_address_changed(&self, addr: Ipv6Addr) {
        info!("local address changed to {addr}");
        self.adapter.set_local_addr(addr);

        if let Err(err) = self.srp.update_host_address(addr).await {
            warn!("srp host address update failed: {err}");
        }
        self.announce().await;

        let updated =
            trellis_pair::send_update_ip(&self.registry, &self.adapter, self.identity.full()).await;
        info!("{updated} subscription updates sent after address change");
    }

    pub async fn on_radio_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::RoutingLocatorAdded(addr) => self.local_address_changed(addr).await,
            RadioEvent::RoutingLocatorRemoved => {
                info!("routing locator lost, waiting for re-attach");
            }
        }
    }

    /// Device housekeeping hook; call from the host's main loop.
    pub fn tick(&self) {
        if let Some(periodic) = &self.driver.periodic {
            (periodic.as_ref())();
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<PairRegistry> {
        &self.registry
    }

    pub fn observer(&self) -> &Arc<ObserverEngine> {
        &self.observer
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn pair_queue(&self) -> &PairQueue {
        &self.pair_queue
    }

    pub fn srp(&self) -> &Arc<SrpLifecycle> {
        &self.srp
    }

    pub(crate) fn driver(&self) -> &DeviceDriver {
        &self.driver
    }

    /// Stop the background workers and push any pending settings mutation
    /// to flash.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Err(err) = self.settings.flush_now() {
            warn!("final settings flush failed: {err}");
        }
        info!("node stopped");
    }

    fn requeue_persisted_peers(&self) {
        let Some(raw) = self.settings.lookup(app_keys::PAIRED_PEERS, 0) else {
            return;
        };
        let peers: Vec<PersistedPeer> = match serde_json::from_slice(&raw) {
            Ok(peers) => peers,
            Err(err) => {
                warn!("persisted pairings unreadable, ignoring: {err}");
                return;
            }
        };
        for peer in peers {
            // stale addresses are fine; the worker reconciles them
            let _ = self.pair_queue.check_and_add(peer.name, peer.addr);
        }
    }
}

/// Keeps the persisted pairing list in sync with the registry.
struct PairingPersister {
    registry: Arc<PairRegistry>,
    settings: SettingsStore,
}

impl PairedObserver for PairingPersister {
    fn on_paired(&self, _peer: &trellis_pair::Peer) {
        let peers: Vec<PersistedPeer> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|peer| PersistedPeer {
                name: peer.name,
                addr: peer.addr,
            })
            .collect();

        match serde_json::to_vec(&peers) {
            Ok(encoded) => {
                if let Err(err) = self.settings.set(app_keys::PAIRED_PEERS, &encoded) {
                    warn!("persisting pairings failed: {err}");
                }
            }
            Err(err) => warn!("encoding pairings failed: {err}"),
        }
    }
}

//! SRP registration lifecycle
//!
//! The node registers its canonical name as an SRP host plus a `_coap._udp`
//! service, then keeps the registration alive: a watchdog counts the lease
//! down and forces a refresh (clear + re-add) well before it expires, rather
//! than detecting expiry after the fact.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use trellis_common::{COAP_PORT, TrellisError};

/// Service label registered for every Trellis node.
pub const SRP_SERVICE: &str = "_coap._udp";

/// Requested service lease.
pub const LEASE: Duration = Duration::from_secs(7200);

/// Requested key lease.
pub const KEY_LEASE: Duration = Duration::from_secs(86400);

/// Watchdog tick period.
pub const WATCH_PERIOD: Duration = Duration::from_secs(300);

/// Refresh once the remaining lease falls to this guard.
pub const LEASE_GUARD: Duration = Duration::from_secs(4 * 300);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrpState {
    Stopped,
    SettingHost,
    AddingService,
    Registered,
    LeaseExpiring,
}

/// The service record handed to the SRP stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrpService {
    pub service: String,
    pub instance: String,
    pub port: u16,
    pub lease: Duration,
    pub key_lease: Duration,
}

impl SrpService {
    pub fn for_instance(instance: &str) -> Self {
        SrpService {
            service: SRP_SERVICE.to_owned(),
            instance: instance.to_owned(),
            port: COAP_PORT,
            lease: LEASE,
            key_lease: KEY_LEASE,
        }
    }
}

/// The external SRP stack.
#[async_trait]
pub trait SrpClient: Send + Sync {
    async fn set_host(&self, name: &str, addr: Ipv6Addr) -> Result<(), TrellisError>;
    async fn add_service(&self, service: &SrpService) -> Result<(), TrellisError>;
    async fn clear_service(&self, service: &SrpService) -> Result<(), TrellisError>;

    /// Lease interval granted by the server, used to seed the watchdog.
    fn lease_interval(&self) -> Duration;
}

pub struct SrpLifecycle {
    client: Arc<dyn SrpClient>,
    service: SrpService,
    state: RwLock<SrpState>,
}

impl SrpLifecycle {
    pub fn new(client: Arc<dyn SrpClient>, instance: &str) -> Arc<Self> {
        Arc::new(SrpLifecycle {
            client,
            service: SrpService::for_instance(instance),
            state: RwLock::new(SrpState::Stopped),
        })
    }

    pub fn state(&self) -> SrpState {
        *self.state.read()
    }

    /// Walk the registration state machine: host record, then the service.
    pub async fn register(&self, addr: Ipv6Addr) -> Result<(), TrellisError> {
        *self.state.write() = SrpState::SettingHost;
        self.client.set_host(&self.service.instance, addr).await?;

        *self.state.write() = SrpState::AddingService;
        self.client.add_service(&self.service).await?;

        *self.state.write() = SrpState::Registered;
        info!("srp: registered {} on {}", self.service.instance, SRP_SERVICE);
        Ok(())
    }

    /// Clear and re-add the service before the lease runs out.
    pub async fn refresh(&self) -> Result<(), TrellisError> {
        *self.state.write() = SrpState::LeaseExpiring;
        self.client.clear_service(&self.service).await?;
        self.client.add_service(&self.service).await?;
        *self.state.write() = SrpState::Registered;
        info!("srp: service lease refreshed");
        Ok(())
    }

    /// Re-register the host record after a local address change.
    pub async fn update_host_address(&self, addr: Ipv6Addr) -> Result<(), TrellisError> {
        self.client.set_host(&self.service.instance, addr).await
    }

    /// Periodic lease countdown. Runs until the task is aborted.
    pub async fn lease_watchdog(self: Arc<Self>) {
        let period = WATCH_PERIOD.as_secs();
        // the first tick fires immediately, so pad the initial budget
        let mut remaining = self.client.lease_interval().as_secs() + period;

        let mut ticker = tokio::time::interval(WATCH_PERIOD);
        loop {
            ticker.tick().await;
            remaining = remaining.saturating_sub(period);
            debug!("srp: lease countdown at {remaining}s");

            if remaining <= LEASE_GUARD.as_secs() {
                if let Err(err) = self.refresh().await {
                    warn!("srp: lease refresh failed: {err}");
                }
                remaining = self.client.lease_interval().as_secs() + period;
            }
        }
    }
}

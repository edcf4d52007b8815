//! DNS-SD browsing feeding the pair queue
//!
//! Browsing the well-known CoAP service yields peer instance labels; each
//! label is domain-suffixed, resolved to an IPv6 address, stripped back to
//! its canonical name, and queued for the pair worker. Resolution failures
//! skip the one candidate and move on.

use std::net::Ipv6Addr;

use async_trait::async_trait;
use tracing::{debug, warn};

use trellis_common::{PEERS_MAX, TrellisError};
use trellis_naming::{add_domain, strip_domain};
use trellis_pair::PairQueue;

/// Service name browsed for peer discovery.
pub const BROWSE_SERVICE: &str = "_coap._udp.default.service.arpa.";

/// The external DNS-SD client.
#[async_trait]
pub trait DnsBrowser: Send + Sync {
    /// Instance labels advertised under `service`.
    async fn browse(&self, service: &str) -> Result<Vec<String>, TrellisError>;

    /// Resolve a fully qualified host name to an IPv6 address.
    async fn resolve(&self, host: &str) -> Result<Ipv6Addr, TrellisError>;
}

/// One browse pass: resolve every advertised instance and enqueue it for
/// admission. Returns how many candidates were queued.
pub async fn browse_and_enqueue(
    browser: &dyn DnsBrowser,
    queue: &PairQueue,
) -> Result<usize, TrellisError> {
    let labels = browser.browse(BROWSE_SERVICE).await?;
    debug!("dns: browse returned {} instances", labels.len());

    let mut queued = 0;
    for label in labels.iter() {
        if queued >= PEERS_MAX {
            warn!("dns: candidate limit reached, ignoring the rest");
            break;
        }

        let host = match add_domain(label) {
            Ok(host) => host,
            Err(err) => {
                warn!("dns: skipping instance {label}: {err}");
                continue;
            }
        };

        let addr = match browser.resolve(&host).await {
            Ok(addr) => addr,
            Err(err) => {
                warn!("dns: resolve {host} failed: {err}");
                continue;
            }
        };

        let name = match strip_domain(&host) {
            Ok(name) => name,
            Err(err) => {
                warn!("dns: malformed host {host}: {err}");
                continue;
            }
        };

        if queue.check_and_add(name, addr).is_ok() {
            queued += 1;
        }
    }
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use trellis_coap::CoapAdapter;
    use trellis_coap::transport::testing::RecordingTransport;
    use trellis_common::DeviceType;
    use trellis_naming::LocalIdentity;
    use trellis_pair::{PairRegistry, PairRules, PairedObservers, pair_channel};

    struct StaticDns {
        labels: Vec<String>,
        hosts: HashMap<String, Ipv6Addr>,
        browsed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DnsBrowser for StaticDns {
        async fn browse(&self, service: &str) -> Result<Vec<String>, TrellisError> {
            self.browsed.lock().push(service.to_owned());
            Ok(self.labels.clone())
        }

        async fn resolve(&self, host: &str) -> Result<Ipv6Addr, TrellisError> {
            self.hosts
                .get(host)
                .copied()
                .ok_or(TrellisError::NotFound("host"))
        }
    }

    struct Allow;

    impl trellis_pair::PairPolicy for Allow {
        fn pair_rules(&self) -> PairRules {
            PairRules::AllowAll
        }
    }

    const EUI: [u8; 8] = [0x58, 0x8c, 0x81, 0xff, 0xfe, 0x30, 0x1e, 0xa4];
    const PEER_ADDR: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);

    #[tokio::test]
    async fn test_browse_resolves_and_queues() {
        let peer = "kitchen_4_aabbccddeeff0011";
        let dns = StaticDns {
            labels: vec![peer.to_owned(), "unresolvable_4_0000000000000000".to_owned()],
            hosts: HashMap::from([(
                format!("{peer}.default.service.arpa."),
                PEER_ADDR,
            )]),
            browsed: Mutex::new(Vec::new()),
        };

        let transport = Arc::new(RecordingTransport::new());
        let adapter = CoapAdapter::new(
            transport.clone(),
            Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 7),
        );
        let registry = Arc::new(PairRegistry::new());
        let identity = LocalIdentity::new("kitchen", DeviceType::Switch, EUI).unwrap();
        let (queue, worker) = pair_channel(
            registry.clone(),
            identity,
            Arc::new(Allow),
            adapter,
            Arc::new(PairedObservers::new()),
        );
        let worker_handle = tokio::spawn(worker.run());

        let queued = browse_and_enqueue(&dns, &queue).await.unwrap();
        assert_eq!(queued, 1);
        assert_eq!(dns.browsed.lock().as_slice(), [BROWSE_SERVICE.to_owned()]);

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(peer).unwrap().addr, PEER_ADDR);

        worker_handle.abort();
    }
}

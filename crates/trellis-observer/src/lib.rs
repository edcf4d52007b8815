//! Subscription engine: remote peers observing local URIs
//!
//! Peers register by sending a PUT with an Observe option to the resource
//! they want to watch; the request body carries their canonical name. Each
//! registration lands in the bounded [`SubscriberTable`]. When local state
//! changes, [`ObserverEngine::notify`] fans a `token || payload` frame out to
//! every matching subscriber over the `subscribed_uris` path.
//!
//! Delivery is fire-and-forget confirmable PUTs; there is no per-subscriber
//! confirmation, and the table is not persisted (peers re-subscribe after a
//! reboot).

pub mod table;

pub use table::{SubscribeOutcome, SubscriberRow, SubscriberTable, UpdateMask, UriSubscription};

use std::net::Ipv6Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use trellis_coap::uri::SUBSCRIBED_URIS;
use trellis_coap::{CoapAdapter, CoapRequest, NotifyFrame, ObserveAction, Token, UriIndex};
use trellis_common::{NAME_FULL_MAX, TrellisError};

/// How an inbound request relates to the subscription machinery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// No Observe option: the request is a plain write, not a subscribe.
    NotSubRequest,
    /// Observe register/refresh processed.
    Subscribed(SubscribeOutcome),
    /// Observe deregister processed.
    Unsubscribed,
}

/// The engine: subscriber table plus the transport used for fan-out.
pub struct ObserverEngine {
    table: RwLock<SubscriberTable>,
    adapter: CoapAdapter,
}

impl ObserverEngine {
    pub fn new(adapter: CoapAdapter) -> Arc<Self> {
        Arc::new(ObserverEngine {
            table: RwLock::new(SubscriberTable::new()),
            adapter,
        })
    }

    /// Register or refresh a subscription directly.
    pub fn subscribe(
        &self,
        name: &str,
        addr: Ipv6Addr,
        uri: UriIndex,
        token: Token,
    ) -> Result<SubscribeOutcome, TrellisError> {
        let outcome = self.table.write().subscribe(name, addr, uri, token)?;
        debug!("observer: subscribe {name} uri {uri:?} -> {outcome:?}");
        Ok(outcome)
    }

    pub fn unsubscribe(&self, name: &str, token: Token) -> Result<(), TrellisError> {
        self.table.write().unsubscribe(name, token)?;
        debug!("observer: unsubscribed {name}");
        Ok(())
    }

    /// Interpret an inbound request against the Observe option. The request
    /// body is the sender's canonical name for register and deregister.
    pub fn subscribe_from_request(
        &self,
        request: &CoapRequest,
        uri: UriIndex,
    ) -> Result<SubscriptionEvent, TrellisError> {
        if request.observe.is_none() {
            return Ok(SubscriptionEvent::NotSubRequest);
        }

        let name = std::str::from_utf8(&request.payload)
            .map_err(|_| TrellisError::invalid_argument("subscriber name not utf-8"))?;
        if name.is_empty() || name.len() > NAME_FULL_MAX {
            return Err(TrellisError::invalid_argument("subscriber name length"));
        }

        match request.observe_action() {
            Some(ObserveAction::Register) | Some(ObserveAction::Refresh) => {
                let outcome = self.subscribe(name, request.source, uri, request.token)?;
                Ok(SubscriptionEvent::Subscribed(outcome))
            }
            Some(ObserveAction::Deregister) => {
                self.unsubscribe(name, request.token)?;
                Ok(SubscriptionEvent::Unsubscribed)
            }
            None => Err(TrellisError::invalid_argument("unknown observe value")),
        }
    }

    /// Fan a state change out to every subscriber of `uri`, excluding the
    /// originator so it does not receive its own echo. Returns how many
    /// notifications were sent.
    pub async fn notify(
        &self,
        excluded: Option<Ipv6Addr>,
        uri: UriIndex,
        payload: &[u8],
    ) -> Result<usize, TrellisError> {
        if uri == UriIndex::None {
            return Err(TrellisError::invalid_argument("notify needs a URI index"));
        }

        // snapshot under the read lock; sends happen outside it
        let recipients = self.table.read().recipients(uri, excluded);

        let mut notified = 0;
        for (addr, token) in recipients {
            let frame = NotifyFrame::new(token, payload.to_vec())?;
            if let Err(err) = self
                .adapter
                .send_put_bytes(addr, SUBSCRIBED_URIS, &frame.encode())
                .await
            {
                // transport owns retries; a refused send is logged and dropped
                warn!("observer: notify {addr} failed: {err}");
            }
            notified += 1;
        }
        Ok(notified)
    }

    /// Split an inbound `subscribed_uris` body into token and payload.
    pub fn parse_notify(body: &[u8]) -> Result<NotifyFrame, TrellisError> {
        NotifyFrame::parse(body)
    }

    pub fn subscriber_count(&self) -> usize {
        self.table.read().len()
    }

    /// Snapshot of one subscriber row, mainly for diagnostics and tests.
    pub fn subscriber(&self, name: &str) -> Option<SubscriberRow> {
        self.table.read().row(name).cloned()
    }

    /// Drop every subscription.
    pub fn wipe(&self) {
        self.table.write().wipe();
    }
}

//! Default URI handlers and the request dispatcher
//!
//! Every node serves the four framework URIs (`.well-known/core`,
//! `paring_services`, `subscribed_uris`, and the diagnostics) plus the
//! device's own resources. The host CoAP stack delivers each inbound
//! request to [`Node::handle_request`], which always produces the response
//! to send back.

use tracing::{debug, warn};

use trellis_coap::{
    CoapRequest, CoapResponse, NotifyFrame, ResponseCode, UriDescriptor, UriIndex, catalog,
    transport::read_payload, uri,
};
use trellis_common::{NAME_FULL_MAX, NOTIFY_PAYLOAD_MAX, TOKEN_LEN, TrellisError};
use trellis_observer::SubscriptionEvent;

use crate::node::Node;

const MSG_OK: &[u8] = b"OK";
const MSG_ERROR: &[u8] = b"ERROR";
const MSG_TEST: &[u8] = b"Hello coap !!";

/// Maps request paths onto the closed URI index set. Device paths take the
/// indexes after the framework's own.
pub struct UriRouter {
    device_paths: Vec<String>,
}

impl UriRouter {
    pub fn new(device_uris: &[UriDescriptor]) -> Result<Self, TrellisError> {
        let mut device_paths = Vec::with_capacity(device_uris.len());
        for descriptor in device_uris {
            if descriptor.path == uri::WELL_KNOWN_CORE
                || descriptor.path == uri::PARING_SERVICES
                || descriptor.path == uri::SUBSCRIBED_URIS
                || descriptor.path == uri::TEST
                || descriptor.path == uri::TEST_LED
            {
                return Err(TrellisError::Conflict(format!(
                    "device path {} shadows a framework URI",
                    descriptor.path
                )));
            }
            if device_paths.contains(&descriptor.path) {
                return Err(TrellisError::Conflict(format!(
                    "duplicate device path {}",
                    descriptor.path
                )));
            }
            device_paths.push(descriptor.path.clone());
        }
        Ok(UriRouter { device_paths })
    }

    pub fn index_of(&self, path: &str) -> UriIndex {
        match path {
            uri::WELL_KNOWN_CORE => UriIndex::WellKnownCore,
            uri::PARING_SERVICES => UriIndex::ParingServices,
            uri::SUBSCRIBED_URIS => UriIndex::SubscribedUris,
            uri::TEST => UriIndex::Test,
            uri::TEST_LED => UriIndex::TestLed,
            _ => self
                .device_paths
                .iter()
                .position(|candidate| candidate == path)
                .and_then(UriIndex::device)
                .unwrap_or(UriIndex::None),
        }
    }
}

/// Error body per the framework convention: ACK with content, so the peer
/// can tell a handler rejection from transport loss.
fn error_response() -> CoapResponse {
    CoapResponse::new(ResponseCode::Content, MSG_ERROR)
}

impl Node {
    /// Dispatch one inbound request. Always returns the response the stack
    /// should send.
    pub async fn handle_request(&self, request: &CoapRequest) -> CoapResponse {
        match self.router.index_of(&request.path) {
            UriIndex::None => {
                debug!("request for unknown path {}", request.path);
                CoapResponse::new(ResponseCode::BadRequest, MSG_ERROR)
            }
            UriIndex::WellKnownCore => self.handle_well_known(request),
            UriIndex::ParingServices => self.handle_paring_services(request),
            UriIndex::SubscribedUris => self.handle_subscribed_uris(request),
            UriIndex::Test => CoapResponse::ack(request, MSG_TEST),
            UriIndex::TestLed => self.handle_test_led(request),
            index => self.process_uri_request(request, index).await,
        }
    }

    /// `.well-known/core`: serialized catalog of the device's URI list.
    fn handle_well_known(&self, request: &CoapRequest) -> CoapResponse {
        match catalog::encode(&self.driver().uris.uri_list()) {
            Ok(body) => CoapResponse::ack(request, &body),
            Err(err) => {
                warn!("catalog encode failed: {err}");
                error_response()
            }
        }
    }

    /// `paring_services`: body is the sender's canonical name; queue it for
    /// admission with the sender's address.
    fn handle_paring_services(&self, request: &CoapRequest) -> CoapResponse {
        let payload = match read_payload(request, NAME_FULL_MAX) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("paring_services rejected: {err}");
                return error_response();
            }
        };
        let Ok(name) = std::str::from_utf8(&payload) else {
            return error_response();
        };

        debug!("pairing request from {} ({name})", request.source);
        if self.pair_queue().check_and_add(name, request.source).is_err() {
            return error_response();
        }
        CoapResponse::ack(request, b"")
    }

    /// `subscribed_uris`: a notification for a subscription this node holds
    /// on a peer. The token selects the peer URI slot; small payloads are
    /// cached there as the last known state.
    fn handle_subscribed_uris(&self, request: &CoapRequest) -> CoapResponse {
        let payload = match read_payload(request, TOKEN_LEN + NOTIFY_PAYLOAD_MAX) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("subscribed_uris rejected: {err}");
                return error_response();
            }
        };
        let frame = match NotifyFrame::parse(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("subscribed_uris frame invalid: {err}");
                return error_response();
            }
        };

        if let Some(state) = small_state(&frame.payload) {
            // unknown tokens are stale subscriptions, not errors
            if self.registry().set_state_by_token(frame.token, state).is_err() {
                debug!("notification token {} has no URI slot", frame.token);
            }
        }

        self.driver().subscribed.on_subscription_update(&frame);
        CoapResponse::ack(request, b"")
    }

    fn handle_test_led(&self, request: &CoapRequest) -> CoapResponse {
        match read_payload(request, NOTIFY_PAYLOAD_MAX) {
            Ok(payload) => {
                debug!("test/led payload: {} bytes", payload.len());
                CoapResponse::ack(request, b"")
            }
            Err(_) => error_response(),
        }
    }

    /// Dispatcher for the device's observable URIs: either a subscription
    /// request (handled against the subscriber table) or a plain write that
    /// is applied to the hardware and fanned out to the other subscribers.
    pub(crate) async fn process_uri_request(
        &self,
        request: &CoapRequest,
        index: UriIndex,
    ) -> CoapResponse {
        let payload = match read_payload(request, NOTIFY_PAYLOAD_MAX) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("request on {:?} rejected: {err}", index);
                return error_response();
            }
        };

        match self.observer().subscribe_from_request(request, index) {
            Ok(SubscriptionEvent::NotSubRequest) => {
                if let Some(slot) = index.device_slot() {
                    self.driver().uris.handle_write(slot, &payload);
                }
                // the originator is excluded so it never hears its own echo
                match self
                    .observer()
                    .notify(Some(request.source), index, &payload)
                    .await
                {
                    Ok(count) => debug!("fanned {:?} out to {count} subscribers", index),
                    Err(err) => warn!("fan-out on {:?} failed: {err}", index),
                }
                CoapResponse::ack(request, MSG_OK)
            }
            Ok(SubscriptionEvent::Subscribed(outcome)) => {
                debug!("subscription on {:?}: {outcome:?}", index);
                CoapResponse::ack(request, MSG_OK)
            }
            Ok(SubscriptionEvent::Unsubscribed) => CoapResponse::ack(request, MSG_OK),
            Err(err) => {
                warn!("subscription handling on {:?} failed: {err}", index);
                error_response()
            }
        }
    }
}

/// Interpret payloads of up to four bytes as a little-endian state word.
fn small_state(payload: &[u8]) -> Option<u32> {
    if payload.is_empty() || payload.len() > 4 {
        return None;
    }
    let mut word = [0u8; 4];
    word[..payload.len()].copy_from_slice(payload);
    Some(u32::from_le_bytes(word))
}

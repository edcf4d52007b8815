//! Transport seam and typed send helpers
//!
//! [`CoapTransport`] is the contract the host CoAP stack satisfies: deliver
//! one confirmable request and hand back the peer's response. Everything the
//! framework sends goes through the [`CoapAdapter`] helpers, which attach
//! tokens and observe options consistently.

use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use trellis_common::TrellisError;

use crate::message::{CoapRequest, CoapResponse, ObserveAction, Token};

/// The external CoAP stack. Implementations own retransmission, timeout,
/// and port binding; a failed exchange surfaces as a transport error.
#[async_trait]
pub trait CoapTransport: Send + Sync {
    async fn request(
        &self,
        peer: Ipv6Addr,
        request: CoapRequest,
    ) -> Result<CoapResponse, TrellisError>;
}

/// Typed send operations over a shared transport.
#[derive(Clone)]
pub struct CoapAdapter {
    transport: Arc<dyn CoapTransport>,
    /// Local address stamped into outgoing requests as the source. Shared
    /// across clones so an address change reaches every sender.
    local: Arc<parking_lot::RwLock<Ipv6Addr>>,
}

impl CoapAdapter {
    pub fn new(transport: Arc<dyn CoapTransport>, local: Ipv6Addr) -> Self {
        CoapAdapter {
            transport,
            local: Arc::new(parking_lot::RwLock::new(local)),
        }
    }

    pub fn local_addr(&self) -> Ipv6Addr {
        *self.local.read()
    }

    pub fn set_local_addr(&self, local: Ipv6Addr) {
        *self.local.write() = local;
    }

    /// Confirmable PUT with a verbatim payload.
    pub async fn send_put_bytes(
        &self,
        peer: Ipv6Addr,
        path: &str,
        payload: &[u8],
    ) -> Result<CoapResponse, TrellisError> {
        let request = CoapRequest::put(path, Bytes::copy_from_slice(payload), self.local_addr());
        debug!("coap: PUT {path} -> {peer}");
        self.transport.request(peer, request).await
    }

    /// Confirmable GET.
    pub async fn send_get_bytes(
        &self,
        peer: Ipv6Addr,
        path: &str,
    ) -> Result<CoapResponse, TrellisError> {
        let request = CoapRequest::get(path, self.local_addr());
        debug!("coap: GET {path} -> {peer}");
        self.transport.request(peer, request).await
    }

    /// Subscribe to a peer resource: fresh token, observe register option,
    /// local canonical name as the announce payload. Returns the token the
    /// subscription is bound to.
    pub async fn send_subscribe(
        &self,
        peer: Ipv6Addr,
        path: &str,
        announce: &[u8],
    ) -> Result<(Token, CoapResponse), TrellisError> {
        let token = Token::generate();
        let request = CoapRequest::put(path, Bytes::copy_from_slice(announce), self.local_addr())
            .with_token(token)
            .with_observe(ObserveAction::Register);
        debug!("coap: SUBSCRIBE {path} -> {peer} token {token}");
        let response = self.transport.request(peer, request).await?;
        Ok((token, response))
    }

    /// Refresh an existing subscription after an address change, reusing the
    /// token it was established with.
    pub async fn send_subscribe_update(
        &self,
        peer: Ipv6Addr,
        path: &str,
        token: Token,
        announce: &[u8],
    ) -> Result<CoapResponse, TrellisError> {
        if !token.is_valid() {
            return Err(TrellisError::invalid_argument(
                "subscription refresh needs the original token",
            ));
        }
        let request = CoapRequest::put(path, Bytes::copy_from_slice(announce), self.local_addr())
            .with_token(token)
            .with_observe(ObserveAction::Refresh);
        debug!("coap: SUBSCRIBE-REFRESH {path} -> {peer} token {token}");
        self.transport.request(peer, request).await
    }

    /// Cancel a subscription on the peer side.
    pub async fn send_unsubscribe(
        &self,
        peer: Ipv6Addr,
        path: &str,
        token: Token,
        announce: &[u8],
    ) -> Result<CoapResponse, TrellisError> {
        let request = CoapRequest::put(path, Bytes::copy_from_slice(announce), self.local_addr())
            .with_token(token)
            .with_observe(ObserveAction::Deregister);
        self.transport.request(peer, request).await
    }
}

/// Copy a request body out, bounded by `max`. Fails on an empty body and on
/// one larger than the caller can take.
pub fn read_payload(request: &CoapRequest, max: usize) -> Result<Bytes, TrellisError> {
    if request.payload.is_empty() {
        return Err(TrellisError::invalid_argument("request body empty"));
    }
    if request.payload.len() > max {
        return Err(TrellisError::invalid_argument(format!(
            "request body {} exceeds buffer {max}",
            request.payload.len()
        )));
    }
    Ok(request.payload.clone())
}

/// Test and simulation transports.
pub mod testing {
    use super::*;

    use parking_lot::Mutex;

    /// Records every outgoing request and answers from a programmable
    /// queue; defaults to a plain ACK when the queue is empty.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(Ipv6Addr, CoapRequest)>>,
        replies: Mutex<Vec<Result<CoapResponse, TrellisError>>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the reply for the next request (FIFO).
        pub fn push_reply(&self, reply: Result<CoapResponse, TrellisError>) {
            self.replies.lock().push(reply);
        }

        pub fn sent(&self) -> Vec<(Ipv6Addr, CoapRequest)> {
            self.sent.lock().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    #[async_trait]
    impl CoapTransport for RecordingTransport {
        async fn request(
            &self,
            peer: Ipv6Addr,
            request: CoapRequest,
        ) -> Result<CoapResponse, TrellisError> {
            let reply = {
                let mut replies = self.replies.lock();
                if replies.is_empty() {
                    Ok(CoapResponse::ack(&request, b""))
                } else {
                    replies.remove(0)
                }
            };
            self.sent.lock().push((peer, request));
            reply
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use crate::message::Method;

    const PEER: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);
    const LOCAL: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 7);

    fn adapter() -> (Arc<RecordingTransport>, CoapAdapter) {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = CoapAdapter::new(transport.clone(), LOCAL);
        (transport, adapter)
    }

    #[tokio::test]
    async fn test_put_carries_payload_verbatim() {
        let (transport, adapter) = adapter();
        adapter.send_put_bytes(PEER, "test/led", b"LED_ON").await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let (peer, request) = &sent[0];
        assert_eq!(*peer, PEER);
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.path, "test/led");
        assert_eq!(&request.payload[..], b"LED_ON");
        assert_eq!(request.observe, None);
    }

    #[tokio::test]
    async fn test_subscribe_generates_token_and_observe() {
        let (transport, adapter) = adapter();
        let (token, _response) = adapter
            .send_subscribe(PEER, "light/on_off", b"kitchen_2_588c81fffe301ea4")
            .await
            .unwrap();

        assert!(token.is_valid());
        let sent = transport.sent();
        let request = &sent[0].1;
        assert_eq!(request.token, token);
        assert_eq!(request.observe, Some(0));
        assert_eq!(&request.payload[..], b"kitchen_2_588c81fffe301ea4");
    }

    #[tokio::test]
    async fn test_subscribe_update_reuses_token() {
        let (transport, adapter) = adapter();
        let token = Token([0xFA, 0x04, 0xB6, 0xD1]);
        adapter
            .send_subscribe_update(PEER, "light/on_off", token, b"")
            .await
            .unwrap();

        let request = &transport.sent()[0].1;
        assert_eq!(request.token, token);
        assert_eq!(request.observe, Some(2));

        assert!(
            adapter
                .send_subscribe_update(PEER, "light/on_off", Token::EMPTY, b"")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_read_payload_bounds() {
        let empty = CoapRequest::put("x", Bytes::new(), PEER);
        assert!(read_payload(&empty, 16).is_err());

        let request = CoapRequest::put("x", &b"12345"[..], PEER);
        assert_eq!(&read_payload(&request, 16).unwrap()[..], b"12345");
        assert!(read_payload(&request, 4).is_err());
    }
}

//! Request/response model shared with the transport seam

use std::net::Ipv6Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use trellis_common::TOKEN_LEN;

/// Opaque 4-byte observe token. All zeros means "no token" and is never a
/// valid subscription token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub [u8; TOKEN_LEN]);

impl Token {
    pub const EMPTY: Token = Token([0; TOKEN_LEN]);

    /// Freshly generated non-zero token.
    pub fn generate() -> Token {
        loop {
            let token = Token(rand::random());
            if token.is_valid() {
                return token;
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0; TOKEN_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
}

/// Response codes the framework emits. GET replies carry `Content`, PUT
/// replies carry `Changed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Content,
    Changed,
    BadRequest,
}

/// CoAP observe option values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserveAction {
    Register,
    Deregister,
    Refresh,
}

impl ObserveAction {
    pub fn value(self) -> u32 {
        match self {
            ObserveAction::Register => 0,
            ObserveAction::Deregister => 1,
            ObserveAction::Refresh => 2,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(ObserveAction::Register),
            1 => Some(ObserveAction::Deregister),
            2 => Some(ObserveAction::Refresh),
            _ => None,
        }
    }
}

/// One confirmable request as seen by the application layer.
#[derive(Clone, Debug)]
pub struct CoapRequest {
    pub method: Method,
    pub path: String,
    pub token: Token,
    /// Raw observe option value, when the option is present.
    pub observe: Option<u32>,
    pub payload: Bytes,
    /// Sender address, used for subscriber bookkeeping and echo exclusion.
    pub source: Ipv6Addr,
}

impl CoapRequest {
    pub fn get(path: impl Into<String>, source: Ipv6Addr) -> Self {
        CoapRequest {
            method: Method::Get,
            path: path.into(),
            token: Token::generate(),
            observe: None,
            payload: Bytes::new(),
            source,
        }
    }

    pub fn put(path: impl Into<String>, payload: impl Into<Bytes>, source: Ipv6Addr) -> Self {
        CoapRequest {
            method: Method::Put,
            path: path.into(),
            token: Token::generate(),
            observe: None,
            payload: payload.into(),
            source,
        }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    pub fn with_observe(mut self, action: ObserveAction) -> Self {
        self.observe = Some(action.value());
        self
    }

    /// The observe option decoded, if present and within the known range.
    pub fn observe_action(&self) -> Option<ObserveAction> {
        self.observe.and_then(ObserveAction::from_value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapResponse {
    pub code: ResponseCode,
    pub payload: Bytes,
}

impl CoapResponse {
    pub fn new(code: ResponseCode, payload: impl Into<Bytes>) -> Self {
        CoapResponse {
            code,
            payload: payload.into(),
        }
    }

    /// ACK for `request` carrying `body`: `Content` answers a GET, `Changed`
    /// answers a PUT. The payload is attached only when non-empty.
    pub fn ack(request: &CoapRequest, body: &[u8]) -> Self {
        let code = match request.method {
            Method::Get => ResponseCode::Content,
            Method::Put => ResponseCode::Changed,
        };
        let payload = if body.is_empty() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(body)
        };
        CoapResponse { code, payload }
    }
}

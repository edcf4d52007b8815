//! Subscribed-update frame: `token[4] || payload[<=256]`

use bytes::Bytes;

use trellis_common::{NOTIFY_PAYLOAD_MAX, TOKEN_LEN, TrellisError};

use crate::message::Token;

/// A notification as carried on the `subscribed_uris` path. The token is the
/// exact token the subscriber was handed out at registration; it selects the
/// matching URI slot on the receiving side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyFrame {
    pub token: Token,
    pub payload: Bytes,
}

impl NotifyFrame {
    pub fn new(token: Token, payload: impl Into<Bytes>) -> Result<Self, TrellisError> {
        let payload = payload.into();
        if !token.is_valid() {
            return Err(TrellisError::invalid_argument("notify frame needs a token"));
        }
        if payload.len() > NOTIFY_PAYLOAD_MAX {
            return Err(TrellisError::invalid_argument(format!(
                "notify payload {} exceeds {NOTIFY_PAYLOAD_MAX}",
                payload.len()
            )));
        }
        Ok(NotifyFrame { token, payload })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(TOKEN_LEN + self.payload.len());
        out.extend_from_slice(self.token.as_bytes());
        out.extend_from_slice(&self.payload);
        out.into()
    }

    /// Split the leading token off an inbound frame body.
    pub fn parse(body: &[u8]) -> Result<Self, TrellisError> {
        if body.len() < TOKEN_LEN {
            return Err(TrellisError::invalid_argument("notify frame truncated"));
        }
        if body.len() > TOKEN_LEN + NOTIFY_PAYLOAD_MAX {
            return Err(TrellisError::invalid_argument("notify frame oversized"));
        }

        let mut token = [0u8; TOKEN_LEN];
        token.copy_from_slice(&body[..TOKEN_LEN]);
        NotifyFrame::new(Token(token), Bytes::copy_from_slice(&body[TOKEN_LEN..]))
    }
}

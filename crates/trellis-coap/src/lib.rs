//! Typed CoAP surface for Trellis
//!
//! The CoAP stack itself is an external collaborator reached through the
//! [`CoapTransport`] trait; this crate supplies everything above it:
//! - The request/response model with observe options and 4-byte tokens
//! - The typed send helpers (PUT/GET, subscribe, subscribe refresh)
//! - The packed wire codecs: resource-catalog records and notify frames
//!
//! All messages are confirmable at the transport level; retransmission and
//! timeout are the stack's responsibility.

pub mod catalog;
pub mod frame;
pub mod message;
pub mod transport;
pub mod uri;

pub use catalog::UriDescriptor;
pub use frame::NotifyFrame;
pub use message::{CoapRequest, CoapResponse, Method, ObserveAction, ResponseCode, Token};
pub use transport::{CoapAdapter, CoapTransport};
pub use uri::UriIndex;

//! Trellis node framework
//!
//! Ties the Trellis components into a running mesh node:
//! - [`DeviceDriver`]: the capability surface a concrete device implements
//! - [`Node`]: the framework root owning identity, tables, and workers
//! - SRP registration with lease keep-alive, DNS-SD discovery, and the
//!   default URI handlers
//!
//! The protocol stacks themselves (CoAP, DNS, SRP) and the flash device are
//! injected behind traits; see [`Platform`].

pub mod dns;
pub mod driver;
pub mod node;
pub mod srp;
pub mod uris;

pub use dns::{BROWSE_SERVICE, DnsBrowser};
pub use driver::{DeviceDriver, SubscribedObserver, UriProvider};
pub use node::{Node, Platform, RadioEvent};
pub use srp::{SrpClient, SrpLifecycle, SrpService, SrpState};
pub use uris::UriRouter;

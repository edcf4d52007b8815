//! The device driver: what a concrete device plugs into the framework
//!
//! Hardware behaviour stays outside the framework. A device supplies small
//! capability implementations (its URI list and write handler, its pairing
//! policy, its reaction to paired peers and inbound notifications) and the
//! framework wires them into the pairing, observer, and URI machinery.

use std::sync::Arc;

use trellis_coap::{NotifyFrame, UriDescriptor};
use trellis_common::{DeviceType, PEER_URIS_MAX, TrellisError};
use trellis_pair::{PairPolicy, PairedObserver};

/// The device's resource surface: which URIs it exposes and how a write to
/// one of them reaches the hardware.
pub trait UriProvider: Send + Sync {
    /// Up to three descriptors; the order fixes the device URI indexes.
    fn uri_list(&self) -> Vec<UriDescriptor>;

    /// Apply a validated write to the nth device URI.
    fn handle_write(&self, slot: usize, payload: &[u8]);
}

/// Listener for notifications arriving on `subscribed_uris`, i.e. state
/// changes of peer resources this node subscribed to.
pub trait SubscribedObserver: Send + Sync {
    fn on_subscription_update(&self, frame: &NotifyFrame);
}

/// Everything a device hands the framework at startup. One instance per
/// process; the framework keeps it for its whole lifetime.
#[derive(Clone)]
pub struct DeviceDriver {
    pub device_type: DeviceType,
    pub policy: Arc<dyn PairPolicy>,
    pub uris: Arc<dyn UriProvider>,
    pub paired: Arc<dyn PairedObserver>,
    pub subscribed: Arc<dyn SubscribedObserver>,
    /// Optional hook the host loop may call periodically for device
    /// housekeeping. Must not block.
    pub periodic: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl DeviceDriver {
    /// Validate the driver's URI surface once, at registration time.
    pub fn validated(self) -> Result<Self, TrellisError> {
        let uris = self.uris.uri_list();
        if uris.is_empty() || uris.len() > PEER_URIS_MAX {
            return Err(TrellisError::invalid_argument(format!(
                "device exposes {} URIs, expected 1..={PEER_URIS_MAX}",
                uris.len()
            )));
        }
        if self.device_type == DeviceType::None {
            return Err(TrellisError::invalid_argument("device type missing"));
        }
        Ok(self)
    }
}

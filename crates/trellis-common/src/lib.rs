//! Trellis Common - shared types and limits
//!
//! This crate provides the foundational pieces used across all Trellis
//! components:
//! - The closed device-type set
//! - Error kinds shared by the framework crates
//! - Table capacities and wire-format limits

pub mod device_type;
pub mod error;

// Re-exports for convenience
pub use device_type::DeviceType;
pub use error::TrellisError;

/// Default CoAP port (RFC 7252).
pub const COAP_PORT: u16 = 5683;

/// Maximum canonical device name length in bytes, excluding the terminator.
pub const NAME_FULL_MAX: usize = 31;

/// Maximum group label length in bytes.
pub const GROUP_MAX: usize = 9;

/// Length of the EUI-64 rendered as lowercase hex digits.
pub const EUI_HEX_LEN: usize = 16;

/// Maximum length of a domain-suffixed DNS name.
pub const DNS_NAME_MAX: usize = 63;

/// Capacity of the paired-device table.
pub const PEERS_MAX: usize = 10;

/// URI slots per paired device.
pub const PEER_URIS_MAX: usize = 3;

/// Capacity of the subscriber table.
pub const SUBSCRIBERS_MAX: usize = 20;

/// URI-subscription slots per subscriber row.
pub const SUB_URIS_MAX: usize = 3;

/// Maximum URI path length. The on-wire catalog field is one byte longer
/// (NUL padding).
pub const URI_PATH_MAX: usize = 23;

/// Observe token length in bytes.
pub const TOKEN_LEN: usize = 4;

/// Maximum payload carried inside a subscribed-update frame.
pub const NOTIFY_PAYLOAD_MAX: usize = 256;

/// Maximum entries in an admission rule list.
pub const PAIR_RULES_MAX: usize = 10;

/// Depth of the pair-worker queue.
pub const PAIR_QUEUE_DEPTH: usize = 10;

/// Maximum registered paired-device listeners.
pub const PAIRED_OBSERVERS_MAX: usize = 10;

/// Settings key space reserved for the host network stack.
pub const SETTINGS_KEYS_HOST: std::ops::RangeInclusive<u16> = 0x0001..=0x000E;

/// Settings key space reserved for the application framework.
pub const SETTINGS_KEYS_APP: std::ops::RangeInclusive<u16> = 0x0100..=0x010A;

/// Settings key space reserved for vendors.
pub const SETTINGS_KEYS_VENDOR: std::ops::RangeInclusive<u16> = 0x8000..=0xFFFF;

//! Canonical device identity for Trellis nodes
//!
//! Every node carries a canonical name of the form
//! `<group>_<typeTag>_<eui64hex>`, for example
//! `kitchen_2_588c81fffe301ea4`. The group is an administrator-chosen label
//! shared by devices that may pair with each other; the type tag is a numeric
//! [`DeviceType`]; the tail is the radio's EUI-64 as 16 lowercase hex digits.
//!
//! DNS queries use the domain-suffixed form
//! `<canonical>.default.service.arpa.`; everything else uses the bare
//! canonical name.

use serde::{Deserialize, Serialize};

use trellis_common::{DNS_NAME_MAX, DeviceType, EUI_HEX_LEN, GROUP_MAX, NAME_FULL_MAX};

/// Domain suffix appended for DNS service browsing and host registration.
pub const DOMAIN_SUFFIX: &str = ".default.service.arpa.";

/// Shortest possible canonical name: one-byte group, one-digit type, EUI.
const NAME_FULL_MIN: usize = 1 + 1 + 1 + 1 + EUI_HEX_LEN;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name or group too long")]
    TooLong,

    #[error("name too short")]
    TooShort,

    #[error("domain-suffixed name exceeds {DNS_NAME_MAX} bytes")]
    BufferTooSmall,

    #[error("device type not usable in a name")]
    BadType,

    #[error("malformed canonical name")]
    Malformed,
}

/// The local node's identity, composed once at startup from the configured
/// group, the device type, and the EUI-64 read from the radio.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    group: String,
    device_type: DeviceType,
    full: String,
}

impl LocalIdentity {
    /// Compose the canonical name. The group must be 1..=9 ASCII bytes and
    /// must not contain `_`; the type must not be [`DeviceType::None`].
    pub fn new(group: &str, device_type: DeviceType, eui64: [u8; 8]) -> Result<Self, NameError> {
        if device_type == DeviceType::None {
            return Err(NameError::BadType);
        }
        if group.is_empty() {
            return Err(NameError::TooShort);
        }
        if group.len() > GROUP_MAX || !group.is_ascii() {
            return Err(NameError::TooLong);
        }
        if group.contains('_') {
            return Err(NameError::Malformed);
        }

        let mut eui_hex = String::with_capacity(EUI_HEX_LEN);
        for byte in eui64 {
            eui_hex.push_str(&format!("{byte:02x}"));
        }

        let full = format!("{}_{}_{}", group, device_type.tag(), eui_hex);
        debug_assert!(full.len() <= NAME_FULL_MAX);

        Ok(LocalIdentity {
            group: group.to_owned(),
            device_type,
            full,
        })
    }

    /// The full canonical name.
    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Exact comparison against the local canonical name.
    pub fn is_full(&self, name: &str) -> bool {
        name == self.full
    }

    /// Group-prefix comparison, ignoring the type and EUI-64 tail.
    pub fn is_group_prefix(&self, name: &str) -> bool {
        match name.split('_').next() {
            Some(group) => group == self.group,
            None => false,
        }
    }

    /// A peer "matches local" iff it is in the same group but is not this
    /// node itself. Used to filter discovery results before pairing.
    pub fn matches_local(&self, name: &str) -> bool {
        if name.len() > NAME_FULL_MAX || name.len() < NAME_FULL_MIN {
            return false;
        }
        self.is_group_prefix(name) && !self.is_full(name)
    }
}

/// Parse the device type from the second `_`-separated field of a canonical
/// name.
pub fn device_type_of(name: &str) -> Result<DeviceType, NameError> {
    check_bounds(name)?;

    let field = name.split('_').nth(1).ok_or(NameError::Malformed)?;
    let tag: u8 = field.parse().map_err(|_| NameError::Malformed)?;

    match DeviceType::from_tag(tag) {
        Some(DeviceType::None) | None => Err(NameError::BadType),
        Some(ty) => Ok(ty),
    }
}

/// Locate the EUI-64 hex tail after the last `_` of a canonical name.
pub fn eui_of(name: &str) -> Result<&str, NameError> {
    check_bounds(name)?;

    let idx = name.rfind('_').ok_or(NameError::Malformed)?;
    let eui = &name[idx + 1..];

    if eui.len() != EUI_HEX_LEN {
        return Err(NameError::Malformed);
    }
    if !eui.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(NameError::Malformed);
    }

    Ok(eui)
}

/// Compare the EUI-64 tail of a canonical name with a given hex string.
pub fn eui_matches(name: &str, eui_hex: &str) -> Result<bool, NameError> {
    Ok(eui_of(name)? == eui_hex)
}

/// Append the DNS domain suffix: `name.default.service.arpa.`.
pub fn add_domain(name: &str) -> Result<String, NameError> {
    check_bounds(name)?;

    let suffixed = format!("{name}{DOMAIN_SUFFIX}");
    if suffixed.len() > DNS_NAME_MAX {
        return Err(NameError::BufferTooSmall);
    }
    Ok(suffixed)
}

/// Strip a DNS host name back to its first label, the canonical name.
pub fn strip_domain(host: &str) -> Result<&str, NameError> {
    let label = match host.find('.') {
        Some(idx) => &host[..idx],
        None => return Err(NameError::Malformed),
    };
    check_bounds(label)?;
    Ok(label)
}

fn check_bounds(name: &str) -> Result<(), NameError> {
    if name.len() > NAME_FULL_MAX {
        return Err(NameError::TooLong);
    }
    if name.len() < NAME_FULL_MIN {
        return Err(NameError::TooShort);
    }
    Ok(())
}

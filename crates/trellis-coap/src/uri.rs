//! The closed URI index set
//!
//! Every observable resource on a node is addressed by a small numeric
//! index: the four framework URIs occupy the low values, then up to three
//! device-specific URIs, then the diagnostic endpoints. Index 0 is the
//! "no URI" sentinel and never appears in a live subscription slot.

use serde::{Deserialize, Serialize};

use trellis_common::PEER_URIS_MAX;

/// Path of the resource-catalog endpoint.
pub const WELL_KNOWN_CORE: &str = ".well-known/core";

/// Path peers PUT their canonical name to when announcing themselves.
pub const PARING_SERVICES: &str = "paring_services";

/// Path notification frames are PUT to on the subscriber side.
pub const SUBSCRIBED_URIS: &str = "subscribed_uris";

pub const TEST: &str = "test";

pub const TEST_LED: &str = "test/led";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UriIndex {
    #[default]
    None = 0,
    WellKnownCore = 1,
    ParingServices = 2,
    SubscribedUris = 3,
    Device0 = 4,
    Device1 = 5,
    Device2 = 6,
    Test = 7,
    TestLed = 8,
}

/// One past the largest defined index.
pub const URI_INDEX_END: u8 = 9;

impl UriIndex {
    pub fn from_value(value: u8) -> Option<Self> {
        let index = match value {
            0 => UriIndex::None,
            1 => UriIndex::WellKnownCore,
            2 => UriIndex::ParingServices,
            3 => UriIndex::SubscribedUris,
            4 => UriIndex::Device0,
            5 => UriIndex::Device1,
            6 => UriIndex::Device2,
            7 => UriIndex::Test,
            8 => UriIndex::TestLed,
            _ => return None,
        };
        Some(index)
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Index of the nth device-specific URI.
    pub fn device(slot: usize) -> Option<Self> {
        if slot >= PEER_URIS_MAX {
            return None;
        }
        UriIndex::from_value(UriIndex::Device0.value() + slot as u8)
    }

    /// Position in the device URI list, for device-specific indexes.
    pub fn device_slot(self) -> Option<usize> {
        match self {
            UriIndex::Device0 => Some(0),
            UriIndex::Device1 => Some(1),
            UriIndex::Device2 => Some(2),
            _ => None,
        }
    }

    /// Default path for the framework-owned endpoints.
    pub fn default_path(self) -> Option<&'static str> {
        match self {
            UriIndex::WellKnownCore => Some(WELL_KNOWN_CORE),
            UriIndex::ParingServices => Some(PARING_SERVICES),
            UriIndex::SubscribedUris => Some(SUBSCRIBED_URIS),
            UriIndex::Test => Some(TEST),
            UriIndex::TestLed => Some(TEST_LED),
            _ => None,
        }
    }
}

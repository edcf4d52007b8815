//! The paired-device table
//!
//! Peers admitted by the pair worker live here: canonical name, current
//! IPv6 address, and up to three URI slots learned from the peer's resource
//! catalog. A slot with a valid token is a subscription this node holds on
//! the peer; a zero token is a plain catalog entry.
//!
//! Names are unique. Re-adding an existing name resolves to an address
//! update rather than a duplicate row.

use std::net::Ipv6Addr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use trellis_coap::{Token, UriDescriptor};
use trellis_common::{DeviceType, NAME_FULL_MAX, PEER_URIS_MAX, PEERS_MAX, TrellisError};

/// One learned resource on a paired peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUri {
    pub path: String,
    pub function: DeviceType,
    /// Last state reported through a notification, cached for the device
    /// layer.
    pub state: u32,
    /// Subscription token, or [`Token::EMPTY`] for non-observable entries.
    pub token: Token,
}

impl PeerUri {
    pub fn from_descriptor(descriptor: &UriDescriptor, token: Token) -> Self {
        PeerUri {
            path: descriptor.path.clone(),
            function: descriptor.function,
            state: 0,
            token,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.token.is_valid()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub addr: Ipv6Addr,
    pub uris: Vec<PeerUri>,
}

impl Peer {
    /// First URI slot whose function matches, if any.
    pub fn uri_by_function(&self, function: DeviceType) -> Option<usize> {
        self.uris.iter().position(|uri| uri.function == function)
    }
}

/// Result of [`PairRegistry::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// A fresh row was taken; the index addresses it.
    Admitted(usize),
    /// Name was known with a different address; the address was replaced.
    Updated,
    /// Name and address both matched the stored row.
    NoChange,
    /// The table is at capacity.
    NoSpace,
}

/// Process-wide peer table behind a lock. All mutations funnel through the
/// pair worker; request handlers only read.
pub struct PairRegistry {
    peers: RwLock<Vec<Peer>>,
}

impl Default for PairRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PairRegistry {
    pub fn new() -> Self {
        PairRegistry {
            peers: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Admit a peer or reconcile its address. See [`AddOutcome`].
    pub fn add(&self, name: &str, addr: Ipv6Addr) -> Result<AddOutcome, TrellisError> {
        if name.is_empty() || name.len() > NAME_FULL_MAX {
            return Err(TrellisError::invalid_argument("peer name length"));
        }

        let mut peers = self.peers.write();
        if let Some(peer) = peers.iter_mut().find(|peer| peer.name == name) {
            if peer.addr == addr {
                return Ok(AddOutcome::NoChange);
            }
            peer.addr = addr;
            return Ok(AddOutcome::Updated);
        }

        if peers.len() >= PEERS_MAX {
            return Ok(AddOutcome::NoSpace);
        }
        peers.push(Peer {
            name: name.to_owned(),
            addr,
            uris: Vec::new(),
        });
        Ok(AddOutcome::Admitted(peers.len() - 1))
    }

    /// Remove one peer by name; returns the index it occupied.
    pub fn delete(&self, name: &str) -> Result<usize, TrellisError> {
        let mut peers = self.peers.write();
        let index = peers
            .iter()
            .position(|peer| peer.name == name)
            .ok_or(TrellisError::NotFound("peer"))?;
        peers.remove(index);
        Ok(index)
    }

    pub fn wipe(&self) {
        self.peers.write().clear();
    }

    pub fn get(&self, name: &str) -> Option<Peer> {
        self.peers.read().iter().find(|peer| peer.name == name).cloned()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.peers.read().iter().position(|peer| peer.name == name)
    }

    /// Snapshot of the whole table, in slot order.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    /// Install the URI slots learned from a peer's catalog, replacing any
    /// previous set. At most [`PEER_URIS_MAX`] entries are kept.
    pub fn set_uris(&self, name: &str, uris: Vec<PeerUri>) -> Result<(), TrellisError> {
        if uris.len() > PEER_URIS_MAX {
            return Err(TrellisError::invalid_argument(format!(
                "{} catalog entries exceed the {PEER_URIS_MAX}-slot budget",
                uris.len()
            )));
        }
        let mut peers = self.peers.write();
        let peer = peers
            .iter_mut()
            .find(|peer| peer.name == name)
            .ok_or(TrellisError::NotFound("peer"))?;
        peer.uris = uris;
        Ok(())
    }

    /// Find the URI slot a notification token belongs to.
    pub fn uri_by_token(&self, token: Token) -> Option<(String, usize, PeerUri)> {
        if !token.is_valid() {
            return None;
        }
        let peers = self.peers.read();
        for peer in peers.iter() {
            for (slot, uri) in peer.uris.iter().enumerate() {
                if uri.token == token {
                    return Some((peer.name.clone(), slot, uri.clone()));
                }
            }
        }
        None
    }

    /// Cache the state carried by a notification in its URI slot.
    pub fn set_state_by_token(&self, token: Token, state: u32) -> Result<(), TrellisError> {
        if !token.is_valid() {
            return Err(TrellisError::invalid_argument("state update needs a token"));
        }
        let mut peers = self.peers.write();
        for peer in peers.iter_mut() {
            for uri in peer.uris.iter_mut() {
                if uri.token == token {
                    uri.state = state;
                    return Ok(());
                }
            }
        }
        Err(TrellisError::NotFound("token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0xA);
    const ADDR_B: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0xB);
    const NAME: &str = "kitchen_3_aabbccddeeff0011";

    fn light_uri(token: Token) -> PeerUri {
        PeerUri {
            path: "light/on_off".to_owned(),
            function: DeviceType::LightingOnOff,
            state: 0,
            token,
        }
    }

    #[test]
    fn test_add_then_ip_update() {
        let registry = PairRegistry::new();

        assert_eq!(registry.add(NAME, ADDR_A).unwrap(), AddOutcome::Admitted(0));
        // identity collision with a new address resolves to an update
        assert_eq!(registry.add(NAME, ADDR_B).unwrap(), AddOutcome::Updated);
        assert_eq!(registry.add(NAME, ADDR_B).unwrap(), AddOutcome::NoChange);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(NAME).unwrap().addr, ADDR_B);
    }

    #[test]
    fn test_capacity_and_reuse_after_delete() {
        let registry = PairRegistry::new();
        for i in 0..PEERS_MAX {
            let name = format!("kitchen_3_{i:016x}");
            assert!(matches!(
                registry.add(&name, ADDR_A).unwrap(),
                AddOutcome::Admitted(_)
            ));
        }
        // the 11th peer bounces
        assert_eq!(registry.add(NAME, ADDR_A).unwrap(), AddOutcome::NoSpace);

        registry.delete("kitchen_3_0000000000000003").unwrap();
        assert!(matches!(
            registry.add(NAME, ADDR_A).unwrap(),
            AddOutcome::Admitted(_)
        ));
    }

    #[test]
    fn test_name_validation() {
        let registry = PairRegistry::new();
        assert!(registry.add("", ADDR_A).is_err());
        let long = "x".repeat(NAME_FULL_MAX + 1);
        assert!(registry.add(&long, ADDR_A).is_err());
    }

    #[test]
    fn test_token_lookup_and_state() {
        let registry = PairRegistry::new();
        registry.add(NAME, ADDR_A).unwrap();

        let token = Token([0xFA, 0x04, 0xB6, 0xD1]);
        registry
            .set_uris(NAME, vec![light_uri(token)])
            .unwrap();

        let (name, slot, uri) = registry.uri_by_token(token).unwrap();
        assert_eq!(name, NAME);
        assert_eq!(slot, 0);
        assert_eq!(uri.function, DeviceType::LightingOnOff);
        assert!(uri.is_observed());

        registry.set_state_by_token(token, 1).unwrap();
        assert_eq!(registry.get(NAME).unwrap().uris[0].state, 1);

        assert!(registry.uri_by_token(Token::EMPTY).is_none());
        assert!(registry.uri_by_token(Token([9, 9, 9, 9])).is_none());
    }

    #[test]
    fn test_uri_by_function() {
        let registry = PairRegistry::new();
        registry.add(NAME, ADDR_A).unwrap();
        registry
            .set_uris(
                NAME,
                vec![light_uri(Token::EMPTY), PeerUri {
                    path: "light/dimm".to_owned(),
                    function: DeviceType::LightingDimm,
                    state: 0,
                    token: Token::EMPTY,
                }],
            )
            .unwrap();

        let peer = registry.get(NAME).unwrap();
        assert_eq!(peer.uri_by_function(DeviceType::LightingDimm), Some(1));
        assert_eq!(peer.uri_by_function(DeviceType::Alarm), None);
    }

    #[test]
    fn test_set_uris_bounds() {
        let registry = PairRegistry::new();
        registry.add(NAME, ADDR_A).unwrap();

        let too_many = vec![light_uri(Token::EMPTY); PEER_URIS_MAX + 1];
        assert!(registry.set_uris(NAME, too_many).is_err());
        assert!(registry.set_uris("unknown_3_0000000000000000", vec![]).is_err());
    }
}

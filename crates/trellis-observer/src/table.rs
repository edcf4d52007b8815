//! The subscriber table
//!
//! A bounded table of peers that subscribed to local URIs. Rows are keyed by
//! canonical name; each row carries the peer's address and up to three URI
//! subscription slots `{ token, uriIndex }`. `(name, uriIndex)` is unique
//! per row: re-registering updates the address and/or token in place.

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use trellis_coap::{Token, UriIndex};
use trellis_common::{NAME_FULL_MAX, SUB_URIS_MAX, SUBSCRIBERS_MAX, TrellisError};

/// What changed when re-registering an existing subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMask(u8);

impl UpdateMask {
    pub const IP_UPDATED: UpdateMask = UpdateMask(0b001);
    pub const TOKEN_UPDATED: UpdateMask = UpdateMask(0b010);
    pub const URI_ADDED: UpdateMask = UpdateMask(0b100);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: UpdateMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: UpdateMask) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Result of a subscribe call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// No prior row for this name; a row and a first URI slot were taken.
    AddedNewDevice,
    /// Row, address, URI, and token all matched the registration.
    NoChange,
    /// Existing row mutated; the mask says what changed.
    Updated(UpdateMask),
    /// Subscriber table or the row's URI slots are exhausted.
    ListFull,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriSubscription {
    pub uri: UriIndex,
    pub token: Token,
}

#[derive(Clone, Debug)]
pub struct SubscriberRow {
    pub name: String,
    pub addr: Ipv6Addr,
    pub slots: [Option<UriSubscription>; SUB_URIS_MAX],
}

impl SubscriberRow {
    fn new(name: String, addr: Ipv6Addr) -> Self {
        SubscriberRow {
            name,
            addr,
            slots: std::array::from_fn(|_| None),
        }
    }

    fn slot_for(&self, uri: UriIndex) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.uri == uri))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn live_slots(&self) -> impl Iterator<Item = &UriSubscription> {
        self.slots.iter().flatten()
    }
}

#[derive(Default)]
pub struct SubscriberTable {
    rows: Vec<SubscriberRow>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        SubscriberTable { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, name: &str) -> Option<&SubscriberRow> {
        self.rows.iter().find(|row| row.name == name)
    }

    /// Register or refresh a subscription. See [`SubscribeOutcome`].
    pub fn subscribe(
        &mut self,
        name: &str,
        addr: Ipv6Addr,
        uri: UriIndex,
        token: Token,
    ) -> Result<SubscribeOutcome, TrellisError> {
        validate_registration(name, addr, uri, token)?;

        let Some(row) = self.rows.iter_mut().find(|row| row.name == name) else {
            // new subscriber: row plus first URI slot, taken together
            if self.rows.len() >= SUBSCRIBERS_MAX {
                return Ok(SubscribeOutcome::ListFull);
            }
            let mut row = SubscriberRow::new(name.to_owned(), addr);
            row.slots[0] = Some(UriSubscription { uri, token });
            self.rows.push(row);
            return Ok(SubscribeOutcome::AddedNewDevice);
        };

        let mut mask = UpdateMask::default();
        if row.addr != addr {
            row.addr = addr;
            mask.insert(UpdateMask::IP_UPDATED);
        }

        match row.slot_for(uri) {
            Some(slot) => {
                if let Some(existing) = row.slots[slot].as_mut()
                    && existing.token != token
                {
                    existing.token = token;
                    mask.insert(UpdateMask::TOKEN_UPDATED);
                }
            }
            None => match row.free_slot() {
                Some(slot) => {
                    row.slots[slot] = Some(UriSubscription { uri, token });
                    mask.insert(UpdateMask::URI_ADDED);
                }
                None => return Ok(SubscribeOutcome::ListFull),
            },
        }

        if mask.is_empty() {
            Ok(SubscribeOutcome::NoChange)
        } else {
            Ok(SubscribeOutcome::Updated(mask))
        }
    }

    /// Clear the URI slot carrying `token`; drop the row once its last slot
    /// is gone.
    pub fn unsubscribe(&mut self, name: &str, token: Token) -> Result<(), TrellisError> {
        let row_index = self
            .rows
            .iter()
            .position(|row| row.name == name)
            .ok_or(TrellisError::NotFound("subscriber"))?;

        let row = &mut self.rows[row_index];
        let slot = row
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.token == token))
            .ok_or(TrellisError::NotFound("token"))?;

        row.slots[slot] = None;
        if row.live_slots().next().is_none() {
            self.rows.swap_remove(row_index);
        }
        Ok(())
    }

    /// Subscriptions interested in `uri`, excluding `excluded` when given.
    pub fn recipients(
        &self,
        uri: UriIndex,
        excluded: Option<Ipv6Addr>,
    ) -> Vec<(Ipv6Addr, Token)> {
        let mut out = Vec::new();
        for row in &self.rows {
            if excluded == Some(row.addr) {
                continue;
            }
            for sub in row.live_slots() {
                if sub.uri == uri {
                    out.push((row.addr, sub.token));
                }
            }
        }
        out
    }

    pub fn wipe(&mut self) {
        self.rows.clear();
    }
}

fn validate_registration(
    name: &str,
    addr: Ipv6Addr,
    uri: UriIndex,
    token: Token,
) -> Result<(), TrellisError> {
    if name.is_empty() || name.len() > NAME_FULL_MAX {
        return Err(TrellisError::invalid_argument("subscriber name length"));
    }
    if uri == UriIndex::None {
        return Err(TrellisError::invalid_argument("subscription needs a URI index"));
    }
    if !token.is_valid() {
        return Err(TrellisError::invalid_argument("subscription needs a token"));
    }
    if addr == Ipv6Addr::UNSPECIFIED {
        return Err(TrellisError::invalid_argument("subscriber address unspecified"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_2: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);
    const ADDR_3: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 3);
    const TOKEN: Token = Token([0xFA, 0x04, 0xB6, 0xD1]);
    const NAME: &str = "kitchen_3_aabbccddeeff0011";

    #[test]
    fn test_subscribe_then_identical_resubscribe() {
        let mut table = SubscriberTable::new();
        assert_eq!(
            table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap(),
            SubscribeOutcome::AddedNewDevice
        );
        assert_eq!(
            table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap(),
            SubscribeOutcome::NoChange
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_token_update() {
        let mut table = SubscriberTable::new();
        table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap();

        let fresh = Token([1, 2, 3, 4]);
        let outcome = table.subscribe(NAME, ADDR_2, UriIndex::Device0, fresh).unwrap();
        let SubscribeOutcome::Updated(mask) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert!(mask.contains(UpdateMask::TOKEN_UPDATED));
        assert!(!mask.contains(UpdateMask::IP_UPDATED));

        let row = table.row(NAME).unwrap();
        assert_eq!(row.slots[0].as_ref().unwrap().token, fresh);
    }

    #[test]
    fn test_ip_update_and_uri_added_combine() {
        let mut table = SubscriberTable::new();
        table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap();

        let outcome = table
            .subscribe(NAME, ADDR_3, UriIndex::Device1, Token([9, 9, 9, 9]))
            .unwrap();
        let SubscribeOutcome::Updated(mask) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert!(mask.contains(UpdateMask::IP_UPDATED));
        assert!(mask.contains(UpdateMask::URI_ADDED));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_registrations_rejected() {
        let mut table = SubscriberTable::new();
        assert!(table.subscribe(NAME, ADDR_2, UriIndex::Device0, Token::EMPTY).is_err());
        assert!(table.subscribe(NAME, ADDR_2, UriIndex::None, TOKEN).is_err());
        assert!(table.subscribe("", ADDR_2, UriIndex::Device0, TOKEN).is_err());
        assert!(
            table
                .subscribe(NAME, Ipv6Addr::UNSPECIFIED, UriIndex::Device0, TOKEN)
                .is_err()
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_capacity() {
        let mut table = SubscriberTable::new();
        for i in 0..SUBSCRIBERS_MAX {
            let name = format!("kitchen_3_{i:016x}");
            let addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, i as u16 + 10);
            assert_eq!(
                table.subscribe(&name, addr, UriIndex::Device0, TOKEN).unwrap(),
                SubscribeOutcome::AddedNewDevice
            );
        }
        assert_eq!(
            table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap(),
            SubscribeOutcome::ListFull
        );
    }

    #[test]
    fn test_uri_slot_capacity() {
        let mut table = SubscriberTable::new();
        for slot in 0..SUB_URIS_MAX {
            let uri = UriIndex::device(slot).unwrap();
            table.subscribe(NAME, ADDR_2, uri, Token([slot as u8 + 1, 0, 0, 1])).unwrap();
        }
        assert_eq!(
            table.subscribe(NAME, ADDR_2, UriIndex::Test, Token([8, 8, 8, 8])).unwrap(),
            SubscribeOutcome::ListFull
        );
    }

    #[test]
    fn test_unsubscribe_frees_row_when_last_slot_goes() {
        let mut table = SubscriberTable::new();
        let second = Token([5, 5, 5, 5]);
        table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap();
        table.subscribe(NAME, ADDR_2, UriIndex::Device1, second).unwrap();

        table.unsubscribe(NAME, TOKEN).unwrap();
        assert_eq!(table.len(), 1);

        table.unsubscribe(NAME, second).unwrap();
        assert!(table.is_empty());

        assert_eq!(
            table.unsubscribe(NAME, second),
            Err(TrellisError::NotFound("subscriber"))
        );
    }

    #[test]
    fn test_recipients_exclusion() {
        let mut table = SubscriberTable::new();
        table.subscribe(NAME, ADDR_2, UriIndex::Device0, TOKEN).unwrap();
        table
            .subscribe("kitchen_4_1111222233334444", ADDR_3, UriIndex::Device0, Token([2, 2, 2, 2]))
            .unwrap();

        let all = table.recipients(UriIndex::Device0, None);
        assert_eq!(all.len(), 2);

        let filtered = table.recipients(UriIndex::Device0, Some(ADDR_3));
        assert_eq!(filtered, vec![(ADDR_2, TOKEN)]);

        assert!(table.recipients(UriIndex::Device1, None).is_empty());
    }
}

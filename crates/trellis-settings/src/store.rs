//! The settings store: RAM working copy plus flash reconciliation
//!
//! Records are packed back to back in the working copy as
//! `{ key: u16 le, length: u16 le, value: length bytes }`. All mutations act
//! on RAM and arm the debounced writer; [`SettingsStore::flush_now`] performs
//! the actual reconciliation (also used directly by tests and shutdown
//! paths).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use trellis_common::{SETTINGS_KEYS_APP, TrellisError};

use crate::flash::{FlashPage, PROGRAM_CHUNK, SLOT_COUNT, SLOT_SIZE};
use crate::slot::{self, RECORD_AREA, SlotTrailer};

/// Record header: key + length, both little-endian.
const HEADER_LEN: usize = 4;

/// Keys with this value terminate the record stream.
const KEY_ERASED: u16 = 0xFFFF;
const KEY_EMPTY: u16 = 0x0000;

/// Application key space assignments.
pub mod app_keys {
    /// Administrator-assigned group label.
    pub const GROUP: u16 = 0x0100;
    /// Configured device type tag.
    pub const DEVICE_TYPE: u16 = 0x0101;
    /// Serialized paired-peer names.
    pub const PAIRED_PEERS: u16 = 0x0102;
}

pub(crate) struct Inner {
    flash: Box<dyn FlashPage>,
    ram: Box<[u8]>,
    cursor: usize,
    /// Slot the last write attempt targeted; rotates on every flush.
    write_ptr: Option<usize>,
    /// Slot currently carrying the magic word.
    valid_slot: Option<usize>,
}

/// Handle to the settings store. Cheap to clone; all clones share the same
/// working copy.
#[derive(Clone)]
pub struct SettingsStore {
    shared: Arc<Mutex<Inner>>,
    dirty_tx: mpsc::UnboundedSender<()>,
}

impl SettingsStore {
    /// Initialize from flash: locate the newest valid slot and seed the RAM
    /// working copy from it.
    pub(crate) fn load(flash: Box<dyn FlashPage>, dirty_tx: mpsc::UnboundedSender<()>) -> Self {
        let mut ram = vec![0u8; RECORD_AREA].into_boxed_slice();
        let mut cursor = 0;

        let newest = match slot::newest_valid_slot(flash.as_ref()) {
            Ok(newest) => newest,
            Err(err) => {
                warn!("settings: slot scan failed, starting empty: {err}");
                None
            }
        };

        if let Some(index) = newest {
            let trailer = slot::read_trailer(flash.as_ref(), index)
                .unwrap_or_else(|_| SlotTrailer::new(0));
            cursor = trailer.cursor();
            if let Err(err) = flash.read(slot::slot_offset(index), &mut ram) {
                warn!("settings: slot read failed, starting empty: {err}");
                ram.fill(0);
                cursor = 0;
            }
            debug!("settings: loaded slot {index}, cursor {cursor}");
        } else {
            debug!("settings: no valid slot, starting empty");
        }

        SettingsStore {
            shared: Arc::new(Mutex::new(Inner {
                flash,
                ram,
                cursor,
                write_ptr: newest,
                valid_slot: newest,
            })),
            dirty_tx,
        }
    }

    /// Look a record up by key and occurrence index. Copies at most
    /// `out.len()` bytes and returns the true stored length.
    pub fn get(&self, key: u16, index: usize, out: &mut [u8]) -> Result<u16, TrellisError> {
        let inner = self.shared.lock();
        let (offset, length) = inner
            .find(key, index)
            .ok_or(TrellisError::NotFound("settings key"))?;

        let take = length.min(out.len());
        out[..take].copy_from_slice(&inner.ram[offset + HEADER_LEN..offset + HEADER_LEN + take]);
        Ok(length as u16)
    }

    /// Owned-value variant of [`get`](Self::get).
    pub fn lookup(&self, key: u16, index: usize) -> Option<Vec<u8>> {
        let inner = self.shared.lock();
        let (offset, length) = inner.find(key, index)?;
        Some(inner.ram[offset + HEADER_LEN..offset + HEADER_LEN + length].to_vec())
    }

    /// Append a record. Fails with a capacity error when the working copy
    /// cannot hold it.
    pub fn add(&self, key: u16, value: &[u8]) -> Result<(), TrellisError> {
        check_key(key)?;
        {
            let mut inner = self.shared.lock();
            inner.append(key, value)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Replace every record under `key` with a single new one.
    pub fn set(&self, key: u16, value: &[u8]) -> Result<(), TrellisError> {
        check_key(key)?;
        {
            let mut inner = self.shared.lock();
            while inner.remove(key, None) {}
            inner.append(key, value)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Delete one record. `index` of `None` removes the first occurrence
    /// (the `-1` of the platform contract).
    pub fn delete(&self, key: u16, index: Option<usize>) -> Result<(), TrellisError> {
        let removed = {
            let mut inner = self.shared.lock();
            inner.remove(key, index)
        };
        if !removed {
            return Err(TrellisError::NotFound("settings key"));
        }
        self.mark_dirty();
        Ok(())
    }

    /// Drop every record and reset the cursor.
    pub fn wipe(&self) {
        {
            let mut inner = self.shared.lock();
            inner.ram.fill(0);
            inner.cursor = 0;
        }
        self.mark_dirty();
    }

    /// Current write cursor, in bytes from the start of the record area.
    pub fn cursor(&self) -> usize {
        self.shared.lock().cursor
    }

    /// Reconcile the working copy to flash if it differs from the newest
    /// valid slot. Returns whether a slot was programmed.
    pub fn flush_now(&self) -> Result<bool, TrellisError> {
        self.shared.lock().flush_if_dirty()
    }

    /// Shared state handle for the flush worker. The worker must not hold a
    /// `SettingsStore` clone, or the dirty channel would never close.
    pub(crate) fn shared(&self) -> Arc<Mutex<Inner>> {
        Arc::clone(&self.shared)
    }

    fn mark_dirty(&self) {
        // worker may be absent in tests; mutations are still visible in RAM
        let _ = self.dirty_tx.send(());
    }

    // String convenience layer over the application key space.

    /// Persist a string under an application key.
    pub fn save_string(&self, key: u16, value: &str) -> Result<(), TrellisError> {
        check_app_key(key)?;
        self.set(key, value.as_bytes())
    }

    /// Read back a string saved with [`save_string`](Self::save_string).
    pub fn read_string(&self, key: u16) -> Option<String> {
        let raw = self.lookup(key, 0)?;
        String::from_utf8(raw).ok()
    }

    pub fn delete_string(&self, key: u16) -> Result<(), TrellisError> {
        check_app_key(key)?;
        self.delete(key, None)
    }
}

fn check_key(key: u16) -> Result<(), TrellisError> {
    if key == KEY_ERASED || key == KEY_EMPTY {
        return Err(TrellisError::invalid_argument(format!(
            "reserved settings key {key:#06x}"
        )));
    }
    Ok(())
}

fn check_app_key(key: u16) -> Result<(), TrellisError> {
    if !SETTINGS_KEYS_APP.contains(&key) {
        return Err(TrellisError::invalid_argument(format!(
            "key {key:#06x} outside the application key space"
        )));
    }
    Ok(())
}

impl Inner {
    /// Walk records in `ram[..cursor]`, yielding `(offset, key, value_len)`.
    /// Stops at a terminator key or when a record would overrun the cursor.
    fn records(&self) -> impl Iterator<Item = (usize, u16, usize)> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset + HEADER_LEN > self.cursor {
                return None;
            }
            let key = u16::from_le_bytes([self.ram[offset], self.ram[offset + 1]]);
            if key == KEY_ERASED || key == KEY_EMPTY {
                return None;
            }
            let length = u16::from_le_bytes([self.ram[offset + 2], self.ram[offset + 3]]) as usize;
            let next = offset + HEADER_LEN + length;
            if next > self.cursor {
                return None;
            }
            let current = offset;
            offset = next;
            Some((current, key, length))
        })
    }

    fn find(&self, key: u16, index: usize) -> Option<(usize, usize)> {
        self.records()
            .filter(|&(_, k, _)| k == key)
            .nth(index)
            .map(|(offset, _, length)| (offset, length))
    }

    fn append(&mut self, key: u16, value: &[u8]) -> Result<(), TrellisError> {
        let needed = HEADER_LEN + value.len();
        if self.cursor + needed > RECORD_AREA {
            return Err(TrellisError::Capacity("settings buffer"));
        }

        let offset = self.cursor;
        self.ram[offset..offset + 2].copy_from_slice(&key.to_le_bytes());
        self.ram[offset + 2..offset + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        self.ram[offset + HEADER_LEN..offset + needed].copy_from_slice(value);
        self.cursor += needed;
        Ok(())
    }

    /// Remove one matching record by shifting the tail down. `index` of
    /// `None` matches the first occurrence.
    fn remove(&mut self, key: u16, index: Option<usize>) -> bool {
        let target = self.find(key, index.unwrap_or(0));
        let Some((offset, length)) = target else {
            return false;
        };

        let record_len = HEADER_LEN + length;
        let tail_start = offset + record_len;
        if tail_start < self.cursor {
            self.ram.copy_within(tail_start..self.cursor, offset);
        }
        self.cursor -= record_len;
        // keep the vacated tail zeroed so flash diffs stay meaningful
        self.ram[self.cursor..self.cursor + record_len].fill(0);
        true
    }

    fn is_dirty(&self) -> Result<bool, TrellisError> {
        match self.valid_slot {
            None => Ok(self.cursor > 0),
            Some(index) => {
                let trailer = slot::read_trailer(self.flash.as_ref(), index)?;
                if trailer.cursor() != self.cursor {
                    return Ok(true);
                }
                let mut stored = vec![0u8; self.cursor];
                self.flash.read(slot::slot_offset(index), &mut stored)?;
                Ok(stored.as_slice() != &self.ram[..self.cursor])
            }
        }
    }

    pub(crate) fn flush_if_dirty(&mut self) -> Result<bool, TrellisError> {
        if !self.is_dirty()? {
            return Ok(false);
        }

        // advance the rotating write pointer; wrapping erases the page
        let next = match self.write_ptr {
            Some(current) if current + 1 >= SLOT_COUNT => {
                self.flash.erase().map_err(|err| {
                    warn!("settings: page erase failed: {err}");
                    err
                })?;
                self.valid_slot = None;
                0
            }
            Some(current) => current + 1,
            None => 0,
        };
        self.write_ptr = Some(next);

        // full slot image: record area plus trailer carrying the cursor.
        // The trailer sits in the final quadword, so the magic word lands
        // last and a partial program leaves the slot invalid.
        let mut image = vec![0u8; SLOT_SIZE];
        image[..RECORD_AREA].copy_from_slice(&self.ram);
        image[RECORD_AREA..].copy_from_slice(&SlotTrailer::new(self.cursor as u32).encode());

        let base = slot::slot_offset(next);
        for chunk_start in (0..SLOT_SIZE).step_by(PROGRAM_CHUNK) {
            let chunk = &image[chunk_start..chunk_start + PROGRAM_CHUNK];
            if let Err(err) = self.flash.program(base + chunk_start, chunk) {
                warn!(
                    "settings: program failed in slot {next} at {chunk_start}: {err}"
                );
                return Err(err);
            }
        }

        // retire the previous slot so exactly one carries the magic word
        if let Some(prev) = self.valid_slot.take()
            && prev != next
        {
            let retire_base = slot::trailer_offset(prev) - (slot::trailer_offset(prev) % PROGRAM_CHUNK);
            if let Err(err) = self.flash.program(retire_base, &[0u8; PROGRAM_CHUNK]) {
                warn!("settings: failed to retire slot {prev}: {err}");
            }
        }
        self.valid_slot = Some(next);

        debug!("settings: flushed {} bytes to slot {next}", self.cursor);
        Ok(true)
    }
}

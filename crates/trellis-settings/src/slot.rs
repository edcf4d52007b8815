//! Slot layout and trailer codec
//!
//! Each slot ends with a 12-byte little-endian trailer
//! `{ magic: u32, block_length: u32, crc: u32 }`. A slot is valid iff
//! `magic == MAGIC`. The `crc` field is reserved: it is programmed as zero
//! and never verified.

use crate::flash::{FlashPage, SLOT_COUNT, SLOT_SIZE};

use trellis_common::TrellisError;

/// Magic word marking a programmed slot.
pub const MAGIC: u32 = 0x0784_EAD0;

/// Trailer length in bytes.
pub const TRAILER_LEN: usize = 12;

/// Bytes of record buffer per slot.
pub const RECORD_AREA: usize = SLOT_SIZE - TRAILER_LEN;

/// Trailer values that mean "no usable cursor stored".
const LEN_ERASED: u32 = 0xFFFF_FFFF;
const LEN_EMPTY: u32 = 0x0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotTrailer {
    pub magic: u32,
    pub block_length: u32,
    pub crc: u32,
}

impl SlotTrailer {
    pub fn new(block_length: u32) -> Self {
        SlotTrailer {
            magic: MAGIC,
            block_length,
            crc: 0,
        }
    }

    pub fn encode(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.block_length.to_le_bytes());
        out[8..12].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; TRAILER_LEN]) -> Self {
        SlotTrailer {
            magic: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            block_length: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            crc: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// Stored write cursor, or zero when the trailer carries a sentinel
    /// value or an out-of-range length.
    pub fn cursor(&self) -> usize {
        match self.block_length {
            LEN_ERASED | LEN_EMPTY => 0,
            len if len as usize > RECORD_AREA => 0,
            len => len as usize,
        }
    }
}

/// Byte offset of a slot inside the page.
pub fn slot_offset(index: usize) -> usize {
    debug_assert!(index < SLOT_COUNT);
    index * SLOT_SIZE
}

/// Byte offset of a slot's trailer.
pub fn trailer_offset(index: usize) -> usize {
    slot_offset(index) + RECORD_AREA
}

/// Read and decode one slot trailer.
pub fn read_trailer(flash: &dyn FlashPage, index: usize) -> Result<SlotTrailer, TrellisError> {
    let mut raw = [0u8; TRAILER_LEN];
    flash.read(trailer_offset(index), &mut raw)?;
    Ok(SlotTrailer::decode(&raw))
}

/// Scan the page for the newest valid slot: the last one whose magic
/// matches. Returns `None` on a virgin page.
pub fn newest_valid_slot(flash: &dyn FlashPage) -> Result<Option<usize>, TrellisError> {
    let mut newest = None;
    for index in 0..SLOT_COUNT {
        if read_trailer(flash, index)?.is_valid() {
            newest = Some(index);
        }
    }
    Ok(newest)
}

/// Count slots currently carrying the magic word. Exactly one after any
/// successful flush.
pub fn valid_slot_count(flash: &dyn FlashPage) -> Result<usize, TrellisError> {
    let mut count = 0;
    for index in 0..SLOT_COUNT {
        if read_trailer(flash, index)?.is_valid() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;

    #[test]
    fn test_trailer_round_trip() {
        let trailer = SlotTrailer::new(1234);
        let decoded = SlotTrailer::decode(&trailer.encode());
        assert_eq!(decoded, trailer);
        assert!(decoded.is_valid());
        assert_eq!(decoded.cursor(), 1234);
        assert_eq!(decoded.crc, 0);
    }

    #[test]
    fn test_cursor_sentinels() {
        let mut t = SlotTrailer::new(0xFFFF_FFFF);
        assert_eq!(t.cursor(), 0);
        t.block_length = 0;
        assert_eq!(t.cursor(), 0);
        t.block_length = RECORD_AREA as u32 + 1;
        assert_eq!(t.cursor(), 0);
        t.block_length = RECORD_AREA as u32;
        assert_eq!(t.cursor(), RECORD_AREA);
    }

    #[test]
    fn test_erased_trailer_invalid() {
        let raw = [0xFF; TRAILER_LEN];
        assert!(!SlotTrailer::decode(&raw).is_valid());
    }

    #[test]
    fn test_newest_valid_slot_scan() {
        let mut flash = MemFlash::new();
        assert_eq!(newest_valid_slot(&flash).unwrap(), None);

        // trailer sits in the final quadword of the slot
        let mut chunk = [0xFF; 16];
        chunk[4..16].copy_from_slice(&SlotTrailer::new(8).encode());

        let base = trailer_offset(1) - 4;
        flash.program(base, &chunk).unwrap();
        assert_eq!(newest_valid_slot(&flash).unwrap(), Some(1));
        assert_eq!(valid_slot_count(&flash).unwrap(), 1);

        let base = trailer_offset(3) - 4;
        flash.program(base, &chunk).unwrap();
        assert_eq!(newest_valid_slot(&flash).unwrap(), Some(3));
        assert_eq!(valid_slot_count(&flash).unwrap(), 2);
    }
}

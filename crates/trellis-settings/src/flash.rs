//! Flash page abstraction
//!
//! The settings store owns exactly one erase page. Real hardware sits behind
//! [`FlashPage`]; [`MemFlash`] emulates a NOR page for tests and host builds.

use std::sync::Arc;

use parking_lot::Mutex;

use trellis_common::TrellisError;

/// Size of the dedicated settings page in bytes.
pub const PAGE_SIZE: usize = 8 * 1024;

/// Size of one settings slot inside the page.
pub const SLOT_SIZE: usize = 2048;

/// Number of slots per page.
pub const SLOT_COUNT: usize = PAGE_SIZE / SLOT_SIZE;

/// Program granularity: one quadword.
pub const PROGRAM_CHUNK: usize = 16;

/// A single erasable flash page with quadword programming.
///
/// Programming can only clear bits (NOR semantics); only an erase returns
/// them to `0xFF`. `offset` and `data.len()` must be multiples of
/// [`PROGRAM_CHUNK`].
pub trait FlashPage: Send + Sync {
    /// Copy `buf.len()` bytes starting at `offset` out of the page.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), TrellisError>;

    /// Erase the whole page to `0xFF`.
    fn erase(&mut self) -> Result<(), TrellisError>;

    /// Program `data` at `offset`, both quadword-aligned.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), TrellisError>;
}

/// In-memory NOR page emulation. Clones share the same backing array, so a
/// "rebooted" store can be pointed at the surviving contents.
#[derive(Clone)]
pub struct MemFlash {
    cells: Arc<Mutex<Vec<u8>>>,
}

impl MemFlash {
    /// A freshly erased page.
    pub fn new() -> Self {
        MemFlash {
            cells: Arc::new(Mutex::new(vec![0xFF; PAGE_SIZE])),
        }
    }

    /// Raw snapshot of the page, for assertions.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.lock().clone()
    }
}

impl Default for MemFlash {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(offset: usize, len: usize) -> Result<(), TrellisError> {
    if offset + len > PAGE_SIZE {
        return Err(TrellisError::storage(format!(
            "flash access out of range: {offset}+{len}"
        )));
    }
    Ok(())
}

impl FlashPage for MemFlash {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), TrellisError> {
        check_range(offset, buf.len())?;
        let cells = self.cells.lock();
        buf.copy_from_slice(&cells[offset..offset + buf.len()]);
        Ok(())
    }

    fn erase(&mut self) -> Result<(), TrellisError> {
        self.cells.lock().fill(0xFF);
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), TrellisError> {
        if offset % PROGRAM_CHUNK != 0 || data.len() % PROGRAM_CHUNK != 0 {
            return Err(TrellisError::storage(format!(
                "unaligned program: {offset}+{}",
                data.len()
            )));
        }
        check_range(offset, data.len())?;

        let mut cells = self.cells.lock();
        for (cell, byte) in cells[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erased_page_reads_ff() {
        let flash = MemFlash::new();
        let mut buf = [0u8; 32];
        flash.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_program_clears_bits_only() {
        let mut flash = MemFlash::new();
        flash.program(0, &[0xF0; PROGRAM_CHUNK]).unwrap();
        // reprogramming cannot set bits back
        flash.program(0, &[0x0F; PROGRAM_CHUNK]).unwrap();

        let mut buf = [0u8; PROGRAM_CHUNK];
        flash.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_unaligned_program_rejected() {
        let mut flash = MemFlash::new();
        assert!(flash.program(3, &[0u8; PROGRAM_CHUNK]).is_err());
        assert!(flash.program(0, &[0u8; 5]).is_err());
    }

    #[test]
    fn test_clones_share_cells() {
        let mut flash = MemFlash::new();
        let other = flash.clone();
        flash.program(0, &[0xAA; PROGRAM_CHUNK]).unwrap();

        let mut buf = [0u8; PROGRAM_CHUNK];
        other.read(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAA);
    }
}

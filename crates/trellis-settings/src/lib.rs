//! Wear-leveled non-volatile settings store
//!
//! This crate persists small `(key, value)` records across reboots using a
//! single flash page divided into equal slots:
//! - Records live in a RAM working copy and are appended, replaced, and
//!   deleted there at memory speed.
//! - A debounced background writer reconciles the RAM copy to flash. Each
//!   flush programs the *next* slot in the page, so erase cycles are
//!   amortized across all slots.
//! - A slot is valid iff its trailing magic word matches; on boot the newest
//!   valid slot seeds the RAM copy.
//!
//! The flash device itself is an external collaborator behind the
//! [`FlashPage`] trait.

pub mod flash;
pub mod flush;
pub mod slot;
pub mod store;

pub use flash::{FlashPage, MemFlash};
pub use flush::FlushWorker;
pub use store::{SettingsStore, app_keys};

use std::time::Duration;

/// Debounce window between the last mutation and the flash write.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(10);

/// Build a store plus its background writer over the given flash page.
///
/// The returned [`FlushWorker`] must be driven (`tokio::spawn(worker.run())`)
/// for automatic persistence; tests may instead call
/// [`SettingsStore::flush_now`] directly.
pub fn open(flash: Box<dyn FlashPage>) -> (SettingsStore, FlushWorker) {
    open_with_debounce(flash, FLUSH_DEBOUNCE)
}

pub fn open_with_debounce(
    flash: Box<dyn FlashPage>,
    debounce: Duration,
) -> (SettingsStore, FlushWorker) {
    let (dirty_tx, dirty_rx) = tokio::sync::mpsc::unbounded_channel();
    let store = SettingsStore::load(flash, dirty_tx);
    let worker = FlushWorker::new(store.shared(), dirty_rx, debounce);
    (store, worker)
}

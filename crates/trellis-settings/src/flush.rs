//! Debounced background writer
//!
//! Every mutation re-arms a debounce deadline; the worker sleeps until the
//! deadline passes with no further mutations, then asks the store to
//! reconcile RAM to flash. Storage failures are logged and the previous
//! valid slot stays current, so the worker simply waits for the next dirty
//! signal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::store::Inner;

pub struct FlushWorker {
    shared: Arc<Mutex<Inner>>,
    dirty_rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
}

impl FlushWorker {
    pub(crate) fn new(
        shared: Arc<Mutex<Inner>>,
        dirty_rx: mpsc::UnboundedReceiver<()>,
        debounce: Duration,
    ) -> Self {
        FlushWorker {
            shared,
            dirty_rx,
            debounce,
        }
    }

    /// Drive the debounce loop until every store handle is dropped. A final
    /// reconciliation runs on shutdown so late mutations are not lost.
    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            match deadline {
                None => match self.dirty_rx.recv().await {
                    Some(()) => deadline = Some(Instant::now() + self.debounce),
                    None => break,
                },
                Some(at) => {
                    tokio::select! {
                        signal = self.dirty_rx.recv() => match signal {
                            // another mutation: restart the window
                            Some(()) => deadline = Some(Instant::now() + self.debounce),
                            None => break,
                        },
                        _ = sleep_until(at) => {
                            self.flush();
                            deadline = None;
                        }
                    }
                }
            }
        }

        self.flush();
        debug!("settings flush worker stopped");
    }

    fn flush(&self) {
        match self.shared.lock().flush_if_dirty() {
            Ok(true) => debug!("settings flushed to flash"),
            Ok(false) => {}
            Err(err) => warn!("settings flush failed: {err}"),
        }
    }
}

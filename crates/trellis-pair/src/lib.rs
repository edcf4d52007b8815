//! Peer pairing for Trellis nodes
//!
//! This crate owns the mutable peer table and everything that feeds it:
//! - [`PairRegistry`]: the bounded table of admitted peers and their URI
//!   slots
//! - [`PairRules`]: the admission policy sum type and its serialized tag
//!   form
//! - The pair worker: a single consumer draining a bounded queue of
//!   discovery candidates, applying policy, fetching catalogs, and holding
//!   the subscriptions this node places on its peers

pub mod registry;
pub mod rules;
pub mod worker;

pub use registry::{AddOutcome, PairRegistry, Peer, PeerUri};
pub use rules::PairRules;
pub use worker::{
    PairCommand, PairPolicy, PairQueue, PairWorker, PairedObserver, PairedObservers, pair_channel,
    send_update_ip,
};

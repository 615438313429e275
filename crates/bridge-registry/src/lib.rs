//! Bridge Registry - durable state for in-flight relays
//!
//! Uses sled to persist deposit records, relay bookkeeping and the consumed
//! nullifier set across restarts. All status mutation goes through
//! compare-and-set transitions; this is the only synchronization point
//! between the chain watchers and the dispatcher workers.

pub mod nullifiers;
pub mod store;

pub use nullifiers::NullifierSet;
pub use store::CommitmentRegistry;

//! Chain Adapter - uniform capability interface over heterogeneous chains
//!
//! Every chain family (EVM account model, NEAR, Solana program calls)
//! presents this identical surface so the relay engine stays chain-agnostic.
//! Adapters do network I/O only; the block cursor is the sole state they
//! carry between calls.
//!
//! Production adapters wrap per-chain RPC clients and live out of tree.
//! `InMemoryChain` is the in-process implementation used by the local
//! harness and the scenario tests.

pub mod error;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use bridge_core::{ChainId, Commitment, RelayMessage, TransferKind};

pub use error::AdapterError;
pub use memory::{InMemoryChain, SubmitFault};

/// A deposit event as observed on a source chain, before any registry
/// bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDepositEvent {
    pub commitment: Commitment,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub asset: String,
    pub amount: u64,
    pub depositor: String,
    pub recipient_hint: Vec<u8>,
    pub transfer_kind: TransferKind,
    pub block_height: u64,
    pub block_hash: [u8; 32],
}

/// One page of events plus the cursor to resume from.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<RawDepositEvent>,
    /// Pass this to the next `fetch_events_since` call.
    pub next_cursor: u64,
}

/// Handle for a submitted relay transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub chain: ChainId,
    pub sequence: u64,
}

/// Outcome of waiting for destination-chain inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionStatus {
    Confirmed,
    TimedOut,
}

/// Uniform read/write capability over one chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    fn name(&self) -> &str;

    /// Fetch deposit events at or above `cursor`. Finite per call;
    /// resumable via the returned cursor.
    async fn fetch_events_since(&self, cursor: u64) -> Result<EventBatch, AdapterError>;

    /// Latest observed block height.
    async fn current_height(&self) -> Result<u64, AdapterError>;

    /// Hash of the block currently at `height`, if still known.
    ///
    /// Comparing this against the hash recorded at observation time is how
    /// the finality tracker detects reorganizations.
    async fn block_hash_at(&self, height: u64) -> Result<Option<[u8; 32]>, AdapterError>;

    /// Submit a relay message to this chain as destination.
    ///
    /// The hub contract treats the commitment as its idempotency key and
    /// rejects one it has already processed with `AlreadyProcessed`.
    async fn submit(&self, message: &RelayMessage) -> Result<SubmissionReceipt, AdapterError>;

    /// Wait until the submission is included or the timeout elapses.
    async fn wait_for_inclusion(
        &self,
        receipt: SubmissionReceipt,
        timeout: Duration,
    ) -> Result<InclusionStatus, AdapterError>;
}

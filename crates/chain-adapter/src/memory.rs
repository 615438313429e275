//! In-process chain simulation
//!
//! Implements the full adapter surface over in-memory state: height
//! advancement, deposit event emission, idempotent submission tracking,
//! fault injection and reorg injection. Drives the scenario tests and the
//! binary's simulated mode.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;

use bridge_core::{ChainId, Commitment, RelayAttestation, RelayMessage, TransferKind};

use crate::{
    AdapterError, ChainAdapter, EventBatch, InclusionStatus, RawDepositEvent, SubmissionReceipt,
};

/// Maximum events returned per `fetch_events_since` call.
const EVENT_PAGE: usize = 64;

/// Injected failure for the next `submit` call(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFault {
    Unreachable,
    Rejected(String),
    /// Submission fails before reaching the chain.
    Timeout,
    /// The transaction lands but the response is lost; the caller sees a
    /// timeout while the destination has already processed the commitment.
    TimeoutAfterLanding,
}

struct ChainState {
    /// Block hash per height; index == height.
    blocks: Vec<[u8; 32]>,
    /// Bumped on every reorg so rewritten heights hash differently.
    fork_seq: u64,
    events: Vec<RawDepositEvent>,
    /// Commitments the hub has processed (idempotency set).
    processed: HashSet<Commitment>,
    /// Count of distinct successful submission effects, for
    /// exactly-once assertions.
    effects: u64,
    submit_faults: VecDeque<SubmitFault>,
    inclusion_timeouts: u32,
    unreachable: bool,
    receipt_seq: u64,
}

/// Simulated chain holding all adapter state behind one lock.
pub struct InMemoryChain {
    chain_id: ChainId,
    name: String,
    /// Hubs verify the relayer's attestation signature when configured.
    relayer_key: Option<VerifyingKey>,
    state: RwLock<ChainState>,
}

impl InMemoryChain {
    pub fn new(chain_id: ChainId, name: impl Into<String>) -> Self {
        let mut chain = Self {
            chain_id,
            name: name.into(),
            relayer_key: None,
            state: RwLock::new(ChainState {
                blocks: Vec::new(),
                fork_seq: 0,
                events: Vec::new(),
                processed: HashSet::new(),
                effects: 0,
                submit_faults: VecDeque::new(),
                inclusion_timeouts: 0,
                unreachable: false,
                receipt_seq: 0,
            }),
        };
        // Genesis block at height 0
        let genesis = chain.hash_for(0, 0);
        chain.state.get_mut().blocks.push(genesis);
        chain
    }

    /// Require a valid attestation signature from this key on every
    /// submission.
    pub fn with_relayer_key(mut self, key: VerifyingKey) -> Self {
        self.relayer_key = Some(key);
        self
    }

    fn hash_for(&self, height: u64, fork_seq: u64) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.chain_id.0.to_le_bytes());
        hasher.update(&height.to_le_bytes());
        hasher.update(&fork_seq.to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Mine `n` empty blocks.
    pub fn advance_blocks(&self, n: u64) {
        let mut state = self.state.write();
        let fork_seq = state.fork_seq;
        for _ in 0..n {
            let height = state.blocks.len() as u64;
            let hash = self.hash_for(height, fork_seq);
            state.blocks.push(hash);
        }
    }

    /// Record a deposit event in the next block and return (height, hash).
    #[allow(clippy::too_many_arguments)]
    pub fn deposit(
        &self,
        commitment: Commitment,
        dest_chain: ChainId,
        asset: impl Into<String>,
        amount: u64,
        depositor: impl Into<String>,
        recipient_hint: Vec<u8>,
        transfer_kind: TransferKind,
    ) -> (u64, [u8; 32]) {
        let mut state = self.state.write();
        let height = state.blocks.len() as u64;
        let hash = self.hash_for(height, state.fork_seq);
        state.blocks.push(hash);
        state.events.push(RawDepositEvent {
            commitment,
            source_chain: self.chain_id,
            dest_chain,
            asset: asset.into(),
            amount,
            depositor: depositor.into(),
            recipient_hint,
            transfer_kind,
            block_height: height,
            block_hash: hash,
        });
        (height, hash)
    }

    /// Rewrite history from `height` upward, as a reorganization would.
    /// Events in rewritten blocks are dropped from the new chain.
    pub fn reorg_from(&self, height: u64) {
        let mut state = self.state.write();
        state.fork_seq += 1;
        let fork_seq = state.fork_seq;
        let top = state.blocks.len() as u64;
        for h in height..top {
            let hash = self.hash_for(h, fork_seq);
            state.blocks[h as usize] = hash;
        }
        state.events.retain(|e| e.block_height < height);
        tracing::debug!(
            chain = %self.chain_id,
            from = height,
            "simulated reorg rewrote {} blocks",
            top.saturating_sub(height)
        );
    }

    /// Queue faults consumed by subsequent `submit` calls, in order.
    pub fn fail_next_submits(&self, faults: impl IntoIterator<Item = SubmitFault>) {
        self.state.write().submit_faults.extend(faults);
    }

    /// Make the next `n` `wait_for_inclusion` calls time out.
    pub fn timeout_next_inclusions(&self, n: u32) {
        self.state.write().inclusion_timeouts += n;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    /// Whether the hub has processed this commitment.
    pub fn was_processed(&self, commitment: &Commitment) -> bool {
        self.state.read().processed.contains(commitment)
    }

    /// Number of distinct successful submission effects.
    pub fn effect_count(&self) -> u64 {
        self.state.read().effects
    }

    fn apply_submission(&self, state: &mut ChainState, commitment: Commitment) {
        if state.processed.insert(commitment) {
            state.effects += 1;
        }
    }
}

#[async_trait]
impl ChainAdapter for InMemoryChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_events_since(&self, cursor: u64) -> Result<EventBatch, AdapterError> {
        let state = self.state.read();
        if state.unreachable {
            return Err(AdapterError::Unreachable(self.name.clone()));
        }
        let events: Vec<RawDepositEvent> = state
            .events
            .iter()
            .filter(|e| e.block_height >= cursor)
            .take(EVENT_PAGE)
            .cloned()
            .collect();
        let next_cursor = events
            .iter()
            .map(|e| e.block_height + 1)
            .max()
            .unwrap_or(cursor);
        Ok(EventBatch {
            events,
            next_cursor,
        })
    }

    async fn current_height(&self) -> Result<u64, AdapterError> {
        let state = self.state.read();
        if state.unreachable {
            return Err(AdapterError::Unreachable(self.name.clone()));
        }
        Ok(state.blocks.len() as u64 - 1)
    }

    async fn block_hash_at(&self, height: u64) -> Result<Option<[u8; 32]>, AdapterError> {
        let state = self.state.read();
        if state.unreachable {
            return Err(AdapterError::Unreachable(self.name.clone()));
        }
        Ok(state.blocks.get(height as usize).copied())
    }

    async fn submit(&self, message: &RelayMessage) -> Result<SubmissionReceipt, AdapterError> {
        let mut state = self.state.write();
        if state.unreachable {
            return Err(AdapterError::Unreachable(self.name.clone()));
        }

        if let Some(fault) = state.submit_faults.pop_front() {
            match fault {
                SubmitFault::Unreachable => {
                    return Err(AdapterError::Unreachable(self.name.clone()))
                }
                SubmitFault::Rejected(reason) => return Err(AdapterError::Rejected(reason)),
                SubmitFault::Timeout => return Err(AdapterError::TimedOut),
                SubmitFault::TimeoutAfterLanding => {
                    self.apply_submission(&mut state, message.commitment);
                    return Err(AdapterError::TimedOut);
                }
            }
        }

        if let Some(key) = &self.relayer_key {
            let attestation = RelayAttestation::from_bytes(&message.payload)
                .map_err(|e| AdapterError::Rejected(format!("malformed attestation: {e}")))?;
            attestation
                .verify(key)
                .map_err(|_| AdapterError::Rejected("bad attestation signature".to_string()))?;
        }

        if state.processed.contains(&message.commitment) {
            return Err(AdapterError::AlreadyProcessed);
        }

        self.apply_submission(&mut state, message.commitment);
        state.receipt_seq += 1;
        Ok(SubmissionReceipt {
            chain: self.chain_id,
            sequence: state.receipt_seq,
        })
    }

    async fn wait_for_inclusion(
        &self,
        _receipt: SubmissionReceipt,
        _timeout: Duration,
    ) -> Result<InclusionStatus, AdapterError> {
        let mut state = self.state.write();
        if state.unreachable {
            return Err(AdapterError::Unreachable(self.name.clone()));
        }
        if state.inclusion_timeouts > 0 {
            state.inclusion_timeouts -= 1;
            return Ok(InclusionStatus::TimedOut);
        }
        Ok(InclusionStatus::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(commitment: Commitment) -> RelayMessage {
        RelayMessage::new(commitment, ChainId(2), vec![], true)
    }

    #[tokio::test]
    async fn test_height_advances() {
        let chain = InMemoryChain::new(ChainId(1), "devnet");
        assert_eq!(chain.current_height().await.unwrap(), 0);

        chain.advance_blocks(5);
        assert_eq!(chain.current_height().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_events_resume_from_cursor() {
        let chain = InMemoryChain::new(ChainId(1), "devnet");
        let c1 = Commitment([1u8; 32]);
        let c2 = Commitment([2u8; 32]);
        chain.deposit(c1, ChainId(2), "eth", 10, "alice", vec![], TransferKind::Transparent);
        chain.deposit(c2, ChainId(2), "eth", 20, "bob", vec![], TransferKind::Transparent);

        let batch = chain.fetch_events_since(0).await.unwrap();
        assert_eq!(batch.events.len(), 2);

        let batch = chain.fetch_events_since(batch.next_cursor).await.unwrap();
        assert!(batch.events.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_already_processed() {
        let chain = InMemoryChain::new(ChainId(2), "devnet");
        let message = test_message(Commitment([9u8; 32]));

        chain.submit(&message).await.unwrap();
        let err = chain.submit(&message).await.unwrap_err();
        assert_eq!(err, AdapterError::AlreadyProcessed);
        assert_eq!(chain.effect_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_after_landing_applies_effect_once() {
        let chain = InMemoryChain::new(ChainId(2), "devnet");
        let message = test_message(Commitment([9u8; 32]));

        chain.fail_next_submits([SubmitFault::TimeoutAfterLanding]);
        assert_eq!(chain.submit(&message).await.unwrap_err(), AdapterError::TimedOut);

        // Retry trips the idempotency check; the effect happened exactly once.
        assert_eq!(
            chain.submit(&message).await.unwrap_err(),
            AdapterError::AlreadyProcessed
        );
        assert_eq!(chain.effect_count(), 1);
    }

    #[tokio::test]
    async fn test_reorg_rewrites_hashes_and_drops_events() {
        let chain = InMemoryChain::new(ChainId(1), "devnet");
        let commitment = Commitment([7u8; 32]);
        let (height, original_hash) =
            chain.deposit(commitment, ChainId(2), "eth", 10, "alice", vec![], TransferKind::Transparent);
        chain.advance_blocks(3);

        chain.reorg_from(height);

        let new_hash = chain.block_hash_at(height).await.unwrap().unwrap();
        assert_ne!(original_hash, new_hash);
        assert!(chain.fetch_events_since(0).await.unwrap().events.is_empty());
    }
}

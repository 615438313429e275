//! Finality Tracker - promotes deposits once their source block is safe
//!
//! `safe_height = current_height - required_confirmations`. A pending record
//! is promoted only when its source block is at or below the safe height
//! and the block hash recorded at observation time still matches the chain.
//! Already-finalized records are re-checked each poll; a hash mismatch there
//! is a reorg that broke the finality promise and forces the record to
//! `Failed`.

use dashmap::DashMap;

use bridge_core::{BridgeError, ChainId, DepositStatus};
use bridge_registry::CommitmentRegistry;
use chain_adapter::ChainAdapter;

use crate::config::ChainSettings;

/// Per-chain finality state.
#[derive(Debug, Clone, Copy)]
pub struct FinalityState {
    pub latest_observed_block: u64,
    pub required_confirmations: u64,
}

impl FinalityState {
    pub fn safe_height(&self) -> u64 {
        self.latest_observed_block
            .saturating_sub(self.required_confirmations)
    }
}

/// Tracks observed heights and drives promotion/expiry/reorg checks.
pub struct FinalityTracker {
    states: DashMap<ChainId, FinalityState>,
}

impl FinalityTracker {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn observe(&self, chain: ChainId, height: u64, required_confirmations: u64) {
        self.states.insert(
            chain,
            FinalityState {
                latest_observed_block: height,
                required_confirmations,
            },
        );
    }

    pub fn state(&self, chain: ChainId) -> Option<FinalityState> {
        self.states.get(&chain).map(|s| *s)
    }

    /// One finality pass over a single chain: refresh the height, expire
    /// stale pending records, promote safe ones, and re-verify finalized
    /// ones against reorgs.
    pub async fn poll_chain(
        &self,
        adapter: &dyn ChainAdapter,
        registry: &CommitmentRegistry,
        settings: &ChainSettings,
    ) -> anyhow::Result<()> {
        let chain = adapter.chain_id();
        let height = adapter.current_height().await?;
        self.observe(chain, height, settings.required_confirmations);
        let safe_height = height.saturating_sub(settings.required_confirmations);

        let now = chrono::Utc::now().timestamp();
        let expiry_secs = settings.pending_expiry.as_secs() as i64;

        for record in registry.list_by_status(DepositStatus::Pending) {
            let record = record?;
            if record.source_chain != chain {
                continue;
            }

            if now.saturating_sub(record.created_at) >= expiry_secs {
                match registry.transition(
                    &record.commitment,
                    DepositStatus::Pending,
                    DepositStatus::Expired,
                ) {
                    Ok(()) => {
                        tracing::info!(commitment = %record.commitment, "deposit expired before finality");
                    }
                    // lost a race with a concurrent transition
                    Err(BridgeError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }

            if record.source_block > safe_height {
                continue;
            }

            match adapter.block_hash_at(record.source_block).await? {
                Some(hash) if hash == record.source_block_hash => {
                    match registry.transition(
                        &record.commitment,
                        DepositStatus::Pending,
                        DepositStatus::Finalized,
                    ) {
                        Ok(()) => {
                            tracing::info!(
                                commitment = %record.commitment,
                                chain = %chain,
                                block = record.source_block,
                                safe_height,
                                "deposit finalized"
                            );
                        }
                        Err(BridgeError::InvalidTransition { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                _ => {
                    // The deposit's block was rewritten before promotion;
                    // the record stays pending and ages out to Expired.
                    tracing::warn!(
                        commitment = %record.commitment,
                        chain = %chain,
                        block = record.source_block,
                        "source block hash changed before promotion"
                    );
                }
            }
        }

        for record in registry.list_by_status(DepositStatus::Finalized) {
            let record = record?;
            if record.source_chain != chain {
                continue;
            }

            let current = adapter.block_hash_at(record.source_block).await?;
            if current != Some(record.source_block_hash) {
                tracing::error!(
                    commitment = %record.commitment,
                    chain = %chain,
                    block = record.source_block,
                    "reorg detected on finalized record; failing it"
                );
                match registry.transition(
                    &record.commitment,
                    DepositStatus::Finalized,
                    DepositStatus::Failed,
                ) {
                    Ok(()) => {
                        // Surface the cause on the status surface; the
                        // dispatcher's status re-check aborts any pending
                        // relay for this commitment.
                        let mut message = registry
                            .get_relay_message(&record.commitment)?
                            .unwrap_or_else(|| {
                                bridge_core::RelayMessage::new(
                                    record.commitment,
                                    record.dest_chain,
                                    Vec::new(),
                                    false,
                                )
                            });
                        message.last_error = Some(BridgeError::ReorgDetected.to_string());
                        registry.put_relay_message(&message)?;
                    }
                    Err(BridgeError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(())
    }
}

impl Default for FinalityTracker {
    fn default() -> Self {
        Self::new()
    }
}

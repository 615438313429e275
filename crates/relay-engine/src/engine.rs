//! Relay Protocol Engine - wiring and control surface
//!
//! One watcher task per configured chain ingests deposit events and drives
//! finality; a dispatcher worker pool drains finalized records. The engine
//! also exposes the operator surface: deposit registration, shielded
//! authorization, status queries and aggregate stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use serde::Serialize;
use tokio::sync::watch;

use bridge_core::{
    BridgeError, ChainId, Commitment, DepositRecord, DepositStatus, ShieldedProof, TransferKind,
};
use bridge_registry::CommitmentRegistry;
use chain_adapter::ChainAdapter;

use crate::config::{ChainSettings, EngineConfig};
use crate::dispatch::RelayDispatcher;
use crate::finality::FinalityTracker;
use crate::verifier::{ProofSystem, ShieldedVerifier};

/// A locally initiated deposit intent.
#[derive(Debug, Clone)]
pub struct SubmitDeposit {
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub asset: String,
    pub amount: u64,
    pub depositor: String,
    pub recipient_hint: Vec<u8>,
    pub transfer_kind: TransferKind,
    /// Secret pre-image the commitment binds.
    pub preimage: [u8; 32],
}

/// Operator view of one commitment.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub commitment: Commitment,
    pub status: DepositStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Aggregate counters for the monitoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub records: usize,
    pub by_status: HashMap<String, u64>,
    pub consumed_nullifiers: usize,
}

pub struct RelayEngineBuilder {
    config: EngineConfig,
    registry: Option<CommitmentRegistry>,
    proof_system: Option<Box<dyn ProofSystem>>,
    signer: Option<SigningKey>,
    adapters: Vec<Arc<dyn ChainAdapter>>,
}

impl RelayEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            proof_system: None,
            signer: None,
            adapters: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: CommitmentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn proof_system(mut self, proof_system: Box<dyn ProofSystem>) -> Self {
        self.proof_system = Some(proof_system);
        self
    }

    pub fn signer(mut self, signer: SigningKey) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> anyhow::Result<RelayEngine> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("engine requires a registry"))?;
        let proof_system = self
            .proof_system
            .ok_or_else(|| anyhow::anyhow!("engine requires a proof system"))?;
        let signer = Arc::new(
            self.signer
                .ok_or_else(|| anyhow::anyhow!("engine requires a relayer signing key"))?,
        );

        let mut adapters: HashMap<ChainId, Arc<dyn ChainAdapter>> = HashMap::new();
        for adapter in self.adapters {
            if self.config.chain(adapter.chain_id()).is_none() {
                anyhow::bail!("no settings for chain {}", adapter.chain_id());
            }
            if adapters.insert(adapter.chain_id(), adapter).is_some() {
                anyhow::bail!("duplicate adapter registration");
            }
        }
        if adapters.is_empty() {
            anyhow::bail!("engine requires at least one chain adapter");
        }

        let verifier = Arc::new(ShieldedVerifier::new(
            proof_system,
            registry.nullifier_set(),
        ));
        let dispatcher = Arc::new(RelayDispatcher::new(
            registry.clone(),
            adapters.clone(),
            self.config.clone(),
            signer.clone(),
        ));

        Ok(RelayEngine {
            config: self.config,
            registry,
            adapters,
            tracker: Arc::new(FinalityTracker::new()),
            verifier,
            dispatcher,
            nonce: AtomicU64::new(0),
        })
    }
}

pub struct RelayEngine {
    config: EngineConfig,
    registry: CommitmentRegistry,
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    tracker: Arc<FinalityTracker>,
    verifier: Arc<ShieldedVerifier>,
    dispatcher: Arc<RelayDispatcher>,
    nonce: AtomicU64,
}

impl RelayEngine {
    pub fn builder(config: EngineConfig) -> RelayEngineBuilder {
        RelayEngineBuilder::new(config)
    }

    pub fn registry(&self) -> &CommitmentRegistry {
        &self.registry
    }

    /// Register a locally initiated deposit intent as a pending record.
    ///
    /// The commitment is derived from the pre-image, the transfer parameters
    /// and an engine nonce, and becomes the idempotency key for the whole
    /// lifecycle. The matching on-chain event later hits
    /// `DuplicateCommitment` and is ignored.
    pub async fn submit_deposit(&self, deposit: SubmitDeposit) -> anyhow::Result<Commitment> {
        let adapter = self
            .adapters
            .get(&deposit.source_chain)
            .ok_or_else(|| anyhow::anyhow!("no adapter for chain {}", deposit.source_chain))?;

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let commitment = Commitment::derive(
            &deposit.preimage,
            &deposit.asset,
            deposit.amount,
            deposit.source_chain,
            deposit.dest_chain,
            nonce,
        );

        let height = adapter.current_height().await?;
        let block_hash = adapter
            .block_hash_at(height)
            .await?
            .ok_or_else(|| anyhow::anyhow!("source chain has no block at its own height"))?;

        let record = DepositRecord {
            commitment,
            source_chain: deposit.source_chain,
            dest_chain: deposit.dest_chain,
            asset: deposit.asset,
            amount: deposit.amount,
            depositor: deposit.depositor,
            recipient_hint: deposit.recipient_hint,
            transfer_kind: deposit.transfer_kind,
            source_block: height,
            source_block_hash: block_hash,
            created_at: chrono::Utc::now().timestamp(),
            status: DepositStatus::Pending,
        };
        self.registry.create(&record)?;

        tracing::info!(commitment = %commitment, source = %record.source_chain, "deposit registered");
        Ok(commitment)
    }

    /// Verify a shielded proof and authorize the relay for its commitment.
    ///
    /// Terminal on any verification error; a valid proof consumes the
    /// nullifier and stamps the relay message so the dispatcher may pick the
    /// record up once finalized.
    pub fn authorize_shielded(
        &self,
        commitment: &Commitment,
        proof: &ShieldedProof,
    ) -> Result<(), BridgeError> {
        let record = self.registry.get(commitment)?.ok_or(BridgeError::NotFound)?;
        if record.transfer_kind != TransferKind::Shielded {
            return Err(BridgeError::InputsMismatch);
        }
        if record.status.is_terminal() {
            // A failed/expired deposit can never be relayed; refuse before
            // the nullifier would be burned.
            return Err(BridgeError::InvalidTransition {
                from: record.status,
                to: DepositStatus::Relayed,
            });
        }

        self.verifier.verify_and_consume(proof, &record)?;

        let mut message = self.dispatcher.build_message(&record);
        message.authorized = true;
        self.registry.put_relay_message(&message)?;
        Ok(())
    }

    /// Operator status query.
    pub fn status(&self, commitment: &Commitment) -> Result<Option<StatusReport>, BridgeError> {
        let Some(record) = self.registry.get(commitment)? else {
            return Ok(None);
        };
        let (attempts, last_error) = match self.registry.get_relay_message(commitment)? {
            Some(message) => (message.attempts, message.last_error),
            None => (0, None),
        };
        Ok(Some(StatusReport {
            commitment: *commitment,
            status: record.status,
            attempts,
            last_error,
        }))
    }

    pub fn stats(&self) -> Result<EngineStats, BridgeError> {
        let by_status = self
            .registry
            .status_counts()?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        Ok(EngineStats {
            records: self.registry.len(),
            by_status,
            consumed_nullifiers: self.verifier.consumed_nullifiers(),
        })
    }

    /// Run the watcher tasks and dispatcher pool until shutdown flips.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut handles = Vec::new();

        for settings in &self.config.chains {
            let Some(adapter) = self.adapters.get(&settings.chain_id) else {
                tracing::warn!(chain = %settings.chain_id, "configured chain has no adapter; skipping watcher");
                continue;
            };
            handles.push(tokio::spawn(Self::watch_chain(
                adapter.clone(),
                settings.clone(),
                self.registry.clone(),
                self.tracker.clone(),
                shutdown.clone(),
            )));
        }

        for worker in 0..self.config.dispatch_workers.max(1) {
            handles.push(tokio::spawn(
                self.dispatcher.clone().run_worker(worker, shutdown.clone()),
            ));
        }

        tracing::info!(
            chains = self.adapters.len(),
            workers = self.config.dispatch_workers.max(1),
            "relay engine running"
        );

        for joined in futures::future::join_all(handles).await {
            joined?;
        }
        self.registry.flush()?;
        Ok(())
    }

    /// Per-chain watcher: ingest new deposit events, then run a finality
    /// pass. Chains never block each other.
    async fn watch_chain(
        adapter: Arc<dyn ChainAdapter>,
        settings: ChainSettings,
        registry: CommitmentRegistry,
        tracker: Arc<FinalityTracker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(chain = %settings.chain_id, name = %settings.name, "chain watcher started");
        let mut interval = tokio::time::interval(settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cursor = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match adapter.fetch_events_since(cursor).await {
                Ok(batch) => {
                    cursor = batch.next_cursor;
                    for event in batch.events {
                        if !settings.asset_allowed(&event.asset) {
                            tracing::warn!(
                                chain = %settings.chain_id,
                                asset = %event.asset,
                                "ignoring deposit in non-allowlisted asset"
                            );
                            continue;
                        }
                        let record = DepositRecord {
                            commitment: event.commitment,
                            source_chain: event.source_chain,
                            dest_chain: event.dest_chain,
                            asset: event.asset,
                            amount: event.amount,
                            depositor: event.depositor,
                            recipient_hint: event.recipient_hint,
                            transfer_kind: event.transfer_kind,
                            source_block: event.block_height,
                            source_block_hash: event.block_hash,
                            created_at: chrono::Utc::now().timestamp(),
                            status: DepositStatus::Pending,
                        };
                        match registry.create(&record) {
                            Ok(()) => {
                                tracing::info!(
                                    commitment = %record.commitment,
                                    chain = %settings.chain_id,
                                    "deposit observed"
                                );
                            }
                            // Already registered via submit_deposit or a
                            // previous poll
                            Err(BridgeError::DuplicateCommitment) => {}
                            Err(e) => {
                                tracing::error!(chain = %settings.chain_id, error = %e, "failed to record deposit");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(chain = %settings.chain_id, error = %e, "event fetch failed; will retry");
                }
            }

            if let Err(e) = tracker
                .poll_chain(adapter.as_ref(), &registry, &settings)
                .await
            {
                tracing::warn!(chain = %settings.chain_id, error = %e, "finality pass failed; will retry");
            }
        }

        tracing::info!(chain = %settings.chain_id, "chain watcher stopped");
    }
}

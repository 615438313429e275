//! Relay Dispatcher - exactly-once delivery of finalized deposits
//!
//! Workers drain `Finalized` records (and resume `Relayed` ones after a
//! restart), submit the signed relay message to the destination adapter and
//! walk the record to `Completed`. Retries on `Unreachable`/`TimedOut` use
//! bounded exponential backoff with the attempt count persisted after every
//! try, so a crash mid-retry resumes at the right attempt.
//!
//! `AlreadyProcessed` from the destination hub counts as success: the
//! commitment is the hub's idempotency key, which converts at-least-once
//! submission into exactly-once effect. Two submissions for one commitment
//! are never in flight concurrently (single-flight guard).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use tokio::sync::watch;

use bridge_core::{
    BridgeError, ChainId, Commitment, DepositRecord, DepositStatus, RelayAttestation,
    RelayMessage, TransferKind,
};
use bridge_registry::CommitmentRegistry;
use chain_adapter::{AdapterError, ChainAdapter, InclusionStatus};

use crate::config::{ChainSettings, EngineConfig};

/// Removes the in-flight claim when a worker is done with a commitment.
struct InflightGuard<'a> {
    inflight: &'a DashMap<Commitment, ()>,
    commitment: Commitment,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.commitment);
    }
}

pub struct RelayDispatcher {
    registry: CommitmentRegistry,
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    config: EngineConfig,
    signer: Arc<SigningKey>,
    inflight: DashMap<Commitment, ()>,
}

impl RelayDispatcher {
    pub fn new(
        registry: CommitmentRegistry,
        adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
        config: EngineConfig,
        signer: Arc<SigningKey>,
    ) -> Self {
        Self {
            registry,
            adapters,
            config,
            signer,
            inflight: DashMap::new(),
        }
    }

    /// Build the signed relay message for a deposit record.
    ///
    /// Transparent transfers are authorized at build time; shielded ones
    /// stay unauthorized until the verifier stamps them.
    pub fn build_message(&self, record: &DepositRecord) -> RelayMessage {
        let mut attestation = RelayAttestation::new(
            record.commitment,
            record.dest_chain,
            record.asset.clone(),
            record.amount,
            record.recipient_hint.clone(),
        );
        attestation.sign(&self.signer);
        RelayMessage::new(
            record.commitment,
            record.dest_chain,
            attestation.to_bytes(),
            record.transfer_kind == TransferKind::Transparent,
        )
    }

    fn try_claim(&self, commitment: Commitment) -> Option<InflightGuard<'_>> {
        match self.inflight.entry(commitment) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(InflightGuard {
                    inflight: &self.inflight,
                    commitment,
                })
            }
        }
    }

    /// Worker loop: drain eligible records until shutdown.
    pub async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::debug!(worker, "dispatch worker started");
        let mut interval = tokio::time::interval(self.config.dispatch_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.drain_once(&mut shutdown).await {
                tracing::error!(worker, error = %e, "dispatch pass failed");
            }
        }
        tracing::debug!(worker, "dispatch worker stopped");
    }

    async fn drain_once(&self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut candidates: Vec<Commitment> = Vec::new();

        for record in self.registry.list_by_status(DepositStatus::Finalized) {
            candidates.push(record?.commitment);
        }
        // Relayed records with live bookkeeping are in-flight relays cut off
        // by a restart; resubmission is safe behind the hub's idempotency.
        for record in self.registry.list_by_status(DepositStatus::Relayed) {
            let record = record?;
            if self.registry.has_active_relay(&record.commitment)? {
                candidates.push(record.commitment);
            }
        }

        for commitment in candidates {
            if *shutdown.borrow() {
                break;
            }
            self.process_record(commitment, shutdown).await?;
        }
        Ok(())
    }

    /// Drive one record as far as it will go: submit, await inclusion, and
    /// transition through `Relayed` to `Completed`, or to `Failed` when the
    /// attempt bound is exhausted or the destination rejects outright.
    async fn process_record(
        &self,
        commitment: Commitment,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let Some(_guard) = self.try_claim(commitment) else {
            return Ok(());
        };

        let Some(record) = self.registry.get(&commitment)? else {
            return Ok(());
        };
        if !matches!(
            record.status,
            DepositStatus::Finalized | DepositStatus::Relayed
        ) {
            return Ok(());
        }

        let Some(settings) = self.config.chain(record.dest_chain) else {
            tracing::warn!(commitment = %commitment, dest = %record.dest_chain, "destination chain not configured");
            return Ok(());
        };
        let Some(adapter) = self.adapters.get(&record.dest_chain) else {
            tracing::warn!(commitment = %commitment, dest = %record.dest_chain, "no adapter for destination chain");
            return Ok(());
        };

        let mut message = match self.registry.get_relay_message(&commitment)? {
            Some(message) => message,
            None => {
                if record.transfer_kind == TransferKind::Shielded {
                    // Awaiting proof authorization
                    return Ok(());
                }
                let message = self.build_message(&record);
                self.registry.put_relay_message(&message)?;
                message
            }
        };
        if !message.authorized {
            return Ok(());
        }

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // Refresh status: a reorg may have forced the record to Failed
            // while we were backing off.
            let Some(current) = self.registry.get(&commitment)? else {
                return Ok(());
            };
            let status = current.status;
            if !matches!(status, DepositStatus::Finalized | DepositStatus::Relayed) {
                return Ok(());
            }

            if message.attempts >= settings.retry.max_attempts {
                self.fail_record(&commitment, status, &message)?;
                return Ok(());
            }

            let submitted =
                tokio::time::timeout(settings.submit_timeout, adapter.submit(&message)).await;
            let outcome = match submitted {
                Ok(outcome) => outcome,
                Err(_) => Err(AdapterError::TimedOut),
            };

            match outcome {
                Ok(receipt) => {
                    message.record_attempt(None);
                    self.registry.put_relay_message(&message)?;
                    if status == DepositStatus::Finalized
                        && !self.mark_relayed(&commitment)?
                    {
                        return Ok(());
                    }

                    match adapter
                        .wait_for_inclusion(receipt, settings.inclusion_timeout)
                        .await
                    {
                        Ok(InclusionStatus::Confirmed) => {
                            self.complete(&commitment, &message)?;
                            return Ok(());
                        }
                        Err(AdapterError::AlreadyProcessed) => {
                            self.complete(&commitment, &message)?;
                            return Ok(());
                        }
                        Ok(InclusionStatus::TimedOut)
                        | Err(AdapterError::TimedOut)
                        | Err(AdapterError::Unreachable(_)) => {
                            message.last_error = Some("inclusion timed out".to_string());
                            self.registry.put_relay_message(&message)?;
                            if !self
                                .backoff(settings, message.attempts, shutdown)
                                .await
                            {
                                return Ok(());
                            }
                        }
                        Err(AdapterError::Rejected(reason)) => {
                            message.last_error = Some(reason);
                            self.registry.put_relay_message(&message)?;
                            self.fail_record(&commitment, DepositStatus::Relayed, &message)?;
                            return Ok(());
                        }
                    }
                }
                Err(AdapterError::AlreadyProcessed) => {
                    // The destination has the effect; converge to Completed.
                    message.record_attempt(None);
                    self.registry.put_relay_message(&message)?;
                    if status == DepositStatus::Finalized
                        && !self.mark_relayed(&commitment)?
                    {
                        return Ok(());
                    }
                    self.complete(&commitment, &message)?;
                    return Ok(());
                }
                Err(error @ (AdapterError::Unreachable(_) | AdapterError::TimedOut)) => {
                    message.record_attempt(Some(error.to_string()));
                    self.registry.put_relay_message(&message)?;
                    tracing::warn!(
                        commitment = %commitment,
                        attempt = message.attempts,
                        max = settings.retry.max_attempts,
                        error = %error,
                        "submission attempt failed"
                    );
                    if message.attempts >= settings.retry.max_attempts {
                        self.fail_record(&commitment, status, &message)?;
                        return Ok(());
                    }
                    if !self.backoff(settings, message.attempts, shutdown).await {
                        return Ok(());
                    }
                }
                Err(AdapterError::Rejected(reason)) => {
                    message.record_attempt(Some(reason.clone()));
                    self.registry.put_relay_message(&message)?;
                    tracing::error!(
                        commitment = %commitment,
                        reason = %reason,
                        "destination rejected relay"
                    );
                    self.fail_record(&commitment, status, &message)?;
                    return Ok(());
                }
            }
        }
    }

    /// Sleep out the backoff; returns false if shutdown interrupted it.
    async fn backoff(
        &self,
        settings: &ChainSettings,
        attempt: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let backoff = settings.retry.backoff_for(attempt);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => true,
            _ = shutdown.changed() => false,
        }
    }

    /// Finalized -> Relayed; false when a concurrent transition aborted us.
    fn mark_relayed(&self, commitment: &Commitment) -> Result<bool, BridgeError> {
        match self
            .registry
            .transition(commitment, DepositStatus::Finalized, DepositStatus::Relayed)
        {
            Ok(()) => Ok(true),
            Err(BridgeError::InvalidTransition { .. }) => {
                tracing::warn!(commitment = %commitment, "lost transition race after submit");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn complete(
        &self,
        commitment: &Commitment,
        message: &RelayMessage,
    ) -> Result<(), BridgeError> {
        match self
            .registry
            .transition(commitment, DepositStatus::Relayed, DepositStatus::Completed)
        {
            Ok(()) => {
                self.registry.archive_relay_message(commitment)?;
                tracing::info!(
                    commitment = %commitment,
                    attempts = message.attempts,
                    "relay completed"
                );
                Ok(())
            }
            Err(BridgeError::InvalidTransition { .. }) => {
                tracing::warn!(commitment = %commitment, "completion lost a transition race");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn fail_record(
        &self,
        commitment: &Commitment,
        status: DepositStatus,
        message: &RelayMessage,
    ) -> Result<(), BridgeError> {
        match self
            .registry
            .transition(commitment, status, DepositStatus::Failed)
        {
            Ok(()) => {
                tracing::error!(
                    commitment = %commitment,
                    attempts = message.attempts,
                    last_error = message.last_error.as_deref().unwrap_or("none"),
                    "relay failed; surfaced for operator handling"
                );
                Ok(())
            }
            Err(BridgeError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

//! Commitment registry over sled
//!
//! One tree holds deposit records keyed by commitment, a second holds the
//! relay bookkeeping for records in flight. Values are bincode-encoded.
//! Status transitions use sled's compare-and-swap so concurrent watchers
//! and dispatchers race safely: the loser of a race gets `InvalidTransition`
//! and aborts its operation without corrupting the record.

use std::collections::HashMap;
use std::path::Path;

use bridge_core::{BridgeError, Commitment, DepositRecord, DepositStatus, RelayMessage};

use crate::NullifierSet;

fn store_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Store(e.to_string())
}

/// Durable registry of deposit records and relay messages.
#[derive(Clone)]
pub struct CommitmentRegistry {
    db: sled::Db,
    deposits: sled::Tree,
    relay_messages: sled::Tree,
    relay_archive: sled::Tree,
    nullifiers: sled::Tree,
}

impl CommitmentRegistry {
    /// Open or create a registry at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let db = sled::open(&path).map_err(store_err)?;
        let deposits = db.open_tree("deposits").map_err(store_err)?;
        let relay_messages = db.open_tree("relay_messages").map_err(store_err)?;
        let relay_archive = db.open_tree("relay_archive").map_err(store_err)?;
        let nullifiers = db.open_tree("nullifiers").map_err(store_err)?;

        tracing::info!("opened commitment registry at {:?}", path.as_ref());

        Ok(Self {
            db,
            deposits,
            relay_messages,
            relay_archive,
            nullifiers,
        })
    }

    /// The nullifier set sharing this registry's database.
    pub fn nullifier_set(&self) -> NullifierSet {
        NullifierSet::new(self.nullifiers.clone())
    }

    /// Register a new deposit record.
    ///
    /// Fails with `DuplicateCommitment` if the commitment is already known;
    /// the insert is a compare-and-swap from absent, so two concurrent
    /// watchers observing the same event cannot both create it.
    pub fn create(&self, record: &DepositRecord) -> Result<(), BridgeError> {
        let value = bincode::serialize(record).map_err(store_err)?;
        self.deposits
            .compare_and_swap(
                record.commitment.as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )
            .map_err(store_err)?
            .map_err(|_| BridgeError::DuplicateCommitment)?;
        Ok(())
    }

    /// Fetch a record by commitment.
    pub fn get(&self, commitment: &Commitment) -> Result<Option<DepositRecord>, BridgeError> {
        match self.deposits.get(commitment.as_bytes()).map_err(store_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    /// Transition a record from `from` to `to` with compare-and-set
    /// semantics.
    ///
    /// Fails with `InvalidTransition` when the edge is not in the legal
    /// graph, when the stored status is not `from`, or when a concurrent
    /// transition won the race.
    pub fn transition(
        &self,
        commitment: &Commitment,
        from: DepositStatus,
        to: DepositStatus,
    ) -> Result<(), BridgeError> {
        if !from.can_transition_to(to) {
            return Err(BridgeError::InvalidTransition { from, to });
        }

        let old_bytes = self
            .deposits
            .get(commitment.as_bytes())
            .map_err(store_err)?
            .ok_or(BridgeError::NotFound)?;
        let mut record: DepositRecord =
            bincode::deserialize(&old_bytes).map_err(store_err)?;

        if record.status != from {
            return Err(BridgeError::InvalidTransition {
                from: record.status,
                to,
            });
        }

        record.status = to;
        let new_bytes = bincode::serialize(&record).map_err(store_err)?;
        self.deposits
            .compare_and_swap(
                commitment.as_bytes(),
                Some(old_bytes),
                Some(new_bytes),
            )
            .map_err(store_err)?
            .map_err(|_| BridgeError::InvalidTransition { from, to })?;

        tracing::debug!(commitment = %commitment, %from, %to, "status transition");
        Ok(())
    }

    /// Lazy, restartable scan of records in a given status.
    pub fn list_by_status(
        &self,
        status: DepositStatus,
    ) -> impl Iterator<Item = Result<DepositRecord, BridgeError>> {
        self.deposits.iter().filter_map(move |item| match item {
            Ok((_, bytes)) => match bincode::deserialize::<DepositRecord>(&bytes) {
                Ok(record) if record.status == status => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => Some(Err(store_err(e))),
            },
            Err(e) => Some(Err(store_err(e))),
        })
    }

    /// Count records per status, for the operator stats surface.
    pub fn status_counts(&self) -> Result<HashMap<DepositStatus, u64>, BridgeError> {
        let mut counts = HashMap::new();
        for item in self.deposits.iter() {
            let (_, bytes) = item.map_err(store_err)?;
            let record: DepositRecord = bincode::deserialize(&bytes).map_err(store_err)?;
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Persist relay bookkeeping for a commitment.
    ///
    /// The dispatcher's single-flight rule guarantees one writer per
    /// commitment, so a plain insert is sufficient here.
    pub fn put_relay_message(&self, message: &RelayMessage) -> Result<(), BridgeError> {
        let value = bincode::serialize(message).map_err(store_err)?;
        self.relay_messages
            .insert(message.commitment.as_bytes(), value)
            .map_err(store_err)?;
        Ok(())
    }

    /// Active bookkeeping first, then the archive, so attempt counts stay
    /// readable after completion.
    pub fn get_relay_message(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<RelayMessage>, BridgeError> {
        let bytes = match self
            .relay_messages
            .get(commitment.as_bytes())
            .map_err(store_err)?
        {
            Some(bytes) => Some(bytes),
            None => self
                .relay_archive
                .get(commitment.as_bytes())
                .map_err(store_err)?,
        };
        match bytes {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    /// Move the relay bookkeeping out of the active tree once the
    /// destination acknowledged.
    pub fn archive_relay_message(&self, commitment: &Commitment) -> Result<(), BridgeError> {
        if let Some(bytes) = self
            .relay_messages
            .remove(commitment.as_bytes())
            .map_err(store_err)?
        {
            self.relay_archive
                .insert(commitment.as_bytes(), bytes)
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Whether the commitment still has active (unarchived) relay
    /// bookkeeping.
    pub fn has_active_relay(&self, commitment: &Commitment) -> Result<bool, BridgeError> {
        Ok(self
            .relay_messages
            .get(commitment.as_bytes())
            .map_err(store_err)?
            .is_some())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), BridgeError> {
        self.db.flush().map_err(store_err)?;
        Ok(())
    }

    /// Number of deposit records.
    pub fn len(&self) -> usize {
        self.deposits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty()
    }
}

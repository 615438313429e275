//! Core types for deposits, commitments and the status graph

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{BridgeError, COMMITMENT_DOMAIN, DIGEST_LEN, NULLIFIER_DOMAIN};

/// Numeric chain identifier (EVM chain id, or an assigned id for
/// non-EVM chains).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

/// 32-byte deposit commitment.
///
/// The commitment binds a secret pre-image to the transfer parameters and
/// serves as the idempotency key for the whole deposit lifecycle. It must be
/// unique per (source chain, nonce) and is never reused.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct Commitment(#[serde(with = "hex_array")] pub [u8; DIGEST_LEN]);

impl Commitment {
    /// Derive a commitment from a secret pre-image and the transfer
    /// parameters.
    pub fn derive(
        preimage: &[u8; DIGEST_LEN],
        asset: &str,
        amount: u64,
        source_chain: ChainId,
        dest_chain: ChainId,
        nonce: u64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(COMMITMENT_DOMAIN);
        hasher.update(preimage);
        hasher.update(asset.as_bytes());
        hasher.update(&amount.to_le_bytes());
        hasher.update(&source_chain.0.to_le_bytes());
        hasher.update(&dest_chain.0.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        Commitment(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(&self.0[..8]))
    }
}

impl FromStr for Commitment {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BridgeError::MalformedDigest)?;
        let arr: [u8; DIGEST_LEN] =
            bytes.try_into().map_err(|_| BridgeError::MalformedDigest)?;
        Ok(Commitment(arr))
    }
}

/// Single-use nullifier for shielded notes.
///
/// Consumption of a nullifier is what prevents a shielded note from being
/// spent twice; the consumed set only ever grows.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Nullifier(#[serde(with = "hex_array")] pub [u8; DIGEST_LEN]);

impl Nullifier {
    /// Derive a nullifier from the note pre-image.
    pub fn derive(preimage: &[u8; DIGEST_LEN]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update(preimage);
        Nullifier(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", hex::encode(&self.0[..8]))
    }
}

/// Kind of transfer a deposit represents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Plaintext transfer; recipient and amount are visible on both chains.
    Transparent,
    /// Privacy-preserving transfer; relay requires a valid zero-knowledge
    /// proof and an unused nullifier.
    Shielded,
}

/// Lifecycle state of a deposit record.
///
/// Legal transitions:
/// `Pending -> Finalized -> Relayed -> Completed`,
/// `Pending -> Expired`, `Finalized -> Failed`, `Relayed -> Failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Observed on the source chain, awaiting finality.
    Pending,
    /// Source-chain finality reached; eligible for relay.
    Finalized,
    /// Submitted to the destination chain, awaiting inclusion.
    Relayed,
    /// Destination chain acknowledged; terminal success.
    Completed,
    /// Never finalized within the configured window; terminal.
    Expired,
    /// Relay aborted (reorg, rejection, retries exhausted); terminal,
    /// surfaced for operator/refund handling.
    Failed,
}

impl DepositStatus {
    /// Whether `self -> to` is an edge of the legal transition graph.
    pub fn can_transition_to(self, to: DepositStatus) -> bool {
        use DepositStatus::*;
        matches!(
            (self, to),
            (Pending, Finalized)
                | (Pending, Expired)
                | (Finalized, Relayed)
                | (Finalized, Failed)
                | (Relayed, Completed)
                | (Relayed, Failed)
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DepositStatus::Completed | DepositStatus::Expired | DepositStatus::Failed
        )
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Finalized => "finalized",
            DepositStatus::Relayed => "relayed",
            DepositStatus::Completed => "completed",
            DepositStatus::Expired => "expired",
            DepositStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Durable record of a deposit intent.
///
/// Everything except `status` is immutable once created; the registry is the
/// sole owner and all mutation goes through its compare-and-set transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub commitment: Commitment,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    /// Asset identifier in source-chain terms (address or symbol).
    pub asset: String,
    /// Amount in the asset's smallest unit.
    pub amount: u64,
    pub depositor: String,
    /// Opaque for shielded transfers; destination address bytes otherwise.
    pub recipient_hint: Vec<u8>,
    pub transfer_kind: TransferKind,
    /// Source block the deposit event was observed in.
    pub source_block: u64,
    /// Hash of that block at observation time, for reorg detection.
    pub source_block_hash: [u8; 32],
    /// Unix seconds at record creation.
    pub created_at: i64,
    pub status: DepositStatus,
}

impl DepositRecord {
    /// Binding digest over the immutable transfer parameters.
    ///
    /// Shielded proofs must commit to this value in their public inputs;
    /// the verifier rejects proofs bound to different parameters with
    /// `InputsMismatch`.
    pub fn binding_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.commitment.as_bytes());
        hasher.update(self.asset.as_bytes());
        hasher.update(&self.amount.to_le_bytes());
        hasher.update(&self.dest_chain.0.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Proof envelope attached to a shielded transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedProof {
    /// Digest binding the proof's public inputs.
    pub public_inputs_root: [u8; 32],
    /// Opaque proof bytes, interpreted by the configured proof system.
    pub proof_bytes: Vec<u8>,
    pub nullifier: Nullifier,
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

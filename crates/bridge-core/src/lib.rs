//! Bridge Core - Shared data model for the relay protocol
//!
//! This crate defines the types every other crate speaks:
//! - Commitments, nullifiers and their derivation
//! - Deposit records and the legal status graph
//! - Relay messages (borsh payload + ed25519 attestation)
//! - The bridge error taxonomy

pub mod error;
pub mod message;
pub mod types;

pub use error::BridgeError;
pub use message::{RelayAttestation, RelayMessage};
pub use types::{
    ChainId, Commitment, DepositRecord, DepositStatus, Nullifier, ShieldedProof, TransferKind,
};

/// Byte length of commitments and nullifiers.
pub const DIGEST_LEN: usize = 32;

/// Domain separator for commitment derivation.
pub const COMMITMENT_DOMAIN: &[u8] = b"veilbridge.commitment.v1";

/// Domain separator for nullifier derivation.
pub const NULLIFIER_DOMAIN: &[u8] = b"veilbridge.nullifier.v1";

/// Domain separator for relay attestation hashing.
pub const ATTESTATION_DOMAIN: &[u8] = b"veilbridge.attestation.v1";

//! Bridge error taxonomy

use thiserror::Error;

use crate::types::DepositStatus;

/// Errors surfaced by the registry, verifier and engine.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("commitment already registered")]
    DuplicateCommitment,

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: DepositStatus,
        to: DepositStatus,
    },

    #[error("commitment not found")]
    NotFound,

    #[error("nullifier already consumed")]
    NullifierReused,

    #[error("proof verification failed: {0}")]
    ProofInvalid(String),

    #[error("proof public inputs do not match deposit record")]
    InputsMismatch,

    #[error("source chain reorganization invalidated a finalized record")]
    ReorgDetected,

    #[error("malformed 32-byte digest")]
    MalformedDigest,

    #[error("attestation signature invalid")]
    BadAttestation,

    #[error("store error: {0}")]
    Store(String),
}

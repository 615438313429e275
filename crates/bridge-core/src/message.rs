//! Relay messages and the attestation wire format
//!
//! The attestation is the payload a destination hub contract receives: the
//! transfer parameters bound to the commitment, hashed with blake3 and
//! signed by the relayer's ed25519 identity key. Hubs check the signature
//! and reject any commitment they have already processed.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{BridgeError, ChainId, Commitment, ATTESTATION_DOMAIN};

/// Signed payload submitted to the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RelayAttestation {
    pub commitment: Commitment,
    pub dest_chain: ChainId,
    pub asset: String,
    pub amount: u64,
    /// Opaque recipient bytes; never interpreted by the relayer.
    pub recipient_hint: Vec<u8>,
    /// Unix millis at attestation build time.
    pub issued_at: u64,
    /// Relayer's ed25519 signature over `compute_hash()`.
    pub signature: Vec<u8>,
}

impl RelayAttestation {
    pub fn new(
        commitment: Commitment,
        dest_chain: ChainId,
        asset: String,
        amount: u64,
        recipient_hint: Vec<u8>,
    ) -> Self {
        Self {
            commitment,
            dest_chain,
            asset,
            amount,
            recipient_hint,
            issued_at: chrono::Utc::now().timestamp_millis() as u64,
            signature: Vec::new(),
        }
    }

    /// Compute the hash covered by the signature.
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ATTESTATION_DOMAIN);
        hasher.update(self.commitment.as_bytes());
        hasher.update(&self.dest_chain.0.to_le_bytes());
        hasher.update(self.asset.as_bytes());
        hasher.update(&self.amount.to_le_bytes());
        hasher.update(&self.recipient_hint);
        hasher.update(&self.issued_at.to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Sign with the relayer identity key.
    pub fn sign(&mut self, key: &SigningKey) {
        let signature = key.sign(&self.compute_hash());
        self.signature = signature.to_bytes().to_vec();
    }

    /// Verify the attestation signature against a relayer public key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), BridgeError> {
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| BridgeError::BadAttestation)?;
        key.verify(&self.compute_hash(), &signature)
            .map_err(|_| BridgeError::BadAttestation)
    }

    /// Serialize for submission.
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("attestation serialization should not fail")
    }

    /// Deserialize a received attestation.
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Relay bookkeeping for one finalized deposit.
///
/// Persisted in the registry so a crash mid-retry resumes with the correct
/// attempt count; archived once the destination acknowledges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub commitment: Commitment,
    pub dest_chain: ChainId,
    /// Borsh-encoded signed attestation.
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Set once the shielded verifier has authorized this relay.
    /// Transparent transfers are authorized at build time.
    pub authorized: bool,
}

impl RelayMessage {
    pub fn new(commitment: Commitment, dest_chain: ChainId, payload: Vec<u8>, authorized: bool) -> Self {
        Self {
            commitment,
            dest_chain,
            payload,
            attempts: 0,
            last_error: None,
            authorized,
        }
    }

    pub fn attestation(&self) -> Result<RelayAttestation, borsh::io::Error> {
        RelayAttestation::from_bytes(&self.payload)
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn sample_attestation() -> RelayAttestation {
        RelayAttestation::new(
            Commitment([3u8; 32]),
            ChainId(8453),
            "eth".to_string(),
            100_000_000_000_000_000,
            vec![0xde, 0xad],
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let mut attestation = sample_attestation();
        attestation.sign(&key);

        assert!(attestation.verify(&key.verifying_key()).is_ok());

        let other = SigningKey::generate(&mut OsRng);
        assert!(attestation.verify(&other.verifying_key()).is_err());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let mut attestation = sample_attestation();
        attestation.sign(&key);

        attestation.amount += 1;
        assert!(attestation.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let mut attestation = sample_attestation();
        attestation.sign(&key);

        let decoded = RelayAttestation::from_bytes(&attestation.to_bytes()).unwrap();
        assert_eq!(attestation, decoded);
        assert!(decoded.verify(&key.verifying_key()).is_ok());
    }

    #[test]
    fn test_attempt_bookkeeping() {
        let mut message =
            RelayMessage::new(Commitment([1u8; 32]), ChainId(1), vec![], true);
        assert_eq!(message.attempts, 0);

        message.record_attempt(Some("unreachable".to_string()));
        message.record_attempt(None);
        assert_eq!(message.attempts, 2);
        assert!(message.last_error.is_none());
    }
}

//! Shielded Proof Verifier
//!
//! Gates shielded relays behind proof validity and single-use nullifiers.
//! Check order: nullifier freshness, cryptographic validity, public-input
//! binding to the deposit record. Only then is the nullifier consumed,
//! atomically with the check - the registry's compare-and-swap is the
//! serialization point, so concurrent verifications of one nullifier have
//! exactly one winner.
//!
//! The interface never exposes sender identity or amounts; logs carry only
//! the nullifier and the outcome.

use bridge_core::{BridgeError, DepositRecord, ShieldedProof};
use bridge_registry::NullifierSet;

/// Wire length of a proof envelope.
pub const PROOF_LEN: usize = 768;

/// Domain separator for the structural digest verifier.
const PROOF_DOMAIN: &[u8] = b"veilbridge.proof.digest.v1";

/// Pluggable proof backend.
pub trait ProofSystem: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify `proof_bytes` against the stated public-inputs root.
    fn verify(&self, proof_bytes: &[u8], public_inputs_root: &[u8; 32])
        -> Result<(), BridgeError>;
}

/// Structural digest verifier used by default builds.
///
/// Checks the envelope layout and that the proof commits to the stated
/// public-inputs root. Enable the `real-crypto` feature for pairing-based
/// Groth16 verification.
pub struct DigestProofSystem;

impl DigestProofSystem {
    fn tag(public_inputs_root: &[u8; 32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(public_inputs_root);
        *hasher.finalize().as_bytes()
    }

    /// Produce an envelope this system accepts; the local harness's stand-in
    /// for a real prover.
    pub fn prove(public_inputs_root: &[u8; 32]) -> Vec<u8> {
        let mut proof = vec![0u8; PROOF_LEN];
        proof[..32].copy_from_slice(&Self::tag(public_inputs_root));
        proof
    }
}

impl ProofSystem for DigestProofSystem {
    fn name(&self) -> &'static str {
        "digest"
    }

    fn verify(
        &self,
        proof_bytes: &[u8],
        public_inputs_root: &[u8; 32],
    ) -> Result<(), BridgeError> {
        if proof_bytes.len() != PROOF_LEN {
            return Err(BridgeError::ProofInvalid(format!(
                "expected {PROOF_LEN}-byte envelope, got {}",
                proof_bytes.len()
            )));
        }
        if proof_bytes[..32] != Self::tag(public_inputs_root) {
            return Err(BridgeError::ProofInvalid(
                "proof does not commit to the stated public inputs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Verifies shielded transfer requests and owns nullifier consumption.
pub struct ShieldedVerifier {
    proof_system: Box<dyn ProofSystem>,
    nullifiers: NullifierSet,
}

impl ShieldedVerifier {
    pub fn new(proof_system: Box<dyn ProofSystem>, nullifiers: NullifierSet) -> Self {
        tracing::info!(proof_system = proof_system.name(), "shielded verifier ready");
        Self {
            proof_system,
            nullifiers,
        }
    }

    /// Validate a shielded proof against its deposit record and consume the
    /// nullifier.
    ///
    /// Verification errors are terminal for the request and never retried.
    pub fn verify_and_consume(
        &self,
        proof: &ShieldedProof,
        record: &DepositRecord,
    ) -> Result<(), BridgeError> {
        if self.nullifiers.contains(&proof.nullifier)? {
            tracing::warn!(nullifier = %proof.nullifier, "rejected: nullifier reused");
            return Err(BridgeError::NullifierReused);
        }

        if let Err(e) = self
            .proof_system
            .verify(&proof.proof_bytes, &proof.public_inputs_root)
        {
            tracing::warn!(nullifier = %proof.nullifier, "rejected: proof invalid");
            return Err(e);
        }

        if proof.public_inputs_root != record.binding_digest() {
            tracing::warn!(nullifier = %proof.nullifier, "rejected: inputs mismatch");
            return Err(BridgeError::InputsMismatch);
        }

        // The compare-and-swap inside `consume` closes the verify-then-consume
        // window; a concurrent winner turns this call into NullifierReused.
        self.nullifiers.consume(&proof.nullifier)?;
        tracing::info!(nullifier = %proof.nullifier, "shielded relay authorized");
        Ok(())
    }

    pub fn consumed_nullifiers(&self) -> usize {
        self.nullifiers.len()
    }
}

#[cfg(feature = "real-crypto")]
pub mod groth16 {
    //! Pairing-based Groth16 verification over BN254.

    use ark_bn254::{Bn254, Fr};
    use ark_ff::PrimeField;
    use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
    use ark_serialize::CanonicalDeserialize;
    use ark_std::io::Cursor;

    use bridge_core::BridgeError;

    use super::ProofSystem;

    /// Groth16 verifier bound to one verifying key.
    pub struct Groth16ProofSystem {
        pvk: PreparedVerifyingKey<Bn254>,
    }

    impl Groth16ProofSystem {
        /// Load from an uncompressed arkworks-serialized verifying key.
        pub fn from_vk_bytes(bytes: &[u8]) -> Result<Self, BridgeError> {
            let vk = VerifyingKey::<Bn254>::deserialize_uncompressed(&mut Cursor::new(bytes))
                .map_err(|e| BridgeError::ProofInvalid(format!("bad verifying key: {e}")))?;
            Ok(Self {
                pvk: PreparedVerifyingKey::from(vk),
            })
        }
    }

    impl ProofSystem for Groth16ProofSystem {
        fn name(&self) -> &'static str {
            "groth16-bn254"
        }

        fn verify(
            &self,
            proof_bytes: &[u8],
            public_inputs_root: &[u8; 32],
        ) -> Result<(), BridgeError> {
            let proof = Proof::<Bn254>::deserialize_uncompressed(&mut Cursor::new(proof_bytes))
                .map_err(|e| BridgeError::ProofInvalid(format!("malformed proof: {e}")))?;
            let input = Fr::from_le_bytes_mod_order(public_inputs_root);

            let ok = Groth16::<Bn254>::verify_proof(&self.pvk, &proof, &[input])
                .map_err(|e| BridgeError::ProofInvalid(format!("verification error: {e}")))?;
            if ok {
                Ok(())
            } else {
                Err(BridgeError::ProofInvalid("pairing check failed".to_string()))
            }
        }
    }
}

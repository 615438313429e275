//! Relay Engine - deposit observation, finality, dispatch and proof gating
//!
//! This crate wires the protocol pipeline:
//! - per-chain watcher tasks ingest deposit events and drive finality
//! - the dispatcher worker pool relays finalized deposits exactly once
//! - the shielded verifier gates privacy-preserving relays behind proof
//!   validity and single-use nullifiers
//!
//! All cross-task coordination flows through the registry's compare-and-set
//! transitions; chains are processed fully independently.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod finality;
pub mod verifier;

pub use config::{ChainSettings, EngineConfig, RetryPolicy};
pub use dispatch::RelayDispatcher;
pub use engine::{EngineStats, RelayEngine, StatusReport, SubmitDeposit};
pub use finality::FinalityTracker;
pub use verifier::{DigestProofSystem, ProofSystem, ShieldedVerifier};

#[cfg(feature = "real-crypto")]
pub use verifier::groth16::Groth16ProofSystem;

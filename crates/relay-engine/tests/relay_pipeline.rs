//! End-to-end pipeline scenarios over simulated chains
//!
//! Each test drives a running engine through the full
//! observe -> finalize -> relay -> complete pipeline using `InMemoryChain`
//! fault injection.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use bridge_core::{
    BridgeError, ChainId, Commitment, DepositStatus, Nullifier, ShieldedProof, TransferKind,
};
use bridge_registry::CommitmentRegistry;
use chain_adapter::{InMemoryChain, SubmitFault};
use relay_engine::{
    ChainSettings, DigestProofSystem, EngineConfig, RelayEngine, RetryPolicy, StatusReport,
};

const SOURCE: ChainId = ChainId(1);
const DEST: ChainId = ChainId(8453);
const CONFIRMATIONS: u64 = 3;

struct Harness {
    registry: CommitmentRegistry,
    source: Arc<InMemoryChain>,
    dest: Arc<InMemoryChain>,
    engine: Arc<RelayEngine>,
    shutdown: watch::Sender<bool>,
    run_handle: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

impl Harness {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.run_handle.await;
    }
}

fn fast_settings(chain_id: ChainId, name: &str, confirmations: u64, max_attempts: u32) -> ChainSettings {
    let mut settings = ChainSettings::new(chain_id, name);
    settings.required_confirmations = confirmations;
    settings.poll_interval = Duration::from_millis(20);
    settings.pending_expiry = Duration::from_secs(3600);
    settings.submit_timeout = Duration::from_secs(1);
    settings.inclusion_timeout = Duration::from_secs(1);
    settings.retry = RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    };
    settings
}

fn spawn_harness(max_attempts: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = CommitmentRegistry::open(dir.path()).unwrap();

    let signer = SigningKey::generate(&mut OsRng);
    let relayer_key = signer.verifying_key();

    let source = Arc::new(InMemoryChain::new(SOURCE, "source-devnet"));
    let dest = Arc::new(InMemoryChain::new(DEST, "dest-devnet").with_relayer_key(relayer_key));

    let config = EngineConfig {
        chains: vec![
            fast_settings(SOURCE, "source-devnet", CONFIRMATIONS, max_attempts),
            fast_settings(DEST, "dest-devnet", 0, max_attempts),
        ],
        dispatch_workers: 2,
        dispatch_interval: Duration::from_millis(20),
    };

    let engine = Arc::new(
        RelayEngine::builder(config)
            .registry(registry.clone())
            .proof_system(Box::new(DigestProofSystem))
            .signer(signer)
            .adapter(source.clone())
            .adapter(dest.clone())
            .build()
            .unwrap(),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(engine.clone().run(shutdown_rx));

    Harness {
        registry,
        source,
        dest,
        engine,
        shutdown,
        run_handle,
        _dir: dir,
    }
}

async fn wait_for_status(
    harness: &Harness,
    commitment: &Commitment,
    status: DepositStatus,
) -> StatusReport {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            if let Some(report) = harness.engine.status(commitment).unwrap() {
                if report.status == status {
                    return report;
                }
                assert!(
                    !report.status.is_terminal() || report.status == status,
                    "record reached terminal state {:?} while waiting for {status:?}",
                    report.status
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status:?} on {commitment}"))
}

fn transparent_deposit(harness: &Harness, seed: u8, amount: u64) -> Commitment {
    let commitment = Commitment([seed; 32]);
    harness.source.deposit(
        commitment,
        DEST,
        "eth",
        amount,
        "0xalice",
        vec![0xbe, 0xef],
        TransferKind::Transparent,
    );
    commitment
}

fn shielded_deposit(harness: &Harness, seed: u8) -> (Commitment, u64) {
    let commitment = Commitment([seed; 32]);
    let (block, _) = harness.source.deposit(
        commitment,
        DEST,
        "eth",
        5_000_000,
        "shielded",
        vec![],
        TransferKind::Shielded,
    );
    (commitment, block)
}

fn proof_for(harness: &Harness, commitment: &Commitment, nullifier: Nullifier) -> ShieldedProof {
    let record = harness.registry.get(commitment).unwrap().unwrap();
    let root = record.binding_digest();
    ShieldedProof {
        public_inputs_root: root,
        proof_bytes: DigestProofSystem::prove(&root),
        nullifier,
    }
}

/// Waits until the engine has ingested the deposit event.
async fn wait_observed(harness: &Harness, commitment: &Commitment) {
    wait_for_status(harness, commitment, DepositStatus::Pending).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deposit_completes_only_after_confirmation_depth() {
    let harness = spawn_harness(3);

    // 0.1 eth in wei
    let commitment = transparent_deposit(&harness, 1, 100_000_000_000_000_000);
    wait_observed(&harness, &commitment).await;

    // Depth not reached: the record must not be promoted
    harness.source.advance_blocks(CONFIRMATIONS - 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let report = harness.engine.status(&commitment).unwrap().unwrap();
    assert_eq!(report.status, DepositStatus::Pending);
    assert_eq!(harness.dest.effect_count(), 0);

    // One more block crosses the safe height; the pipeline runs to the end
    harness.source.advance_blocks(1);
    let report = wait_for_status(&harness, &commitment, DepositStatus::Completed).await;
    assert_eq!(report.attempts, 1);
    assert!(harness.dest.was_processed(&commitment));
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_response_converges_to_exactly_once() {
    let harness = spawn_harness(5);

    // The first submission lands but the response is lost; the retry trips
    // the destination's idempotency check.
    harness
        .dest
        .fail_next_submits([SubmitFault::TimeoutAfterLanding]);

    let commitment = transparent_deposit(&harness, 2, 42_000);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    let report = wait_for_status(&harness, &commitment, DepositStatus::Completed).await;
    assert_eq!(report.attempts, 2);
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn three_timeouts_then_success_counts_four_attempts() {
    let harness = spawn_harness(6);

    harness.dest.fail_next_submits([
        SubmitFault::Timeout,
        SubmitFault::Timeout,
        SubmitFault::Timeout,
    ]);

    let commitment = transparent_deposit(&harness, 3, 42_000);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    let report = wait_for_status(&harness, &commitment, DepositStatus::Completed).await;
    assert_eq!(report.attempts, 4);
    assert!(report.last_error.is_none());
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_the_record() {
    let harness = spawn_harness(2);

    harness
        .dest
        .fail_next_submits([SubmitFault::Unreachable, SubmitFault::Unreachable]);

    let commitment = transparent_deposit(&harness, 4, 42_000);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    let report = wait_for_status(&harness, &commitment, DepositStatus::Failed).await;
    assert_eq!(report.attempts, 2);
    assert!(report.last_error.unwrap().contains("unreachable"));
    assert_eq!(harness.dest.effect_count(), 0);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn destination_rejection_is_terminal() {
    let harness = spawn_harness(5);

    harness
        .dest
        .fail_next_submits([SubmitFault::Rejected("asset not registered".to_string())]);

    let commitment = transparent_deposit(&harness, 5, 42_000);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    let report = wait_for_status(&harness, &commitment, DepositStatus::Failed).await;
    assert_eq!(report.attempts, 1);
    assert!(report.last_error.unwrap().contains("asset not registered"));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shielded_relay_requires_authorization() {
    let harness = spawn_harness(5);

    let (commitment, _) = shielded_deposit(&harness, 6);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    // Finalized but unauthorized: the dispatcher must leave it alone
    wait_for_status(&harness, &commitment, DepositStatus::Finalized).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        harness.engine.status(&commitment).unwrap().unwrap().status,
        DepositStatus::Finalized
    );
    assert_eq!(harness.dest.effect_count(), 0);

    let proof = proof_for(&harness, &commitment, Nullifier([60u8; 32]));
    harness.engine.authorize_shielded(&commitment, &proof).unwrap();

    wait_for_status(&harness, &commitment, DepositStatus::Completed).await;
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_nullifier_is_rejected_and_never_relayed() {
    let harness = spawn_harness(5);

    let (first, _) = shielded_deposit(&harness, 7);
    let (second, _) = shielded_deposit(&harness, 8);
    wait_observed(&harness, &first).await;
    wait_observed(&harness, &second).await;
    harness.source.advance_blocks(CONFIRMATIONS);

    wait_for_status(&harness, &first, DepositStatus::Finalized).await;
    wait_for_status(&harness, &second, DepositStatus::Finalized).await;

    let nullifier = Nullifier([70u8; 32]);
    harness
        .engine
        .authorize_shielded(&first, &proof_for(&harness, &first, nullifier))
        .unwrap();
    wait_for_status(&harness, &first, DepositStatus::Completed).await;

    // Same nullifier on a second note: rejected, and the deposit never moves
    let err = harness
        .engine
        .authorize_shielded(&second, &proof_for(&harness, &second, nullifier))
        .unwrap_err();
    assert!(matches!(err, BridgeError::NullifierReused));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        harness.engine.status(&second).unwrap().unwrap().status,
        DepositStatus::Finalized
    );
    assert!(!harness.dest.was_processed(&second));
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reorg_on_finalized_record_blocks_the_relay() {
    let harness = spawn_harness(5);

    // Shielded and unauthorized, so the record parks in Finalized where the
    // reorg can hit it before any submission happens.
    let (commitment, block) = shielded_deposit(&harness, 9);
    wait_observed(&harness, &commitment).await;
    harness.source.advance_blocks(CONFIRMATIONS);
    wait_for_status(&harness, &commitment, DepositStatus::Finalized).await;

    harness.source.reorg_from(block);
    let report = wait_for_status(&harness, &commitment, DepositStatus::Failed).await;
    assert!(report
        .last_error
        .unwrap()
        .contains("reorganization"));

    // Authorization after the fact must refuse rather than burn the nullifier
    let proof = proof_for(&harness, &commitment, Nullifier([90u8; 32]));
    let err = harness
        .engine
        .authorize_shielded(&commitment, &proof)
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidTransition { .. }));

    assert!(!harness.dest.was_processed(&commitment));
    assert_eq!(harness.dest.effect_count(), 0);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn locally_registered_intent_deduplicates_the_observed_event() {
    let harness = spawn_harness(5);

    let deposit = relay_engine::SubmitDeposit {
        source_chain: SOURCE,
        dest_chain: DEST,
        asset: "eth".to_string(),
        amount: 9_000,
        depositor: "0xalice".to_string(),
        recipient_hint: vec![1],
        transfer_kind: TransferKind::Transparent,
        preimage: [42u8; 32],
    };
    let commitment = harness.engine.submit_deposit(deposit).await.unwrap();

    // The on-chain event for the same commitment arrives later and must not
    // create a second record.
    harness.source.deposit(
        commitment,
        DEST,
        "eth",
        9_000,
        "0xalice",
        vec![1],
        TransferKind::Transparent,
    );
    harness.source.advance_blocks(CONFIRMATIONS);

    wait_for_status(&harness, &commitment, DepositStatus::Completed).await;
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.dest.effect_count(), 1);

    harness.stop().await;
}

//! Engine configuration types

use std::time::Duration;

use bridge_core::ChainId;

/// Bounded exponential backoff for destination submissions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total submission attempts before the record is failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .initial_backoff
            .saturating_mul(1u32 << exp);
        backoff.min(self.max_backoff)
    }
}

/// Per-chain settings consumed by the watchers and the dispatcher.
///
/// Confirmation depth and timeouts are chain-specific: deeper and longer for
/// probabilistic-finality chains, shallow and short for instant-finality
/// ones.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub chain_id: ChainId,
    pub name: String,
    pub required_confirmations: u64,
    /// Watcher poll cadence.
    pub poll_interval: Duration,
    /// Pending records older than this are expired.
    pub pending_expiry: Duration,
    pub submit_timeout: Duration,
    pub inclusion_timeout: Duration,
    pub retry: RetryPolicy,
    /// Assets accepted at ingestion; empty allows all.
    pub asset_allowlist: Vec<String>,
}

impl ChainSettings {
    pub fn new(chain_id: ChainId, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            required_confirmations: 6,
            poll_interval: Duration::from_secs(2),
            pending_expiry: Duration::from_secs(24 * 60 * 60),
            submit_timeout: Duration::from_secs(30),
            inclusion_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            asset_allowlist: Vec::new(),
        }
    }

    pub fn asset_allowed(&self, asset: &str) -> bool {
        self.asset_allowlist.is_empty() || self.asset_allowlist.iter().any(|a| a == asset)
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chains: Vec<ChainSettings>,
    /// Dispatcher worker pool size.
    pub dispatch_workers: usize,
    /// Worker idle sleep between drain passes.
    pub dispatch_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            dispatch_workers: 4,
            dispatch_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

//! Consumed nullifier set
//!
//! The set only grows. Consumption is a compare-and-swap from absent, so
//! concurrent verifications of the same nullifier have exactly one winner;
//! there is no separate check-then-consume window.

use bridge_core::{BridgeError, Nullifier};

fn store_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Store(e.to_string())
}

/// Durable set of consumed nullifiers.
#[derive(Clone)]
pub struct NullifierSet {
    tree: sled::Tree,
}

impl NullifierSet {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Whether the nullifier has already been consumed.
    pub fn contains(&self, nullifier: &Nullifier) -> Result<bool, BridgeError> {
        Ok(self
            .tree
            .get(nullifier.as_bytes())
            .map_err(store_err)?
            .is_some())
    }

    /// Consume the nullifier, failing with `NullifierReused` if it was ever
    /// consumed before. Atomic: exactly one of any number of concurrent
    /// callers succeeds.
    pub fn consume(&self, nullifier: &Nullifier) -> Result<(), BridgeError> {
        let consumed_at = chrono::Utc::now().timestamp().to_le_bytes();
        self.tree
            .compare_and_swap(
                nullifier.as_bytes(),
                None as Option<&[u8]>,
                Some(&consumed_at[..]),
            )
            .map_err(store_err)?
            .map_err(|_| BridgeError::NullifierReused)?;
        Ok(())
    }

    /// Number of consumed nullifiers.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommitmentRegistry;
    use tempfile::tempdir;

    #[test]
    fn test_consume_once() {
        let dir = tempdir().unwrap();
        let registry = CommitmentRegistry::open(dir.path()).unwrap();
        let set = registry.nullifier_set();
        let nullifier = Nullifier([1u8; 32]);

        assert!(!set.contains(&nullifier).unwrap());
        set.consume(&nullifier).unwrap();
        assert!(set.contains(&nullifier).unwrap());

        assert!(matches!(
            set.consume(&nullifier),
            Err(BridgeError::NullifierReused)
        ));
    }

    #[test]
    fn test_concurrent_consumption_has_one_winner() {
        let dir = tempdir().unwrap();
        let registry = CommitmentRegistry::open(dir.path()).unwrap();
        let nullifier = Nullifier([2u8; 32]);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let set = registry.nullifier_set();
            handles.push(std::thread::spawn(move || set.consume(&nullifier).is_ok()));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(registry.nullifier_set().len(), 1);
    }

    #[test]
    fn test_set_survives_reopen() {
        let dir = tempdir().unwrap();
        let nullifier = Nullifier([3u8; 32]);

        {
            let registry = CommitmentRegistry::open(dir.path()).unwrap();
            registry.nullifier_set().consume(&nullifier).unwrap();
            registry.flush().unwrap();
        }

        let registry = CommitmentRegistry::open(dir.path()).unwrap();
        assert!(registry.nullifier_set().contains(&nullifier).unwrap());
    }
}

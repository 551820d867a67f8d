use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use milky_core::ApiKey;

/// Round-robin credential selector.
///
/// Every call to [`CredentialRing::next`] hands out the credential at the
/// current index and advances the index, whether the attempt that follows
/// succeeds or not.
#[derive(Debug)]
pub struct CredentialRing {
    keys: Vec<ApiKey>,
    index: AtomicUsize,
    selections: Vec<AtomicU64>,
}

impl CredentialRing {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        let selections = keys.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            keys,
            index: AtomicUsize::new(0),
            selections,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Select the current credential and advance. `None` when empty.
    pub fn next(&self) -> Option<(usize, &ApiKey)> {
        let n = self.keys.len();
        if n == 0 {
            return None;
        }
        let slot = match self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % n))
        {
            Ok(prev) | Err(prev) => prev % n,
        };
        self.selections[slot].fetch_add(1, Ordering::Relaxed);
        Some((slot, &self.keys[slot]))
    }

    /// Index the next call will select.
    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// How many times each credential has been handed out.
    pub fn selections(&self) -> Vec<u64> {
        self.selections
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

//! Global memory governor.
//!
//! The governor is a single ledger of bytes granted to stream queues,
//! bounded by a fixed maximum. Grants are handed out in fixed-size blocks
//! and only raise queue ceilings: nothing is pre-allocated. Bytes come back
//! through [`MemoryGovernor::release`] once a flushed batch is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide arbiter of the buffering byte budget.
///
/// All operations are lock-free and safe to call from many tasks.
#[derive(Debug)]
pub struct MemoryGovernor {
    max_bytes: u64,
    block_size_bytes: u64,
    used_bytes: AtomicU64,
}

impl MemoryGovernor {
    /// Creates a governor with the given ceiling and grant size.
    ///
    /// # Panics
    /// Panics if either argument is zero.
    #[must_use]
    pub fn new(max_bytes: u64, block_size_bytes: u64) -> Self {
        assert!(max_bytes > 0, "memory ceiling must be positive");
        assert!(block_size_bytes > 0, "block size must be positive");
        Self {
            max_bytes,
            block_size_bytes,
            used_bytes: AtomicU64::new(0),
        }
    }

    /// Requests one block of budget.
    ///
    /// Returns the block size, the remaining headroom if that is smaller,
    /// or zero when the ledger is exhausted. Zero is not an error.
    pub fn request_grant(&self) -> u64 {
        let mut granted = 0;
        // The closure only returns None when there is no headroom.
        let _ = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let headroom = self.max_bytes.saturating_sub(used);
                granted = headroom.min(self.block_size_bytes);
                if granted == 0 {
                    None
                } else {
                    Some(used + granted)
                }
            });
        granted
    }

    /// Returns bytes to the ledger.
    ///
    /// # Panics
    /// Panics if more bytes are released than are currently granted.
    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let result = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_sub(bytes)
            });
        if let Err(used) = result {
            panic!("released {bytes} bytes but only {used} are granted");
        }
    }

    /// Returns bytes currently granted.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Returns the ledger maximum.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Returns the grant block size.
    #[must_use]
    pub const fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes
    }

    /// Returns bytes that can still be granted.
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.max_bytes.saturating_sub(self.used_bytes())
    }

    /// Returns `used / max`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_ratio(&self) -> f64 {
        self.used_bytes() as f64 / self.max_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::MIB;
    use std::sync::Arc;

    #[test]
    fn test_grants_until_exhausted() {
        let governor = MemoryGovernor::new(100 * MIB, 10 * MIB);

        for _ in 0..9 {
            assert_eq!(governor.request_grant(), 10 * MIB);
        }
        assert_eq!(governor.request_grant(), 10 * MIB);
        assert_eq!(governor.request_grant(), 0);
        assert_eq!(governor.used_bytes(), 100 * MIB);
        assert_eq!(governor.available_bytes(), 0);
    }

    #[test]
    fn test_partial_grant_returns_headroom() {
        let governor = MemoryGovernor::new(25, 10);
        assert_eq!(governor.request_grant(), 10);
        assert_eq!(governor.request_grant(), 10);
        assert_eq!(governor.request_grant(), 5);
        assert_eq!(governor.request_grant(), 0);
    }

    #[test]
    fn test_release_restores_headroom() {
        let governor = MemoryGovernor::new(20, 10);
        governor.request_grant();
        governor.request_grant();
        assert_eq!(governor.request_grant(), 0);

        governor.release(4);
        assert_eq!(governor.used_bytes(), 16);
        assert_eq!(governor.request_grant(), 4);
    }

    #[test]
    fn test_usage_ratio() {
        let governor = MemoryGovernor::new(100, 10);
        assert!(governor.usage_ratio().abs() < f64::EPSILON);
        for _ in 0..9 {
            governor.request_grant();
        }
        assert!((governor.usage_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "released 11 bytes but only 10 are granted")]
    fn test_over_release_panics() {
        let governor = MemoryGovernor::new(100, 10);
        governor.request_grant();
        governor.release(11);
    }

    #[test]
    fn test_concurrent_grants_never_exceed_max() {
        let governor = Arc::new(MemoryGovernor::new(1000, 7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let governor = Arc::clone(&governor);
                std::thread::spawn(move || {
                    let mut total = 0;
                    loop {
                        let granted = governor.request_grant();
                        if granted == 0 {
                            break total;
                        }
                        total += granted;
                    }
                })
            })
            .collect();

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
        assert_eq!(governor.used_bytes(), 1000);
    }
}

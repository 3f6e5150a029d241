//! Memory and scheduling limits for the buffering engine.
//!
//! Every buffer has an explicit maximum. The global memory ceiling bounds
//! the sum of all stream queues, and grants are handed out in fixed blocks.

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Microseconds per second.
const US_PER_SEC: u64 = 1_000_000;

/// Byte and ratio limits shared by admission control and flush selection.
///
/// Time-valued limits are expressed in microseconds so that selection can be
/// driven with a simulated clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    // Memory.
    /// Global ceiling on bytes granted across all stream queues.
    pub max_memory_bytes: u64,
    /// Size of a single memory grant.
    pub block_size_bytes: u64,

    // Flush selection.
    /// A stream whose effective queued bytes exceed this is flushed.
    pub flush_threshold_bytes: u64,
    /// A non-empty stream idle for longer than this is flushed regardless of size.
    pub staleness_ceiling_us: u64,
    /// Memory usage ratio at which the size threshold drops to zero.
    pub eager_flush_ratio: f64,
    /// Memory usage ratio at which every non-empty stream is flushed.
    pub flush_all_ratio: f64,

    // Admission.
    /// Admission attempts before a blocked enqueue gives up as exhausted.
    pub max_admission_attempts: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// The memory ceiling defaults to 1 GiB. Callers that can probe the host
    /// should derive it from available memory instead.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Memory: 1GiB ceiling, 10MiB grants.
            max_memory_bytes: 1024 * MIB,
            block_size_bytes: 10 * MIB,

            // Selection: 10MiB threshold, 5min staleness.
            flush_threshold_bytes: 10 * MIB,
            staleness_ceiling_us: 5 * 60 * US_PER_SEC,
            eager_flush_ratio: 0.90,
            flush_all_ratio: 0.95,

            // About ten minutes of capped backoff.
            max_admission_attempts: 6_000,
        }
    }

    /// Creates small limits suitable for tests.
    ///
    /// 1MiB ceiling, 64KiB grants and a 128KiB threshold keep scenarios fast.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_memory_bytes: MIB,
            block_size_bytes: 64 * 1024,
            flush_threshold_bytes: 128 * 1024,
            staleness_ceiling_us: 50 * 1000,
            eager_flush_ratio: 0.90,
            flush_all_ratio: 0.95,
            max_admission_attempts: 200,
        }
    }

    /// Returns the same limits with a different global ceiling.
    #[must_use]
    pub const fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Returns the same limits with a different grant size.
    #[must_use]
    pub const fn with_block_size_bytes(mut self, bytes: u64) -> Self {
        self.block_size_bytes = bytes;
        self
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_memory_bytes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_memory_bytes",
                reason: "must be positive",
            });
        }

        if self.block_size_bytes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "block_size_bytes",
                reason: "must be positive",
            });
        }

        // A single grant can never exceed the ledger.
        if self.block_size_bytes > self.max_memory_bytes {
            return Err(crate::Error::LimitExceeded {
                limit: "block_size_bytes",
                max: self.max_memory_bytes,
                actual: self.block_size_bytes,
            });
        }

        if self.staleness_ceiling_us == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "staleness_ceiling_us",
                reason: "must be positive",
            });
        }

        if !valid_ratio(self.eager_flush_ratio) {
            return Err(crate::Error::InvalidArgument {
                name: "eager_flush_ratio",
                reason: "must be in (0, 1]",
            });
        }

        if !valid_ratio(self.flush_all_ratio) {
            return Err(crate::Error::InvalidArgument {
                name: "flush_all_ratio",
                reason: "must be in (0, 1]",
            });
        }

        if self.eager_flush_ratio > self.flush_all_ratio {
            return Err(crate::Error::InvalidArgument {
                name: "eager_flush_ratio",
                reason: "must be <= flush_all_ratio",
            });
        }

        if self.max_admission_attempts == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_admission_attempts",
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

fn valid_ratio(ratio: f64) -> bool {
    ratio > 0.0 && ratio <= 1.0
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(Limits::new().validate().is_ok());
        assert!(Limits::for_testing().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let limits = Limits::new();
        assert_eq!(limits.block_size_bytes, 10 * MIB);
        assert_eq!(limits.flush_threshold_bytes, 10 * MIB);
        assert_eq!(limits.staleness_ceiling_us, 300_000_000);
        assert!((limits.eager_flush_ratio - 0.90).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_block_size() {
        let mut limits = Limits::new();
        limits.block_size_bytes = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_block_larger_than_ceiling() {
        let limits = Limits::new().with_max_memory_bytes(MIB);
        assert_eq!(
            limits.validate(),
            Err(crate::Error::LimitExceeded {
                limit: "block_size_bytes",
                max: MIB,
                actual: 10 * MIB,
            })
        );
    }

    #[test]
    fn test_ratio_bounds() {
        let mut limits = Limits::new();
        limits.eager_flush_ratio = 0.0;
        assert!(limits.validate().is_err());

        let mut limits = Limits::new();
        limits.flush_all_ratio = 1.5;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_eager_ratio_above_flush_all() {
        let mut limits = Limits::new();
        limits.eager_flush_ratio = 0.99;
        limits.flush_all_ratio = 0.95;
        assert!(limits.validate().is_err());
    }
}

//! Reusable configurations for spillway tests.

use std::time::Duration;

use spillway_core::{Limits, MIB};
use spillway_engine::EngineConfig;

/// Engine configurations.
pub mod configs {
    use super::{Duration, EngineConfig, Limits, MIB};

    /// A ceiling a few batches wide, so producers hit backpressure often.
    #[must_use]
    pub fn tight_memory() -> EngineConfig {
        let limits = Limits::for_testing()
            .with_max_memory_bytes(256 * 1024)
            .with_block_size_bytes(32 * 1024);
        EngineConfig::for_testing()
            .with_limits(limits)
            .with_worker_pool_size(4)
    }

    /// Room to buffer everything; flushes happen by size and staleness.
    #[must_use]
    pub fn roomy() -> EngineConfig {
        EngineConfig::for_testing()
            .with_max_memory_bytes(16 * MIB)
            .with_worker_pool_size(2)
    }

    /// A single worker, so every flush is serialized.
    #[must_use]
    pub fn single_worker() -> EngineConfig {
        tight_memory()
            .with_worker_pool_size(1)
            .with_supervisor_interval(Duration::from_millis(2))
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard seeds run by every seeded test.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 1, 0];
}

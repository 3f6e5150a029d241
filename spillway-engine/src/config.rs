//! Engine configuration.
//!
//! [`EngineConfig`] wraps the byte limits from `spillway-core` and adds the
//! worker pool size and the timers that drive the supervisor, diagnostics,
//! admission backoff and shutdown.

use std::time::Duration;

use spillway_core::Limits;
use sysinfo::System;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Share of available memory used as the default global ceiling.
const MEMORY_CEILING_PERCENT: u64 = 80;

/// Environment override for the global memory ceiling.
pub const ENV_MAX_MEMORY_BYTES: &str = "SPILLWAY_MAX_MEMORY_BYTES";
/// Environment override for the worker pool size.
pub const ENV_WORKER_POOL_SIZE: &str = "SPILLWAY_WORKER_POOL_SIZE";
/// Environment override for the flush size threshold.
pub const ENV_FLUSH_THRESHOLD_BYTES: &str = "SPILLWAY_FLUSH_THRESHOLD_BYTES";

/// Configuration for a [`BufferEngine`](crate::BufferEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Memory and selection limits.
    pub limits: Limits,
    /// Concurrent flush slots.
    pub worker_pool_size: u32,
    /// Period of the flush supervisor.
    pub supervisor_interval: Duration,
    /// Period of the diagnostics log line.
    pub diagnostics_interval: Duration,
    /// Upper bound on how long `close` waits for flushes to drain.
    pub shutdown_timeout: Duration,
    /// First backoff when admission is blocked.
    pub admission_backoff_min: Duration,
    /// Backoff cap when admission is blocked.
    pub admission_backoff_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut limits = Limits::new();
        if let Some(bytes) = default_memory_ceiling() {
            limits.max_memory_bytes = bytes;
        }
        if let Some(bytes) = env_override(ENV_MAX_MEMORY_BYTES) {
            limits.max_memory_bytes = bytes;
        }
        if let Some(bytes) = env_override(ENV_FLUSH_THRESHOLD_BYTES) {
            limits.flush_threshold_bytes = bytes;
        }
        // A small host must still fit one grant.
        limits.block_size_bytes = limits.block_size_bytes.min(limits.max_memory_bytes);

        let worker_pool_size = env_override(ENV_WORKER_POOL_SIZE)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(5);

        Self {
            limits,
            worker_pool_size,
            supervisor_interval: Duration::from_secs(1),
            diagnostics_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60 * 60),
            admission_backoff_min: Duration::from_millis(1),
            admission_backoff_max: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with explicit limits and default timers.
    ///
    /// Unlike [`Default`], this neither probes the host nor reads the
    /// environment.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self {
            limits,
            worker_pool_size: 5,
            supervisor_interval: Duration::from_secs(1),
            diagnostics_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60 * 60),
            admission_backoff_min: Duration::from_millis(1),
            admission_backoff_max: Duration::from_millis(100),
        }
    }

    /// Creates a configuration suitable for testing (small sizes, fast timers).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            limits: Limits::for_testing(),
            worker_pool_size: 2,
            supervisor_interval: Duration::from_millis(5),
            diagnostics_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(10),
            admission_backoff_min: Duration::from_millis(1),
            admission_backoff_max: Duration::from_millis(5),
        }
    }

    /// Sets the limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the global memory ceiling.
    #[must_use]
    pub const fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.limits.max_memory_bytes = bytes;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_worker_pool_size(mut self, size: u32) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Sets the supervisor period.
    #[must_use]
    pub const fn with_supervisor_interval(mut self, interval: Duration) -> Self {
        self.supervisor_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidConfig`] if any value is out of range.
    pub fn validate(&self) -> EngineResult<()> {
        self.limits.validate()?;

        if self.worker_pool_size == 0 {
            return Err(invalid("worker_pool_size must be positive"));
        }
        if self.supervisor_interval.is_zero() {
            return Err(invalid("supervisor_interval must be positive"));
        }
        if self.diagnostics_interval.is_zero() {
            return Err(invalid("diagnostics_interval must be positive"));
        }
        if self.admission_backoff_min.is_zero() {
            return Err(invalid("admission_backoff_min must be positive"));
        }
        if self.admission_backoff_max < self.admission_backoff_min {
            return Err(invalid("admission_backoff_max must be >= admission_backoff_min"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidConfig {
        message: message.to_string(),
    }
}

/// Returns 80% of the memory the host reports as available.
///
/// `None` when the platform reports nothing useful.
#[must_use]
pub fn default_memory_ceiling() -> Option<u64> {
    let mut sys = System::new();
    sys.refresh_memory();
    let available = match sys.available_memory() {
        0 => sys.total_memory(),
        bytes => bytes,
    };
    let ceiling = available / 100 * MEMORY_CEILING_PERCENT;
    (ceiling > 0).then_some(ceiling)
}

fn env_override(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::MIB;

    #[test]
    fn test_testing_config_is_valid() {
        assert!(EngineConfig::for_testing().validate().is_ok());
        assert!(EngineConfig::new(Limits::new()).validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.limits.max_memory_bytes > 0);
    }

    #[test]
    fn test_new_uses_documented_defaults() {
        let config = EngineConfig::new(Limits::new());
        assert_eq!(config.worker_pool_size, 5);
        assert_eq!(config.supervisor_interval, Duration::from_secs(1));
        assert_eq!(config.limits.block_size_bytes, 10 * MIB);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = EngineConfig::for_testing().with_worker_pool_size(0);
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let config = EngineConfig::for_testing().with_max_memory_bytes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_order() {
        let mut config = EngineConfig::for_testing();
        config.admission_backoff_max = Duration::from_micros(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_probe() {
        // Every supported CI platform reports memory.
        if let Some(ceiling) = default_memory_ceiling() {
            assert!(ceiling > 0);
        }
    }
}

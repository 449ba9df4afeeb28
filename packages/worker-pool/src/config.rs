//! ============================================================================
//! File: packages/worker-pool/src/config.rs
//! ----------------------------------------------------------------------------
//! Immutable pool configuration, layered as DEFAULTS ◁ preset ◁ overrides.
//! ============================================================================

use tracing::warn;

use crate::error::{Result, WorkerPoolError};

/// Resource envelope for a pool. Always constructed through [`ConfigBuilder`]
/// so invariants are validated once, at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub min_workers: usize,
    pub max_workers: usize,
    pub memory_limit_per_worker: u64,
    pub memory_check_interval_ms: u64,
    pub max_executions_per_worker: u64,
    pub idle_timeout_ms: u64,
    pub queue_timeout_ms: u64,
    pub max_queue_size: usize,
    pub graceful_shutdown_timeout_ms: u64,
    pub max_messages_per_second: u32,
    pub max_pending_tool_calls: usize,
    pub max_message_size_bytes: usize,
    pub warm_on_init: bool,
}

/// Resource presets, tightening monotonically from `Permissive` to `Strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Strict,
    Secure,
    Standard,
    Permissive,
}

const DEFAULTS: Config = Config {
    min_workers: 1,
    max_workers: 4,
    memory_limit_per_worker: 256 * 1024 * 1024,
    memory_check_interval_ms: 1_000,
    max_executions_per_worker: 1_000,
    idle_timeout_ms: 60_000,
    queue_timeout_ms: 30_000,
    max_queue_size: 100,
    graceful_shutdown_timeout_ms: 5_000,
    max_messages_per_second: 100,
    max_pending_tool_calls: 32,
    max_message_size_bytes: 10 * 1024 * 1024,
    warm_on_init: false,
};

impl Preset {
    /// Returns the immutable config this preset layers on top of [`DEFAULTS`].
    pub const fn config(self) -> Config {
        match self {
            Preset::Strict => Config {
                min_workers: 1,
                max_workers: 2,
                memory_limit_per_worker: 64 * 1024 * 1024,
                memory_check_interval_ms: 500,
                max_executions_per_worker: 50,
                idle_timeout_ms: 15_000,
                queue_timeout_ms: 5_000,
                max_queue_size: 10,
                graceful_shutdown_timeout_ms: 2_000,
                max_messages_per_second: 20,
                max_pending_tool_calls: 8,
                max_message_size_bytes: 256 * 1024,
                warm_on_init: true,
            },
            Preset::Secure => Config {
                min_workers: 2,
                max_workers: 4,
                memory_limit_per_worker: 128 * 1024 * 1024,
                memory_check_interval_ms: 750,
                max_executions_per_worker: 200,
                idle_timeout_ms: 30_000,
                queue_timeout_ms: 10_000,
                max_queue_size: 25,
                graceful_shutdown_timeout_ms: 3_000,
                max_messages_per_second: 50,
                max_pending_tool_calls: 16,
                max_message_size_bytes: 2 * 1024 * 1024,
                warm_on_init: true,
            },
            Preset::Standard => DEFAULTS,
            Preset::Permissive => Config {
                min_workers: 1,
                max_workers: 16,
                memory_limit_per_worker: 1024 * 1024 * 1024,
                memory_check_interval_ms: 5_000,
                max_executions_per_worker: 100_000,
                idle_timeout_ms: 300_000,
                queue_timeout_ms: 120_000,
                max_queue_size: 1_000,
                graceful_shutdown_timeout_ms: 10_000,
                max_messages_per_second: 1_000,
                max_pending_tool_calls: 256,
                max_message_size_bytes: 64 * 1024 * 1024,
                warm_on_init: false,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        DEFAULTS
    }
}

impl Config {
    /// Starts from a preset; override fields with [`ConfigBuilder`] methods.
    pub fn builder(preset: Preset) -> ConfigBuilder {
        ConfigBuilder {
            base: preset.config(),
            strict_floor: Preset::Strict.config(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_workers == 0 {
            return Err(WorkerPoolError::InvalidConfig {
                detail: "min_workers must be >= 1".into(),
            });
        }
        if self.min_workers > self.max_workers {
            return Err(WorkerPoolError::InvalidConfig {
                detail: format!(
                    "min_workers ({}) must be <= max_workers ({})",
                    self.min_workers, self.max_workers
                ),
            });
        }
        let positive_u64 = [
            ("memory_limit_per_worker", self.memory_limit_per_worker),
            ("memory_check_interval_ms", self.memory_check_interval_ms),
            ("max_executions_per_worker", self.max_executions_per_worker),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("queue_timeout_ms", self.queue_timeout_ms),
            (
                "graceful_shutdown_timeout_ms",
                self.graceful_shutdown_timeout_ms,
            ),
        ];
        for (name, value) in positive_u64 {
            if value == 0 {
                return Err(WorkerPoolError::InvalidConfig {
                    detail: format!("{name} must be positive"),
                });
            }
        }
        if self.max_queue_size == 0 {
            return Err(WorkerPoolError::InvalidConfig {
                detail: "max_queue_size must be positive".into(),
            });
        }
        if self.max_messages_per_second == 0 {
            return Err(WorkerPoolError::InvalidConfig {
                detail: "max_messages_per_second must be positive".into(),
            });
        }
        if self.max_pending_tool_calls == 0 {
            return Err(WorkerPoolError::InvalidConfig {
                detail: "max_pending_tool_calls must be positive".into(),
            });
        }
        if self.max_message_size_bytes == 0 {
            return Err(WorkerPoolError::InvalidConfig {
                detail: "max_message_size_bytes must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Builds a [`Config`] from a preset plus overrides, validating once on
/// [`ConfigBuilder::build`]. Overrides that loosen a field below the strict
/// preset's floor are allowed but logged, per §4.9.
pub struct ConfigBuilder {
    base: Config,
    strict_floor: Config,
}

macro_rules! override_field {
    ($name:ident, $ty:ty, $tighter_is:tt) => {
        pub fn $name(mut self, value: $ty) -> Self {
            if override_field!(@looser $tighter_is, value, self.strict_floor.$name) {
                warn!(
                    field = stringify!($name),
                    value = ?value,
                    strict_floor = ?self.strict_floor.$name,
                    "config override loosens a strict-preset limit",
                );
            }
            self.base.$name = value;
            self
        }
    };
    (@looser smaller, $value:expr, $floor:expr) => {
        $value > $floor
    };
    (@looser larger, $value:expr, $floor:expr) => {
        $value < $floor
    };
}

impl ConfigBuilder {
    override_field!(min_workers, usize, smaller);
    override_field!(max_workers, usize, smaller);
    override_field!(memory_limit_per_worker, u64, smaller);
    override_field!(memory_check_interval_ms, u64, larger);
    override_field!(max_executions_per_worker, u64, smaller);
    override_field!(idle_timeout_ms, u64, smaller);
    override_field!(queue_timeout_ms, u64, smaller);
    override_field!(max_queue_size, usize, smaller);
    override_field!(graceful_shutdown_timeout_ms, u64, smaller);
    override_field!(max_messages_per_second, u32, smaller);
    override_field!(max_pending_tool_calls, usize, smaller);
    override_field!(max_message_size_bytes, usize, smaller);

    pub fn warm_on_init(mut self, value: bool) -> Self {
        self.base.warm_on_init = value;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.base.validate()?;
        Ok(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_preset_matches_defaults() {
        assert_eq!(Preset::Standard.config(), Config::default());
    }

    #[test]
    fn presets_tighten_monotonically() {
        let strict = Preset::Strict.config();
        let secure = Preset::Secure.config();
        let standard = Preset::Standard.config();
        let permissive = Preset::Permissive.config();
        assert!(strict.max_workers <= secure.max_workers);
        assert!(secure.max_workers <= standard.max_workers);
        assert!(standard.max_workers <= permissive.max_workers);
        assert!(strict.memory_limit_per_worker <= permissive.memory_limit_per_worker);
    }

    #[test]
    fn rejects_min_workers_above_max() {
        let result = Config::builder(Preset::Standard)
            .min_workers(10)
            .max_workers(2)
            .build();
        assert!(matches!(result, Err(WorkerPoolError::InvalidConfig { .. })));
    }

    #[test]
    fn rejects_zero_min_workers() {
        let result = Config::builder(Preset::Standard).min_workers(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn override_within_strict_floor_is_fine() {
        let config = Config::builder(Preset::Standard)
            .max_workers(1)
            .build()
            .expect("valid override");
        assert_eq!(config.max_workers, 1);
    }
}

//! Layered configuration for the fused nearest-neighbor dispatcher.
//!
//! Sources are merged in priority order (lowest first):
//!
//! 1. Built-in defaults
//! 2. `fusednn.toml` (or an explicit path)
//! 3. `FUSEDNN_*` environment variables, `__` separating nested keys
//!    (e.g. `FUSEDNN_TILING__K_BLOCK=16`, `FUSEDNN_MERGE=packed`)
//!
//! # Example
//!
//! ```toml
//! merge = "row_lock"
//! clamp = "zero"
//! max_scratch_bytes = 49152
//!
//! [tiling]
//! k_block = 32
//! rows_per_worker = 4
//! cols_per_worker = 4
//! worker_rows = 16
//! worker_cols = 16
//! ```

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kernel::ClampPolicy;
use crate::merge::MergeStrategy;
use crate::tile::{TileGeometry, TilingParams, VecWidth};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "fusednn.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FUSEDNN_";

/// Default per-group scratch budget (48 KiB).
pub const DEFAULT_MAX_SCRATCH_BYTES: usize = 48 * 1024;

/// Upper bound for the execution queue's thread count.
const MAX_THREADS: usize = 1024;

/// Logging preferences for the host's subscriber.
///
/// The library only emits `tracing` events and never installs a subscriber,
/// so `level` has no effect until the host applies it, typically through
/// [`LoggingConfig::filter_directive`]:
///
/// ```ignore
/// tracing_subscriber::fmt()
///     .with_env_filter(EnvFilter::new(config.logging.filter_directive()))
///     .init();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive scoping `level` to this crate's events,
    /// e.g. `fusednn_core=debug`.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        format!("{}={}", env!("CARGO_CRATE_NAME"), self.level.to_ascii_lowercase())
    }
}

/// Complete dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusedNnConfig {
    /// Tile shape.
    pub tiling: TilingParams,
    /// Cross-tile merge strategy.
    pub merge: MergeStrategy,
    /// Negative-distance policy.
    pub clamp: ClampPolicy,
    /// Scratch budget per worker group in bytes.
    pub max_scratch_bytes: usize,
    /// Execution queue threads; `None` uses available parallelism.
    pub num_threads: Option<usize>,
    /// Logging preferences.
    pub logging: LoggingConfig,
}

impl Default for FusedNnConfig {
    fn default() -> Self {
        Self {
            tiling: TilingParams::default(),
            merge: MergeStrategy::default(),
            clamp: ClampPolicy::default(),
            max_scratch_bytes: DEFAULT_MAX_SCRATCH_BYTES,
            num_threads: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl FusedNnConfig {
    /// Loads defaults, `fusednn.toml` from the working directory if present,
    /// then environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(CONFIG_FILE_NAME)
    }

    /// Like [`FusedNnConfig::load`] with an explicit file path. A missing
    /// file is not an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string on top of the defaults (no environment layer).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks value ranges and the tiling.
    ///
    /// The tiling must derive a valid single-lane `f32` geometry that fits
    /// `max_scratch_bytes`. Wider transfers are picked per run from `k` and
    /// are checked again by [`crate::Dispatcher::run`].
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` for out-of-range values
    /// - `Error::InvalidTileConfig` for a tiling with no valid geometry
    /// - `Error::ScratchExceeded` if even the smallest geometry is over budget
    pub fn validate(&self) -> Result<()> {
        if self.max_scratch_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_scratch_bytes must be greater than zero".to_string(),
            ));
        }
        TileGeometry::new::<f32>(self.tiling, VecWidth::One)?
            .check_scratch(self.max_scratch_bytes)?;
        if let Some(threads) = self.num_threads {
            if threads == 0 || threads > MAX_THREADS {
                return Err(Error::InvalidConfig(format!(
                    "num_threads must be in 1..={MAX_THREADS}, got {threads}"
                )));
            }
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !matches!(
            level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(Error::InvalidConfig(format!(
                "unknown logging level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

//! Ring configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `DAQ_RING_`)
//!
//! ```toml
//! capacity = 65536
//! reader_start = "oldest"     # or "latest", or { back = 512 }
//! read_timeout_ms = 250
//! ```
//!
//! # Example
//! ```no_run
//! use daq_ring::{RingBuffer, RingConfig};
//!
//! let config = RingConfig::load()?;
//! let ring = RingBuffer::from_config(&config)?;
//! # Ok::<(), daq_ring::RingError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RingError, RingResult};
use crate::reader::StartPosition;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/daq-ring.toml";

/// Prefix for environment overrides, e.g. `DAQ_RING_CAPACITY=4096`.
pub const ENV_PREFIX: &str = "DAQ_RING_";

/// Settings for building a [`RingBuffer`](crate::RingBuffer) and its readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Storage size in bytes
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Start position for readers created without an explicit one
    #[serde(default)]
    pub reader_start: StartPosition,
    /// Upper bound for `Reader::read` in milliseconds (unset = wait forever)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

fn default_capacity() -> usize {
    64 * 1024
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            reader_start: StartPosition::default(),
            read_timeout_ms: None,
        }
    }
}

impl RingConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and `DAQ_RING_` environment variables.
    pub fn load() -> RingResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults fill every unset field.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RingResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> RingResult<()> {
        if self.capacity == 0 {
            return Err(RingError::InvalidConfig(
                "capacity must be greater than 0".to_string(),
            ));
        }

        if self.read_timeout_ms == Some(0) {
            return Err(RingError::InvalidConfig(
                "read_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// `read_timeout_ms` as a duration.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

//! Configuration for a diversion context.
//!
//! Settings come from an optional TOML file and `DIVERT_*` environment
//! variables (environment wins). Every setting has a default, so an empty
//! source yields a usable context.

use serde::Deserialize;
use std::path::Path;

use crate::types::{
    validate_priority, Flags, Layer, Param, PRIORITY_DEFAULT, QUEUE_LEN_DEFAULT,
    QUEUE_TIME_DEFAULT,
};
use crate::Result;

/// Environment variable prefix, e.g. `DIVERT_QUEUE_LEN=1024`.
pub const ENV_PREFIX: &str = "DIVERT";

/// Context settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DivertConfig {
    /// Maximum number of queued packets
    pub queue_len: u64,

    /// Aging sweep interval (in milliseconds)
    pub queue_time_ms: u64,

    /// Context priority
    pub priority: i64,

    /// Stack layer to hook
    pub layer: Layer,

    /// Copy packets instead of diverting them
    pub sniff: bool,

    /// Drop matching packets
    pub drop: bool,

    /// Deliver packets without checksum repair
    pub no_checksum: bool,

    /// Permit everything without hooking
    pub passthru: bool,
}

impl Default for DivertConfig {
    fn default() -> Self {
        Self {
            queue_len: QUEUE_LEN_DEFAULT,
            queue_time_ms: QUEUE_TIME_DEFAULT,
            priority: PRIORITY_DEFAULT as i64,
            layer: Layer::Network,
            sniff: false,
            drop: false,
            no_checksum: false,
            passthru: false,
        }
    }
}

impl DivertConfig {
    /// Load settings from `path` (if given) overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: DivertConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Check every bounded setting.
    pub fn validate(&self) -> Result<()> {
        Param::QueueLen.validate(self.queue_len)?;
        Param::QueueTime.validate(self.queue_time_ms)?;
        validate_priority(self.priority)?;
        Ok(())
    }

    /// Flag word described by the boolean settings.
    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        if self.sniff {
            flags = flags | Flags::SNIFF;
        }
        if self.drop {
            flags = flags | Flags::DROP;
        }
        if self.no_checksum {
            flags = flags | Flags::NO_CHECKSUM;
        }
        if self.passthru {
            flags = flags | Flags::PASSTHRU;
        }
        flags
    }
}

//! Merge rules: built-in defaults, lowest precedence.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

use crate::events::{DEFAULT_CAPACITY, DEFAULT_QUERY_LIMIT};

pub const DEFAULT_CACHE_BUCKET_SECS: u64 = 1;

/// Create a Config builder with every engine default applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("events.capacity", DEFAULT_CAPACITY as u64)?
        .set_default("events.query_limit", DEFAULT_QUERY_LIMIT as u64)?
        .set_default("persistence.compress", false)?
        .set_default("transforms.cache_bucket_secs", DEFAULT_CACHE_BUCKET_SECS)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}

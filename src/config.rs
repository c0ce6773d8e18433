use clap::Parser;
use fieldx::fxstruct;
use garde::Validate;
use std::ffi::OsString;
use std::fmt::Display;
use std::time::Duration;

use crate::error::CacheError;

/// Settings of the write-propagation cache. Every option can also come from a `WPCACHE_*` environment variable.
#[derive(Debug, Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, name = "wp-cache")]
pub struct CacheConfig {
    /// Name of the stream commands are appended to.
    #[fieldx(get(clone))]
    #[clap(long, env = "WPCACHE_STREAM_NAME", default_value = "cats")]
    #[garde(length(min = 1))]
    stream_name: String,

    /// Consumer group shared by the workers.
    #[fieldx(get(clone))]
    #[clap(long, env = "WPCACHE_GROUP_NAME", default_value = "consumers")]
    #[garde(length(min = 1))]
    group_name: String,

    /// Prefix of worker consumer names; a worker is known to the group as `<prefix>-<n>`.
    #[fieldx(get(clone))]
    #[clap(long, env = "WPCACHE_CONSUMER_PREFIX", default_value = "worker")]
    #[garde(length(min = 1))]
    consumer_prefix: String,

    /// Number of workers consuming the stream.
    #[clap(long, env = "WPCACHE_WORKERS", default_value_t = 3)]
    #[garde(range(min = 1))]
    workers: usize,

    /// How many records a worker claims at once.
    #[clap(long, env = "WPCACHE_FETCH_COUNT", default_value_t = 1)]
    #[garde(range(min = 1))]
    fetch_count: usize,

    /// First delay after a failed read, in milliseconds.
    #[clap(long, env = "WPCACHE_BACKOFF_INITIAL_MS", default_value_t = 50)]
    #[garde(range(min = 1), custom(Self::at_most("backoff-max-ms", &self.backoff_max_ms)))]
    backoff_initial_ms: u64,

    /// Upper bound of the delay between failed reads, in milliseconds.
    #[clap(long, env = "WPCACHE_BACKOFF_MAX_MS", default_value_t = 5_000)]
    #[garde(range(min = 1))]
    backoff_max_ms: u64,

    /// Redis server to use for the stream. Without it the in-process log is used.
    #[fieldx(get(clone))]
    #[clap(long, env = "WPCACHE_REDIS_URL", hide_env_values = true)]
    #[garde(skip)]
    redis_url: Option<String>,
}

impl CacheConfig {
    fn at_most<'a, T: PartialOrd + Display>(
        max_name: &'static str,
        max: &'a T,
    ) -> impl FnOnce(&'a T, &()) -> garde::Result {
        move |value, _| {
            if value > max {
                Err(garde::Error::new(format!("{} is more than {max_name} ({})", *value, *max)))
            }
            else {
                Ok(())
            }
        }
    }

    /// Parse and validate an explicit argument list. The first item is the program name.
    pub fn from_args<I, T>(args: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::try_parse_from(args).map_err(|err| CacheError::Config(err.to_string()))?;
        config.validate().map_err(|err| CacheError::Config(err.to_string()))?;
        Ok(config)
    }

    /// Parse and validate the process command line and environment.
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_args(std::env::args_os())
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

//! Log providers.
//!
//! [`MemoryLog`](memory::MemoryLog) keeps everything in process and is what the tests drive.
//! [`RedisLog`](redis::RedisLog) maps the same contract onto Redis Streams and consumer groups.
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::MemoryLog;
#[cfg(feature = "redis")]
pub use self::redis::RedisLog;

//! # wp-cache
//!
//! Write-propagation cache: an in-app read view that is kept up to date through an ordered log instead of being
//! written synchronously.
//!
//! # The Basics
//!
//! Every mutation (set, update, delete) becomes a [`Command`](types::Command) that is appended to a durable,
//! append-only log. A fixed pool of workers shares one consumer group on that log; each claims the next command
//! nobody in the group has seen, applies it to the [materialized state](state::MaterializedState) and acknowledges
//! it. Reads go straight to the materialized state and never touch the log.
//!
//! ```text
//!  write/update/delete ──► encode ──► log append ──► (returns)
//!                                          │
//!                         consumer group ──┴──► worker-0 ─┐
//!                                          ├──► worker-1 ─┼─► materialized state ◄── read
//!                                          └──► worker-n ─┘
//! ```
//!
//! The cache operates on the following principles:
//!
//! - Writes return after the append, not after the change becomes visible.
//! - A read miss is not an error. The caller should go to the system of record.
//! - The consumer group starts at the tail of the log, so the cache starts cold and only tracks what is written after
//!   it was first started.
//! - A record that can't be decoded is logged and acknowledged anyway, so one bad record can't stall the group.
//! - Nothing in here is fatal for the host process. At worst the cache is stale or cold.
//!
//! # Ordering
//!
//! The log hands positions out in append order, each to exactly one worker. Commands for one identifier are
//! therefore claimed in order, but two workers holding consecutive commands for the same identifier may finish in
//! either order. The later-finishing one wins, even if its command is older.
//!
//! # Log Providers
//!
//! Anything implementing [`DurableLog`] can carry the commands. [`MemoryLog`](stream::MemoryLog) is an in-process
//! implementation used for tests and single-process setups; with the `redis` feature,
//! [`RedisLog`](stream::RedisLog) uses Redis Streams and consumer groups.

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod pool;
pub mod service;
pub mod state;
pub mod stream;
pub mod traits;
pub mod types;
pub(crate) mod worker;

#[doc(inline)]
pub use cache::StreamCache;
#[doc(inline)]
pub use traits::DurableLog;
#[doc(inline)]
pub use traits::Entity;
pub use worker::Backoff;

pub mod prelude {
    pub use crate::cache::StreamCache;
    pub use crate::config::CacheConfig;
    pub use crate::error::CacheError;
    pub use crate::error::LogError;
    pub use crate::state::MaterializedState;
    pub use crate::stream::MemoryLog;
    pub use crate::traits::DurableLog;
    pub use crate::traits::Entity;
    pub use crate::traits::Observer;
    pub use crate::types::*;
}

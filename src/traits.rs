use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

use crate::error::DecodeError;
use crate::error::LogError;
use crate::types::Command;
use crate::types::Delivery;
use crate::types::GroupCreation;
use crate::types::LogPosition;
use crate::types::LogRecord;

/// A domain record the cache can materialize.
///
/// Snapshots are serialized with the identifier under the `id` field. A `Delete` command only ships that field, so
/// the identifier must be recoverable from `{"id": ...}` alone.
pub trait Entity: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    type Id: Serialize + DeserializeOwned + Debug + Display + Hash + Clone + Eq + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;
}

/// The ordered log the cache writes commands into and the workers consume from.
///
/// Implementations must preserve append order per stream and hand each position to exactly one consumer of a
/// group. Unacknowledged positions stay pending for the consumer that claimed them.
#[async_trait]
pub trait DurableLog: Send + Sync + 'static {
    /// Append a record to the stream, creating the stream if needed.
    async fn append(&self, stream: &str, record: LogRecord) -> Result<LogPosition, LogError>;

    /// Create a consumer group positioned at the current tail. Must be idempotent.
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreation, LogError>;

    /// Wait until at least one record not yet delivered to the group is available and claim up to `count` of them
    /// for `consumer`. There is no timeout.
    ///
    /// A provider may hand a consumer its own unacknowledged records again before new ones, e.g. after the consumer
    /// restarted or lost its connection.
    async fn claim(&self, stream: &str, group: &str, consumer: &str, count: usize)
        -> Result<Vec<Delivery>, LogError>;

    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<(), LogError>;
}

/// Hooks into the worker pool. All methods default to no-ops.
#[async_trait]
pub trait Observer<E>: Send + Sync + 'static
where
    E: Entity,
{
    /// Called after a command has been applied to the state and before it gets acknowledged.
    async fn on_applied(&self, _worker: usize, _position: LogPosition, _command: &Command<E>) {}
    /// Called for a record that couldn't be decoded. The record is acknowledged right after.
    async fn on_poison(&self, _worker: usize, _position: LogPosition, _error: &DecodeError) {}
    async fn on_acked(&self, _worker: usize, _position: LogPosition) {}
    async fn on_error(&self, _worker: usize, _error: &LogError) {}
}

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamId;
use redis::streams::StreamReadOptions;
use redis::streams::StreamReadReply;
use redis::AsyncCommands;
use redis::Client;
use std::collections::HashMap;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::LogError;
use crate::traits::DurableLog;
use crate::types::Delivery;
use crate::types::GroupCreation;
use crate::types::LogPosition;
use crate::types::LogRecord;
use crate::types::DATA_FIELD;

// Start of a consumer's own pending history.
const HISTORY_START: &str = "0";

struct ConsumerState {
    conn:    Option<MultiplexedConnection>,
    // While set, claims replay this consumer's unacknowledged entries after the given ID instead of reading new ones.
    backlog: Option<String>,
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self {
            conn:    None,
            backlog: Some(HISTORY_START.to_string()),
        }
    }
}

/// Redis Streams backed log.
///
/// Appends, group creation and acks share one managed connection. A blocking `XREADGROUP` would stall everything
/// pipelined behind it, so every consumer gets its own connection for claims.
///
/// Entries delivered to a consumer but never acknowledged (a worker stopped mid-read, a failed ack, a dropped
/// connection) are handed to the same consumer again: its first claim, and the first claim after a read error, go
/// through its pending history before reading new entries.
pub struct RedisLog {
    client:    Client,
    shared:    ConnectionManager,
    consumers: Mutex<HashMap<String, ConsumerState>>,
}

impl RedisLog {
    pub async fn connect(url: &str) -> Result<Self, LogError> {
        let client = Client::open(url)?;
        let shared = client.get_connection_manager().await?;
        info!(url, "connected to Redis");
        Ok(Self {
            client,
            shared,
            consumers: Mutex::new(HashMap::new()),
        })
    }

    async fn consumer(&self, consumer: &str) -> Result<(MultiplexedConnection, Option<String>), LogError> {
        let (conn, backlog) = {
            let mut consumers = self.consumers.lock();
            let state = consumers.entry(consumer.to_string()).or_default();
            (state.conn.clone(), state.backlog.clone())
        };

        let conn = match conn {
            Some(conn) => conn,
            None => {
                let conn = self.client.get_multiplexed_async_connection().await?;
                if let Some(state) = self.consumers.lock().get_mut(consumer) {
                    state.conn = Some(conn.clone());
                }
                conn
            }
        };

        Ok((conn, backlog))
    }

    // Drop a connection that may be broken. Whatever the failed read delivered is pending now, so replay it.
    fn reset_consumer(&self, consumer: &str) {
        self.consumers.lock().insert(consumer.to_string(), ConsumerState::default());
    }

    fn set_backlog(&self, consumer: &str, backlog: Option<String>) {
        if let Some(state) = self.consumers.lock().get_mut(consumer) {
            state.backlog = backlog;
        }
    }

    /// Turn a stream entry into a delivery. Never fails for an entry with a valid ID: a field that can't be read is
    /// dropped, which leaves a record the codec rejects, so the worker acknowledges it as poison.
    fn to_delivery(entry: StreamId) -> Option<Delivery> {
        let position = match entry.id.parse::<LogPosition>() {
            Ok(position) => position,
            Err(err) => {
                error!(id = %entry.id, error = %err, "stream entry has an unusable ID, skipping it");
                return None;
            }
        };

        let mut record = LogRecord::default();
        for (field, value) in entry.map {
            let Ok(bytes) = redis::from_redis_value::<Vec<u8>>(&value)
            else {
                warn!(%position, field, "unreadable field value, dropping it");
                continue;
            };
            if field == DATA_FIELD {
                record.payload = bytes;
            }
            else {
                record.metadata.insert(field, String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        Some(Delivery { position, record })
    }
}

#[async_trait]
impl DurableLog for RedisLog {
    async fn append(&self, stream: &str, record: LogRecord) -> Result<LogPosition, LogError> {
        let mut items = record
            .metadata
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect::<Vec<(String, Vec<u8>)>>();
        items.push((DATA_FIELD.to_string(), record.payload));

        let mut conn = self.shared.clone();
        let id: String = conn.xadd(stream, "*", &items).await?;
        id.parse()
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreation, LogError> {
        let mut conn = self.shared.clone();
        match conn.xgroup_create_mkstream::<_, _, _, ()>(stream, group, "$").await {
            Ok(()) => Ok(GroupCreation::Created),
            Err(err) if err.code() == Some("BUSYGROUP") || err.to_string().contains("BUSYGROUP") => {
                debug!(stream, group, "consumer group already exists");
                Ok(GroupCreation::Existed)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Delivery>, LogError> {
        let count = count.max(1);

        loop {
            let (mut conn, backlog) = self.consumer(consumer).await?;
            let options = StreamReadOptions::default().group(group, consumer).count(count);
            let (from, options) = match &backlog {
                Some(after) => (after.as_str(), options),
                None => (">", options.block(0)),
            };

            let reply: Option<StreamReadReply> = match conn.xread_options(&[stream], &[from], &options).await {
                Ok(reply) => reply,
                Err(err) => {
                    self.reset_consumer(consumer);
                    return Err(err.into());
                }
            };

            let entries = reply
                .into_iter()
                .flat_map(|r| r.keys)
                .flat_map(|k| k.ids)
                .collect::<Vec<_>>();

            if backlog.is_some() {
                let next = entries.last().map(|e| e.id.clone());
                if next.is_none() {
                    debug!(stream, group, consumer, "pending history replayed");
                }
                self.set_backlog(consumer, next);
            }

            let deliveries = entries.into_iter().filter_map(Self::to_delivery).collect::<Vec<_>>();
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            if backlog.is_none() {
                warn!(stream, group, consumer, "blocking read returned nothing, reading again");
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<(), LogError> {
        let mut conn = self.shared.clone();
        let _: i64 = conn.xack(stream, group, &[position.to_string()]).await?;
        Ok(())
    }
}

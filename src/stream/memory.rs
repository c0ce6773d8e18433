use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::LogError;
use crate::traits::DurableLog;
use crate::types::Delivery;
use crate::types::GroupCreation;
use crate::types::LogPosition;
use crate::types::LogRecord;

#[derive(Debug, Default)]
struct GroupState {
    // Index of the first entry never delivered to this group.
    next:      usize,
    pending:   BTreeMap<LogPosition, String>,
    delivered: HashMap<LogPosition, u32>,
    acked:     u64,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<(LogPosition, LogRecord)>,
    groups:  HashMap<String, GroupState>,
}

impl StreamState {
    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut GroupState, LogError> {
        self.groups.get_mut(group).ok_or_else(|| LogError::NoGroup {
            stream: stream.to_string(),
            group:  group.to_string(),
        })
    }
}

/// In-process log with consumer groups.
///
/// Follows the Redis Streams model: a group is a cursor over the stream shared by its consumers, every claimed
/// position stays pending for its consumer until acknowledged, and a claim blocks until something new is appended.
/// The inspection methods (`cursor`, `pending`, `delivery_count`, ...) and the fault switches exist for tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    streams:     Mutex<HashMap<String, StreamState>>,
    appended:    Notify,
    progressed:  Notify,
    unavailable: AtomicBool,
    fail_acks:   AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation but `ack` fails with [`LogError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, `ack` fails and leaves positions pending.
    pub fn set_fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LogError::Unavailable("memory log switched off".to_string()))
        }
        else {
            Ok(())
        }
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams.lock().get(stream).map_or(0, |s| s.entries.len())
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.streams
            .lock()
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    /// Number of entries the group's cursor has moved past.
    pub fn cursor(&self, stream: &str, group: &str) -> Option<usize> {
        self.streams.lock().get(stream)?.groups.get(group).map(|g| g.next)
    }

    /// Claimed but not yet acknowledged positions, with the consumer holding each.
    pub fn pending(&self, stream: &str, group: &str) -> Vec<(LogPosition, String)> {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.iter().map(|(p, c)| (*p, c.clone())).collect())
            .unwrap_or_default()
    }

    pub fn acked(&self, stream: &str, group: &str) -> u64 {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.acked)
    }

    /// How many times the position has been handed to a consumer of the group.
    pub fn delivery_count(&self, stream: &str, group: &str, position: LogPosition) -> u32 {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.delivered.get(&position).copied())
            .unwrap_or(0)
    }

    /// All entries have been delivered to the group and acknowledged.
    pub fn is_drained(&self, stream: &str, group: &str) -> bool {
        let streams = self.streams.lock();
        let Some(s) = streams.get(stream)
        else {
            return false;
        };
        s.groups
            .get(group)
            .is_some_and(|g| g.next == s.entries.len() && g.pending.is_empty())
    }

    pub async fn wait_drained(&self, stream: &str, group: &str) {
        loop {
            let progressed = self.progressed.notified();
            tokio::pin!(progressed);
            progressed.as_mut().enable();
            if self.is_drained(stream, group) {
                return;
            }
            progressed.await;
        }
    }

    /// Move pending positions of `from` over to `to` and hand them out again. This is what a group does when it
    /// recovers the work of a consumer that went away.
    pub fn reclaim(&self, stream: &str, group: &str, from: &str, to: &str) -> Result<Vec<Delivery>, LogError> {
        self.check_available()?;
        let mut streams = self.streams.lock();
        let state = streams.get_mut(stream).ok_or_else(|| LogError::NoGroup {
            stream: stream.to_string(),
            group:  group.to_string(),
        })?;
        let entries = &state.entries;
        let g = state.groups.get_mut(group).ok_or_else(|| LogError::NoGroup {
            stream: stream.to_string(),
            group:  group.to_string(),
        })?;

        let mut reclaimed = vec![];
        for (position, consumer) in g.pending.iter_mut().filter(|(_, c)| c.as_str() == from) {
            *consumer = to.to_string();
            *g.delivered.entry(*position).or_default() += 1;
            if let Ok(idx) = entries.binary_search_by(|(p, _)| p.cmp(position)) {
                reclaimed.push(Delivery {
                    position: *position,
                    record:   entries[idx].1.clone(),
                });
            }
        }
        Ok(reclaimed)
    }

    fn try_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Option<Vec<Delivery>>, LogError> {
        self.check_available()?;
        let mut streams = self.streams.lock();
        let missing = || LogError::NoGroup {
            stream: stream.to_string(),
            group:  group.to_string(),
        };
        let state = streams.get_mut(stream).ok_or_else(missing)?;
        let total = state.entries.len();
        let g = state.groups.get_mut(group).ok_or_else(missing)?;

        if g.next >= total {
            return Ok(None);
        }

        let end = total.min(g.next + count.max(1));
        let batch = state.entries[g.next..end]
            .iter()
            .map(|(position, record)| Delivery {
                position: *position,
                record:   record.clone(),
            })
            .collect::<Vec<_>>();

        for d in &batch {
            g.pending.insert(d.position, consumer.to_string());
            *g.delivered.entry(d.position).or_default() += 1;
        }
        g.next = end;

        Ok(Some(batch))
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn append(&self, stream: &str, record: LogRecord) -> Result<LogPosition, LogError> {
        self.check_available()?;
        let position = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let position = LogPosition::new(0, state.entries.len() as u64 + 1);
            state.entries.push((position, record));
            position
        };
        self.appended.notify_waiters();
        Ok(position)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreation, LogError> {
        self.check_available()?;
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Ok(GroupCreation::Existed);
        }
        let tail = state.entries.len();
        state.groups.insert(
            group.to_string(),
            GroupState {
                next: tail,
                ..Default::default()
            },
        );
        debug!(stream, group, tail, "consumer group created");
        Ok(GroupCreation::Created)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Delivery>, LogError> {
        loop {
            // Register interest before looking so an append in between can't be missed.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(batch) = self.try_claim(stream, group, consumer, count)? {
                return Ok(batch);
            }
            appended.await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<(), LogError> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable(format!("ack of {position} rejected")));
        }
        {
            let mut streams = self.streams.lock();
            let state = streams.get_mut(stream).ok_or_else(|| LogError::NoGroup {
                stream: stream.to_string(),
                group:  group.to_string(),
            })?;
            let g = state.group_mut(stream, group)?;
            // Acknowledging something that isn't pending is a no-op, same as XACK.
            if g.pending.remove(&position).is_some() {
                g.acked += 1;
            }
        }
        self.progressed.notify_waiters();
        Ok(())
    }
}

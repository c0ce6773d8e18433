#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wp_cache::error::DecodeError;
use wp_cache::model::Cat;
use wp_cache::prelude::*;

pub const STREAM: &str = "cats";
pub const GROUP: &str = "consumers";

/// Generous upper bound for anything that is expected to settle.
pub const SETTLE: Duration = Duration::from_secs(10);

pub fn cache_with(log: &Arc<MemoryLog>, workers: usize) -> StreamCache<MemoryLog, Cat> {
    StreamCache::builder()
        .log(log.clone())
        .stream_name(STREAM)
        .group_name(GROUP)
        .workers(workers)
        .backoff_initial(Duration::from_millis(5))
        .backoff_max(Duration::from_millis(50))
        .build()
        .expect("cache builds")
}

pub async fn drained(log: &MemoryLog) {
    tokio::time::timeout(SETTLE, log.wait_drained(STREAM, GROUP))
        .await
        .expect("log drained in time");
}

/// Records what the workers did, keyed by log position.
#[derive(Default)]
pub struct CountingObserver {
    applied:   Mutex<HashMap<LogPosition, u32>>,
    by_worker: Mutex<HashMap<usize, u32>>,
    poison:    Mutex<Vec<LogPosition>>,
    errors:    Mutex<u32>,
    delay:     Option<Duration>,
}

impl CountingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every application take at least `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn applied(&self) -> HashMap<LogPosition, u32> {
        self.applied.lock().clone()
    }

    pub fn applied_total(&self) -> u32 {
        self.applied.lock().values().sum()
    }

    pub fn workers_seen(&self) -> usize {
        self.by_worker.lock().len()
    }

    pub fn poison(&self) -> Vec<LogPosition> {
        self.poison.lock().clone()
    }

    pub fn errors(&self) -> u32 {
        *self.errors.lock()
    }
}

#[async_trait]
impl Observer<Cat> for CountingObserver {
    async fn on_applied(&self, worker: usize, position: LogPosition, _command: &Command<Cat>) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.applied.lock().entry(position).or_default() += 1;
        *self.by_worker.lock().entry(worker).or_default() += 1;
    }

    async fn on_poison(&self, _worker: usize, position: LogPosition, _error: &DecodeError) {
        self.poison.lock().push(position);
    }

    async fn on_error(&self, _worker: usize, _error: &LogError) {
        *self.errors.lock() += 1;
    }
}

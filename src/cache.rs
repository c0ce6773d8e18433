use fieldx::fxstruct;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::codec;
use crate::config::CacheConfig;
use crate::coordinator;
use crate::error::CacheError;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::state::MaterializedState;
use crate::traits::DurableLog;
use crate::traits::Entity;
use crate::traits::Observer;
use crate::types::CacheStatus;
use crate::types::Command;
use crate::types::LogPosition;
use crate::worker::Backoff;
use crate::worker::Worker;

pub const DEFAULT_STREAM_NAME: &str = "cats";
pub const DEFAULT_GROUP_NAME: &str = "consumers";
pub const DEFAULT_CONSUMER_PREFIX: &str = "worker";

/// The cache facade.
///
/// Mutations are appended to the log and return as soon as the append succeeds. The worker pool applies them to the
/// materialized state some time later; [`read()`](Self::read) only ever looks at that state. A miss means "ask the
/// system of record", never an error.
///
/// ```ignore
/// let cache = StreamCache::<RedisLog, Cat>::builder()
///     .log(Arc::new(RedisLog::connect("redis://127.0.0.1").await?))
///     .stream_name("cats")
///     .group_name("consumers")
///     .workers(3)
///     .build()?;
///
/// cache.start().await?;
/// cache.write(Cat::new("c1", "Tom")).await?;
///
/// // Eventually:
/// if let Some(cat) = cache.read(&"c1".to_string()) {
///     // ...
/// }
/// ```
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`StreamCache`].", "", "See [`StreamCache::builder()`] method."),
        method_doc("Implement builder pattern for [`StreamCache`]."),
    )
)]
pub struct StreamCache<L, E>
where
    L: DurableLog,
    E: Entity,
{
    #[fieldx(builder(required, into), get(clone))]
    log: Arc<L>,

    /// Stream the commands go to.
    #[fieldx(get, builder(into), default(String::from(DEFAULT_STREAM_NAME)))]
    stream_name: String,

    #[fieldx(get, builder(into), default(String::from(DEFAULT_GROUP_NAME)))]
    group_name: String,

    #[fieldx(get, builder(into), default(String::from(DEFAULT_CONSUMER_PREFIX)))]
    consumer_prefix: String,

    #[fieldx(get(copy), default(3))]
    workers: usize,

    /// Records a worker claims per read.
    #[fieldx(get(copy), default(1))]
    fetch_count: usize,

    #[fieldx(get(copy), default(Duration::from_millis(50)))]
    backoff_initial: Duration,

    #[fieldx(get(copy), default(Duration::from_secs(5)))]
    backoff_max: Duration,

    /// Can be shared with other components; the cache never replaces it.
    #[fieldx(get(clone), default(Arc::new(MaterializedState::new())))]
    state: Arc<MaterializedState<E>>,

    #[fieldx(optional, get(clone))]
    observer: Arc<dyn Observer<E>>,

    #[fieldx(lock, get(copy), set(private), builder(off), default(CacheStatus::Idle))]
    status: CacheStatus,

    #[fieldx(private, clearer, lock, get(off), set, builder(off))]
    pool: WorkerPool,

    // Serializes start() and shutdown().
    #[fieldx(private, get(off), builder(off), default(tokio::sync::Mutex::new(())))]
    lifecycle: tokio::sync::Mutex<()>,
}

impl<L, E> StreamCache<L, E>
where
    L: DurableLog,
    E: Entity,
{
    pub fn from_config(log: Arc<L>, config: &CacheConfig) -> Result<Self> {
        Self::builder()
            .log(log)
            .stream_name(config.stream_name())
            .group_name(config.group_name())
            .consumer_prefix(config.consumer_prefix())
            .workers(config.workers())
            .fetch_count(config.fetch_count())
            .backoff_initial(config.backoff_initial())
            .backoff_max(config.backoff_max())
            .build()
            .map_err(CacheError::builder("StreamCache"))
    }

    async fn append(&self, command: Command<E>) -> Result<LogPosition> {
        let method = command.method();
        let record = codec::encode(&command)?;

        match self.log().append(self.stream_name(), record).await {
            Ok(position) => {
                debug!(stream = %self.stream_name(), %method, id = %command.id(), %position, "command appended");
                Ok(position)
            }
            Err(err) => {
                error!(stream = %self.stream_name(), %method, id = %command.id(), error = %err, "failed to append command");
                Err(err.into())
            }
        }
    }

    /// Queue a snapshot for insertion. Returns once the command is in the log.
    pub async fn write(&self, entity: E) -> Result<LogPosition> {
        self.append(Command::Set(entity)).await
    }

    pub async fn update(&self, entity: E) -> Result<LogPosition> {
        self.append(Command::Update(entity)).await
    }

    pub async fn delete(&self, id: E::Id) -> Result<LogPosition> {
        self.append(Command::Delete(id)).await
    }

    /// Look the identifier up in the materialized state.
    pub fn read(&self, id: &E::Id) -> Option<E> {
        let found = self.state().get(id);
        debug!(%id, hit = found.is_some(), "cache read");
        found
    }

    /// Set up the consumer group and spawn the workers.
    ///
    /// If the group can't be created the cache goes [`Cold`](CacheStatus::Cold) for good: no workers run and every
    /// read misses. Calling `start` on a running or cold cache changes nothing.
    pub async fn start(&self) -> Result<CacheStatus> {
        let _lifecycle = self.lifecycle.lock().await;

        let status = self.status();
        if matches!(status, CacheStatus::Running | CacheStatus::Cold) {
            debug!(?status, "cache already started");
            return Ok(status);
        }

        if self.workers() == 0 {
            return Err(CacheError::Config("worker count must be positive".to_string()));
        }

        let log = self.log();
        if !coordinator::ensure_group(&*log, self.stream_name(), self.group_name()).await {
            self.set_status(CacheStatus::Cold);
            return Ok(CacheStatus::Cold);
        }

        let mut pool = WorkerPool::new();
        for ordinal in 0..self.workers() {
            let mut builder = Worker::builder()
                .ordinal(ordinal)
                .consumer(format!("{}-{ordinal}", self.consumer_prefix()))
                .stream(self.stream_name().clone())
                .group(self.group_name().clone())
                .log(log.clone())
                .state(self.state())
                .fetch_count(self.fetch_count())
                .backoff(Backoff::new(self.backoff_initial(), self.backoff_max()))
                .shutdown(pool.subscribe());
            if let Some(observer) = self.observer() {
                builder = builder.observer(observer);
            }
            pool.spawn(builder.build().map_err(CacheError::builder("Worker"))?);
        }

        info!(
            stream = %self.stream_name(),
            group = %self.group_name(),
            workers = pool.len(),
            "cache workers started"
        );
        self.set_pool(pool);
        self.set_status(CacheStatus::Running);
        Ok(CacheStatus::Running)
    }

    /// Stop the workers and wait for them. Deliveries being applied are finished and acknowledged first. The state
    /// stays readable afterwards.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(pool) = self.clear_pool() {
            info!(stream = %self.stream_name(), group = %self.group_name(), "shutting cache workers down");
            pool.shutdown().await;
            self.set_status(CacheStatus::Stopped);
        }
    }
}

//! Cache-aside service over a system of record.
//!
//! Every mutation goes to the repository first and is then propagated to the cache through the log. Reads try the
//! cache and fall back to the repository on a miss. The fallback result is returned to the caller only; the cache is
//! fed by the log alone.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::cache::StreamCache;
use crate::error::RepositoryError;
use crate::error::ServiceError;
use crate::traits::DurableLog;
use crate::traits::Entity;

/// A partial change of an entity.
pub trait Patch<E>: Send + 'static {
    fn apply_to(self, entity: &mut E);
}

/// The source of truth the cache sits in front of.
#[async_trait]
pub trait Repository<E>: Send + Sync + 'static
where
    E: Entity,
{
    async fn create(&self, entity: &E) -> Result<(), RepositoryError>;
    async fn get(&self, id: &E::Id) -> Result<Option<E>, RepositoryError>;
    /// Apply the patch and return the resulting record.
    async fn update<P: Patch<E>>(&self, id: &E::Id, patch: P) -> Result<E, RepositoryError>;
    async fn delete(&self, id: &E::Id) -> Result<(), RepositoryError>;
}

/// In-process repository. Counts reads so callers can tell how often the cache was bypassed.
pub struct MemoryRepository<E>
where
    E: Entity,
{
    records: Mutex<HashMap<E::Id, E>>,
    reads:   AtomicUsize,
}

impl<E> MemoryRepository<E>
where
    E: Entity,
{
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            reads:   AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl<E> Default for MemoryRepository<E>
where
    E: Entity,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> Repository<E> for MemoryRepository<E>
where
    E: Entity,
{
    async fn create(&self, entity: &E) -> Result<(), RepositoryError> {
        let mut records = self.records.lock();
        if records.contains_key(entity.id()) {
            return Err(RepositoryError::AlreadyExists(entity.id().to_string()));
        }
        records.insert(entity.id().clone(), entity.clone());
        Ok(())
    }

    async fn get(&self, id: &E::Id) -> Result<Option<E>, RepositoryError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.lock().get(id).cloned())
    }

    async fn update<P: Patch<E>>(&self, id: &E::Id, patch: P) -> Result<E, RepositoryError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        patch.apply_to(record);
        Ok(record.clone())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}

pub struct CachedService<R, L, E>
where
    R: Repository<E>,
    L: DurableLog,
    E: Entity,
{
    repository: Arc<R>,
    cache:      Arc<StreamCache<L, E>>,
}

impl<R, L, E> CachedService<R, L, E>
where
    R: Repository<E>,
    L: DurableLog,
    E: Entity,
{
    pub fn new(repository: Arc<R>, cache: Arc<StreamCache<L, E>>) -> Self {
        Self { repository, cache }
    }

    pub fn cache(&self) -> &Arc<StreamCache<L, E>> {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub async fn create(&self, entity: E) -> Result<E::Id, ServiceError> {
        let id = entity.id().clone();
        self.repository.create(&entity).await?;
        self.cache.write(entity).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &E::Id) -> Result<Option<E>, ServiceError> {
        if let Some(entity) = self.cache.read(id) {
            return Ok(Some(entity));
        }
        debug!(%id, "cache miss, reading from repository");
        Ok(self.repository.get(id).await?)
    }

    pub async fn update<P: Patch<E>>(&self, id: &E::Id, patch: P) -> Result<E, ServiceError> {
        let updated = self.repository.update(id, patch).await?;
        self.cache.update(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &E::Id) -> Result<(), ServiceError> {
        self.repository.delete(id).await?;
        self.cache.delete(id.clone()).await?;
        Ok(())
    }
}

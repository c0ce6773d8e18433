use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::traits::Entity;
use crate::types::ApplyOutcome;
use crate::types::Command;

/// The materialized view: latest applied snapshot per identifier.
///
/// A single lock guards the whole map. Every critical section is one map operation, so readers and the workers never
/// hold it for long. There is no eviction; the map grows with the number of distinct identifiers written.
pub struct MaterializedState<E>
where
    E: Entity,
{
    entries: Mutex<HashMap<E::Id, E>>,
}

impl<E> MaterializedState<E>
where
    E: Entity,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the snapshot for `id`, if one has been applied.
    pub fn get(&self, id: &E::Id) -> Option<E> {
        self.entries.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn apply(&self, command: Command<E>) -> ApplyOutcome {
        match command {
            Command::Set(entity) | Command::Update(entity) => {
                let id = entity.id().clone();
                if self.entries.lock().insert(id, entity).is_some() {
                    ApplyOutcome::Replaced
                }
                else {
                    ApplyOutcome::Inserted
                }
            }
            Command::Delete(id) => {
                if self.entries.lock().remove(&id).is_some() {
                    ApplyOutcome::Removed
                }
                else {
                    ApplyOutcome::StillNone
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<E> Default for MaterializedState<E>
where
    E: Entity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Debug for MaterializedState<E>
where
    E: Entity,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("MaterializedState").field("len", &self.len()).finish()
    }
}

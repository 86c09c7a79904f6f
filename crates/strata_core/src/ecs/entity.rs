// entity.rs - Entity id allocation and the entity -> archetype index
//
// Entities are opaque u64 ids with no payload. Fresh ids come from a
// monotonic counter; destroyed ids go onto a FIFO free list and are
// reissued before the counter advances. No two live entities ever
// share an id, but id stability across a destroy/create pair is not
// guaranteed.

use crate::ecs::storage::ArchetypeId;
use std::collections::{HashMap, VecDeque};

pub type EntityId = u64;

#[derive(Default)]
pub struct EntityAllocator {
    next: EntityId,
    free: VecDeque<EntityId>,
    locations: HashMap<EntityId, ArchetypeId>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue an id and record the entity's archetype.
    pub fn allocate(&mut self, archetype: ArchetypeId) -> EntityId {
        let id = match self.free.pop_front() {
            Some(recycled) => recycled,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        };
        self.locations.insert(id, archetype);
        id
    }

    /// Return an id to the free list. Silent when the entity is
    /// already gone.
    pub fn release(&mut self, entity: EntityId) {
        if self.locations.remove(&entity).is_some() {
            self.free.push_back(entity);
        }
    }

    pub fn location(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.locations.get(&entity).copied()
    }

    /// Repoint a live entity at a new archetype after migration.
    pub fn relocate(&mut self, entity: EntityId, archetype: ArchetypeId) {
        self.locations.insert(entity, archetype);
    }

    pub fn is_live(&self, entity: EntityId) -> bool {
        self.locations.contains_key(&entity)
    }

    pub fn live_count(&self) -> usize {
        self.locations.len()
    }

    // Snapshot state accessors.

    pub fn next_id(&self) -> EntityId {
        self.next
    }

    pub fn free_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.free.iter().copied()
    }

    /// Replace allocator state wholesale during restore.
    pub fn restore(
        &mut self,
        next: EntityId,
        free: Vec<EntityId>,
        locations: HashMap<EntityId, ArchetypeId>,
    ) {
        self.next = next;
        self.free = free.into();
        self.locations = locations;
    }
}

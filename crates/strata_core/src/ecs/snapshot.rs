// snapshot.rs - Deterministic binary encoding of the whole store
//
// One bincode envelope: allocator state, then archetype records in
// archetype-id order, each with its component set, dense entity list
// and per-column row payloads in ascending component-id order. No
// hash-map iteration leaks into the byte stream, so unchanged state
// always encodes to identical bytes. Column rows are opaque payloads
// from the per-component codec, keyed by registered name so restore
// can rebuild concrete columns through the destination's factories.

use crate::ecs::bitset::IdSet;
use crate::ecs::component::ComponentRegistry;
use crate::ecs::entity::{EntityAllocator, EntityId};
use crate::ecs::storage::{Archetype, ArchetypeId, ColumnError, StorageError};
use crate::ecs::world::WorldStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot envelope codec failed: {0}")]
    Envelope(#[from] bincode::Error),

    #[error(transparent)]
    Column(#[from] ColumnError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("component '{name}' is not registered in the destination")]
    UnregisteredComponent { name: String },
}

#[derive(Serialize, Deserialize)]
struct ColumnRecord {
    name: String,
    rows: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct ArchetypeRecord {
    set: IdSet,
    entities: Vec<EntityId>,
    columns: Vec<ColumnRecord>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotDoc {
    next_id: EntityId,
    free: Vec<EntityId>,
    archetypes: Vec<ArchetypeRecord>,
}

pub(crate) fn serialize_store(
    store: &WorldStore,
    registry: &ComponentRegistry,
) -> Result<Vec<u8>, SnapshotError> {
    let mut archetypes = Vec::with_capacity(store.archetypes.len());
    for archetype in &store.archetypes {
        let mut columns = Vec::with_capacity(archetype.component_ids().len());
        for &cid in archetype.component_ids() {
            let name = registry
                .name_of(cid)
                .ok_or_else(|| SnapshotError::UnregisteredComponent {
                    name: format!("component id {cid}"),
                })?
                .to_string();
            let column = archetype.column(cid)?;
            let mut rows = Vec::with_capacity(archetype.len());
            for row in 0..archetype.len() {
                rows.push(column.encode_row(row)?);
            }
            columns.push(ColumnRecord { name, rows });
        }
        archetypes.push(ArchetypeRecord {
            set: *archetype.set(),
            entities: archetype.entities().to_vec(),
            columns,
        });
    }

    let doc = SnapshotDoc {
        next_id: store.allocator.next_id(),
        free: store.allocator.free_ids().collect(),
        archetypes,
    };
    Ok(bincode::serialize(&doc)?)
}

/// Decode a snapshot into a fully-built staging store. Nothing is
/// mutated on failure; the caller swaps the result in wholesale.
pub(crate) fn decode_store(
    bytes: &[u8],
    registry: &ComponentRegistry,
) -> Result<WorldStore, SnapshotError> {
    let doc: SnapshotDoc = bincode::deserialize(bytes)?;

    let mut archetypes = Vec::with_capacity(doc.archetypes.len());
    let mut index = HashMap::new();
    let mut locations = HashMap::new();

    for (i, record) in doc.archetypes.into_iter().enumerate() {
        let id = i as ArchetypeId;

        // Resolve column names against the destination registry; ids
        // are reassigned, so the stored set is rebuilt from names.
        let mut set = IdSet::new();
        let mut columns_data = Vec::with_capacity(record.columns.len());
        for column in record.columns {
            let cid = registry.id_of(&column.name).map_err(|_| {
                SnapshotError::UnregisteredComponent {
                    name: column.name.clone(),
                }
            })?;
            set.insert(cid);
            columns_data.push((cid, column.rows));
        }

        for &entity in &record.entities {
            locations.insert(entity, id);
        }
        let archetype = Archetype::from_rows(id, set, registry, record.entities, columns_data)?;
        index.insert(set, id);
        archetypes.push(archetype);
    }

    let mut allocator = EntityAllocator::new();
    allocator.restore(doc.next_id, doc.free, locations);

    Ok(WorldStore {
        archetypes,
        index,
        allocator,
        // The caller stamps the live generation when swapping in.
        generation: 0,
    })
}

#[cfg(test)]
mod tests {
    use crate::ecs::{Match, World};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Health {
        value: i32,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i64,
        y: i64,
    }

    fn sample_world() -> World {
        let world = World::new();
        world.register_component::<Health>("Health").unwrap();
        world.register_component::<Position>("Position").unwrap();
        world.create_entity((Health { value: 100 },)).unwrap();
        world
            .create_entity((Health { value: 50 }, Position { x: 1, y: 2 }))
            .unwrap();
        world.create_entity((Position { x: -3, y: 9 },)).unwrap();
        // Leave a hole on the free list.
        let doomed = world.create_entity((Health { value: 1 },)).unwrap();
        world.destroy_entity(doomed);
        world
    }

    #[test]
    fn round_trip_is_observationally_identical() {
        let source = sample_world();
        let bytes = source.snapshot().unwrap();

        let target = World::new();
        target.register_component::<Health>("Health").unwrap();
        target.register_component::<Position>("Position").unwrap();
        target.restore(&bytes).unwrap();

        assert_eq!(target.entity_count(), source.entity_count());
        let search = target.search::<(Health,)>(Match::Contains).unwrap();
        let mut healths: Vec<i32> = search
            .iter(&target)
            .map(|e| e.get::<Health>().unwrap().value)
            .collect();
        healths.sort_unstable();
        assert_eq!(healths, vec![50, 100]);

        // Free-list state survives: the next created entity reuses
        // the destroyed id.
        let recycled = target.create_entity((Health { value: 7 },)).unwrap();
        let fresh = target.create_entity((Health { value: 8 },)).unwrap();
        assert_eq!(recycled, 3);
        assert_eq!(fresh, 4);
    }

    #[test]
    fn serialization_is_deterministic() {
        let world = sample_world();
        let first = world.snapshot().unwrap();
        let second = world.snapshot().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn restore_fails_on_unregistered_component() {
        let source = sample_world();
        let bytes = source.snapshot().unwrap();

        let target = World::new();
        target.register_component::<Health>("Health").unwrap();
        // Position is missing in the destination.
        let before = target.entity_count();
        let err = target.restore(&bytes).unwrap_err();
        assert!(matches!(
            err,
            super::SnapshotError::UnregisteredComponent { .. }
        ));
        // No partial mutation.
        assert_eq!(target.entity_count(), before);
    }

    #[test]
    fn restore_replaces_existing_state() {
        let source = sample_world();
        let bytes = source.snapshot().unwrap();

        let target = World::new();
        target.register_component::<Health>("Health").unwrap();
        target.register_component::<Position>("Position").unwrap();
        for _ in 0..5 {
            target.create_entity((Health { value: 9 },)).unwrap();
        }
        target.restore(&bytes).unwrap();
        assert_eq!(target.entity_count(), source.entity_count());
    }
}

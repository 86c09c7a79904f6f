// archetype.rs - Storage partition for one exact component set
//
// All entities sharing the same component-id set live in one
// archetype: a dense entity list, one column per set bit ordered by
// ascending component id, and an entity -> row map. Every column has
// exactly as many rows as the entity list.

use crate::ecs::bitset::IdSet;
use crate::ecs::component::{ComponentId, ComponentRegistry, RegistryError};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::column::{ColumnError, ColumnStorage};
use std::any::Any;
use std::collections::HashMap;
use thiserror::Error;

pub type ArchetypeId = u32;

/// Structural errors surfaced at tick time.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("entity {entity} not found")]
    EntityNotFound { entity: EntityId },

    #[error("entity {entity} does not have component {component}")]
    ComponentNotAttached {
        entity: EntityId,
        component: ComponentId,
    },

    #[error("entity {entity} already has component {component}")]
    ComponentAlreadyPresent {
        entity: EntityId,
        component: ComponentId,
    },

    #[error("archetype expects {expected} components, got {actual}")]
    ComponentCountMismatch { expected: usize, actual: usize },

    #[error("component {component} does not belong to this archetype")]
    ComponentNotInArchetype { component: ComponentId },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// One archetype: storage for all entities with one exact component
/// set.
pub struct Archetype {
    id: ArchetypeId,
    set: IdSet,
    /// Set bits in ascending order; parallel to `columns`.
    component_ids: Vec<ComponentId>,
    /// Dense list of live entity ids; rows are positions in this list.
    entities: Vec<EntityId>,
    rows: HashMap<EntityId, usize>,
    columns: Vec<Box<dyn ColumnStorage>>,
}

impl Archetype {
    /// Build an archetype for `set`, creating one column per set bit
    /// via the registry's factories.
    pub fn new(id: ArchetypeId, set: IdSet, registry: &ComponentRegistry) -> Result<Self, StorageError> {
        let component_ids: Vec<ComponentId> = set.iter().collect();
        let mut columns = Vec::with_capacity(component_ids.len());
        for &cid in &component_ids {
            let column = registry
                .new_column(cid)
                .ok_or(RegistryError::UnknownName {
                    name: format!("component id {cid}"),
                })?;
            columns.push(column);
        }
        Ok(Self {
            id,
            set,
            component_ids,
            entities: Vec::new(),
            rows: HashMap::new(),
            columns,
        })
    }

    /// Rebuild an archetype from decoded snapshot rows. Every column
    /// must decode to exactly one row per entity.
    pub(crate) fn from_rows(
        id: ArchetypeId,
        set: IdSet,
        registry: &ComponentRegistry,
        entities: Vec<EntityId>,
        columns_data: Vec<(ComponentId, Vec<Vec<u8>>)>,
    ) -> Result<Self, StorageError> {
        let mut archetype = Self::new(id, set, registry)?;
        if columns_data.len() != archetype.columns.len() {
            return Err(StorageError::ComponentCountMismatch {
                expected: archetype.columns.len(),
                actual: columns_data.len(),
            });
        }
        for (cid, rows) in columns_data {
            if rows.len() != entities.len() {
                return Err(StorageError::ComponentCountMismatch {
                    expected: entities.len(),
                    actual: rows.len(),
                });
            }
            let idx = archetype.column_index(cid)?;
            for bytes in rows {
                archetype.columns[idx].decode_push(&bytes)?;
            }
        }
        archetype.rows = entities
            .iter()
            .enumerate()
            .map(|(row, &entity)| (entity, row))
            .collect();
        archetype.entities = entities;
        Ok(archetype)
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn set(&self) -> &IdSet {
        &self.set
    }

    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    /// Exact-equality match against a component set.
    #[inline]
    pub fn matches(&self, set: &IdSet) -> bool {
        self.set == *set
    }

    /// Superset match against a component set.
    #[inline]
    pub fn contains(&self, set: &IdSet) -> bool {
        self.set.is_superset(set)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn row_of(&self, entity: EntityId) -> Option<usize> {
        self.rows.get(&entity).copied()
    }

    fn column_index(&self, cid: ComponentId) -> Result<usize, StorageError> {
        self.component_ids
            .binary_search(&cid)
            .map_err(|_| StorageError::ComponentNotInArchetype { component: cid })
    }

    pub fn column(&self, cid: ComponentId) -> Result<&dyn ColumnStorage, StorageError> {
        let idx = self.column_index(cid)?;
        Ok(self.columns[idx].as_ref())
    }

    pub fn column_mut(&mut self, cid: ComponentId) -> Result<&mut dyn ColumnStorage, StorageError> {
        let idx = self.column_index(cid)?;
        Ok(self.columns[idx].as_mut())
    }

    /// Insert an entity with one value per column.
    ///
    /// The supplied components must cover the archetype's set exactly;
    /// a count or id mismatch is an error and leaves the archetype
    /// untouched.
    pub fn new_entity(
        &mut self,
        entity: EntityId,
        mut components: Vec<(ComponentId, Box<dyn Any + Send>)>,
    ) -> Result<(), StorageError> {
        if components.len() != self.columns.len() {
            return Err(StorageError::ComponentCountMismatch {
                expected: self.columns.len(),
                actual: components.len(),
            });
        }
        components.sort_by_key(|(cid, _)| *cid);
        for ((cid, _), expected) in components.iter().zip(self.component_ids.iter()) {
            if cid != expected {
                return Err(StorageError::ComponentNotInArchetype { component: *cid });
            }
        }

        let row = self.entities.len();
        for (idx, (_, value)) in components.into_iter().enumerate() {
            self.columns[idx].push_boxed(value)?;
        }
        self.entities.push(entity);
        self.rows.insert(entity, row);
        Ok(())
    }

    /// Swap-remove an entity from the dense list and every column,
    /// fixing the row mapping of the entity that got displaced.
    pub fn remove_entity(&mut self, entity: EntityId) -> Result<(), StorageError> {
        let row = self
            .rows
            .remove(&entity)
            .ok_or(StorageError::EntityNotFound { entity })?;

        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.swap_remove(row)?;
        }
        // The former last entity now occupies `row`.
        if row < self.entities.len() {
            let moved = self.entities[row];
            self.rows.insert(moved, row);
        }
        Ok(())
    }

    /// Clone out an entity's current component values, optionally
    /// excluding one id. Used to carry values across a migration.
    pub fn collect_components(
        &self,
        entity: EntityId,
        exclude: Option<ComponentId>,
    ) -> Result<Vec<(ComponentId, Box<dyn Any + Send>)>, StorageError> {
        let row = self
            .rows
            .get(&entity)
            .copied()
            .ok_or(StorageError::EntityNotFound { entity })?;

        let mut values = Vec::with_capacity(self.columns.len());
        for (idx, &cid) in self.component_ids.iter().enumerate() {
            if exclude == Some(cid) {
                continue;
            }
            values.push((cid, self.columns[idx].get_boxed(row)?));
        }
        Ok(values)
    }

    /// Clone the value of one component for one entity.
    pub fn get_component(
        &self,
        entity: EntityId,
        cid: ComponentId,
    ) -> Result<Box<dyn Any + Send>, StorageError> {
        let row = self
            .rows
            .get(&entity)
            .copied()
            .ok_or(StorageError::EntityNotFound { entity })?;
        let idx = self.column_index(cid).map_err(|_| StorageError::ComponentNotAttached {
            entity,
            component: cid,
        })?;
        Ok(self.columns[idx].get_boxed(row)?)
    }

    /// Overwrite the value of one component for one entity.
    pub fn set_component(
        &mut self,
        entity: EntityId,
        cid: ComponentId,
        value: Box<dyn Any + Send>,
    ) -> Result<(), StorageError> {
        let row = self
            .rows
            .get(&entity)
            .copied()
            .ok_or(StorageError::EntityNotFound { entity })?;
        let idx = self.column_index(cid).map_err(|_| StorageError::ComponentNotAttached {
            entity,
            component: cid,
        })?;
        self.columns[idx].set_boxed(row, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Health {
        value: i32,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f64,
        y: f64,
    }

    fn registry() -> (ComponentRegistry, ComponentId, ComponentId) {
        let mut reg = ComponentRegistry::new();
        let health = reg.register::<Health>("Health").unwrap();
        let position = reg.register::<Position>("Position").unwrap();
        (reg, health, position)
    }

    fn pair_archetype() -> (Archetype, ComponentId, ComponentId) {
        let (reg, health, position) = registry();
        let set = IdSet::from_ids(&[health, position]);
        (Archetype::new(0, set, &reg).unwrap(), health, position)
    }

    #[test]
    fn new_entity_fills_every_column() {
        let (mut arch, health, position) = pair_archetype();
        arch.new_entity(
            7,
            vec![
                (position, Box::new(Position { x: 1.0, y: 2.0 })),
                (health, Box::new(Health { value: 100 })),
            ],
        )
        .unwrap();

        assert_eq!(arch.len(), 1);
        assert_eq!(arch.row_of(7), Some(0));
        let got = arch.get_component(7, health).unwrap();
        assert_eq!(got.downcast_ref::<Health>(), Some(&Health { value: 100 }));
    }

    #[test]
    fn component_count_mismatch_is_rejected() {
        let (mut arch, health, _) = pair_archetype();
        let err = arch
            .new_entity(7, vec![(health, Box::new(Health { value: 1 }))])
            .unwrap_err();
        assert!(matches!(err, StorageError::ComponentCountMismatch { .. }));
        assert_eq!(arch.len(), 0);
    }

    #[test]
    fn remove_fixes_displaced_row() {
        let (mut arch, health, position) = pair_archetype();
        for entity in 1..=3u64 {
            arch.new_entity(
                entity,
                vec![
                    (health, Box::new(Health { value: entity as i32 })),
                    (position, Box::new(Position::default())),
                ],
            )
            .unwrap();
        }

        arch.remove_entity(1).unwrap();
        // Entity 3 was swapped into row 0.
        assert_eq!(arch.row_of(3), Some(0));
        assert_eq!(arch.row_of(2), Some(1));
        let got = arch.get_component(3, health).unwrap();
        assert_eq!(got.downcast_ref::<Health>(), Some(&Health { value: 3 }));
    }

    #[test]
    fn collect_components_can_exclude() {
        let (mut arch, health, position) = pair_archetype();
        arch.new_entity(
            1,
            vec![
                (health, Box::new(Health { value: 9 })),
                (position, Box::new(Position { x: 3.0, y: 4.0 })),
            ],
        )
        .unwrap();

        let all = arch.collect_components(1, None).unwrap();
        assert_eq!(all.len(), 2);
        let without_health = arch.collect_components(1, Some(health)).unwrap();
        assert_eq!(without_health.len(), 1);
        assert_eq!(without_health[0].0, position);
    }

    #[test]
    fn match_policies() {
        let (arch, health, position) = pair_archetype();
        let exact = IdSet::from_ids(&[health, position]);
        let sub = IdSet::from_ids(&[health]);
        assert!(arch.matches(&exact));
        assert!(!arch.matches(&sub));
        assert!(arch.contains(&sub));
        assert!(arch.contains(&exact));
    }
}

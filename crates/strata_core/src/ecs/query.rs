// query.rs - Declared searches and ad-hoc filtered queries
//
// A search resolves its component-id set once, at creation. Contains
// evaluation re-scans the archetype list behind an "already scanned"
// high-water cursor, which is a valid cache because the list only
// grows; Exact evaluation is a single index lookup.

use crate::ecs::bitset::IdSet;
use crate::ecs::bundle::ComponentBundle;
use crate::ecs::component::{Component, RegistryError};
use crate::ecs::entity::EntityId;
use crate::ecs::storage::{ArchetypeId, ColumnError, StorageError};
use crate::ecs::world::{World, WorldStore};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Match {
    /// Archetype set is a superset of the search set.
    Contains,
    /// Archetype set equals the search set.
    Exact,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Column(#[from] ColumnError),

    #[error("entity {entity} does not match this search")]
    EntityNotInSearch { entity: EntityId },

    #[error("search expects component set {expected:?}, bundle has {actual:?}")]
    BundleMismatch {
        expected: Vec<u32>,
        actual: Vec<u32>,
    },

    #[error("filter predicate returned '{got}', expected a boolean")]
    PredicateNotBoolean { got: String },

    #[error("filter predicate failed: {0}")]
    Predicate(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// External boolean evaluator over an entity's name -> value field
/// dictionary. The engine only builds the dictionary and checks the
/// result shape.
pub trait FilterPredicate: Send + Sync {
    fn eval(
        &self,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Default)]
struct MatchCache {
    /// Store generation the cursor was built against.
    generation: u64,
    /// Archetypes inspected so far; within one generation the list
    /// only grows.
    scanned: usize,
    ids: Vec<ArchetypeId>,
}

/// A search with its component-id set resolved once at creation.
pub struct Search {
    set: IdSet,
    mode: Match,
    cache: Mutex<MatchCache>,
}

impl Search {
    pub(crate) fn new(set: IdSet, mode: Match) -> Self {
        Self {
            set,
            mode,
            cache: Mutex::new(MatchCache::default()),
        }
    }

    pub fn mode(&self) -> Match {
        self.mode
    }

    /// Archetype ids currently matching this search.
    fn matching_archetypes(&self, store: &WorldStore) -> Vec<ArchetypeId> {
        match self.mode {
            Match::Exact => store.index.get(&self.set).copied().into_iter().collect(),
            Match::Contains => {
                let mut cache = self.cache.lock();
                if cache.generation != store.generation {
                    // The store was replaced (snapshot restore); the
                    // cursor and cached ids are stale.
                    cache.generation = store.generation;
                    cache.scanned = 0;
                    cache.ids.clear();
                }
                for archetype in &store.archetypes[cache.scanned..] {
                    if archetype.contains(&self.set) {
                        cache.ids.push(archetype.id());
                    }
                }
                cache.scanned = store.archetypes.len();
                cache.ids.clone()
            }
        }
    }

    /// Lazy single-pass iteration over matching entities. Early
    /// termination is always safe, and re-running against unchanged
    /// state yields the same sequence.
    pub fn iter<'w>(&self, world: &'w World) -> SearchIter<'w> {
        let mut archetypes = self.matching_archetypes(&world.store.read());
        archetypes.reverse(); // consumed by pop
        SearchIter {
            world,
            archetypes,
            pending: Vec::new(),
        }
    }

    /// Number of entities currently matching.
    pub fn count(&self, world: &World) -> usize {
        let store = world.store.read();
        self.matching_archetypes(&store)
            .iter()
            .map(|&id| store.archetypes[id as usize].len())
            .sum()
    }

    /// Create an entity in the archetype bound to this search's exact
    /// component set, creating the archetype on first use.
    pub fn create<B: ComponentBundle>(
        &self,
        world: &World,
        bundle: B,
    ) -> Result<EntityId, QueryError> {
        let registry = world.registry.read();
        let ids = B::component_ids(&registry)?;
        let bundle_set = IdSet::from_ids(&ids);
        if bundle_set != self.set {
            return Err(QueryError::BundleMismatch {
                expected: self.set.iter().collect(),
                actual: ids,
            });
        }
        let values = bundle.into_values(&registry)?;
        let entity = world.store.write().create_entity(&registry, values)?;
        Ok(entity)
    }

    /// Destroy an entity held by this search's bound archetype.
    pub fn destroy(&self, world: &World, entity: EntityId) -> Result<(), QueryError> {
        self.check_bound(world, entity)?;
        world.destroy_entity(entity);
        Ok(())
    }

    /// Fetch an entity from this search's bound archetype.
    pub fn get_by_id<'w>(
        &self,
        world: &'w World,
        entity: EntityId,
    ) -> Result<EntityRef<'w>, QueryError> {
        self.check_bound(world, entity)?;
        Ok(EntityRef { world, entity })
    }

    fn check_bound(&self, world: &World, entity: EntityId) -> Result<(), QueryError> {
        let store = world.store.read();
        let arch_id = store
            .allocator
            .location(entity)
            .ok_or(StorageError::EntityNotFound { entity })?;
        let archetype = &store.archetypes[arch_id as usize];
        let matched = match self.mode {
            Match::Exact => archetype.matches(&self.set),
            Match::Contains => archetype.contains(&self.set),
        };
        if !matched {
            return Err(QueryError::EntityNotInSearch { entity });
        }
        Ok(())
    }
}

/// Lazy entity iterator produced by [`Search::iter`].
pub struct SearchIter<'w> {
    world: &'w World,
    /// Matching archetypes not yet visited, last first.
    archetypes: Vec<ArchetypeId>,
    /// Entities of the archetype being visited, last first.
    pending: Vec<EntityId>,
}

impl<'w> Iterator for SearchIter<'w> {
    type Item = EntityRef<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.pending.pop() {
                return Some(EntityRef {
                    world: self.world,
                    entity,
                });
            }
            let arch_id = self.archetypes.pop()?;
            let store = self.world.store.read();
            let entities = store.archetypes[arch_id as usize].entities();
            self.pending = entities.iter().rev().copied().collect();
        }
    }
}

/// An entity id bound to its world, with typed field access.
#[derive(Clone, Copy)]
pub struct EntityRef<'w> {
    world: &'w World,
    entity: EntityId,
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRef")
            .field("entity", &self.entity)
            .finish()
    }
}

impl<'w> EntityRef<'w> {
    pub fn id(&self) -> EntityId {
        self.entity
    }

    pub fn get<T: Component>(&self) -> Result<T, StorageError> {
        self.world.get_component::<T>(self.entity)
    }

    pub fn set<T: Component>(&self, value: T) -> Result<(), StorageError> {
        self.world.set_component(self.entity, value)
    }
}

impl World {
    /// Build a search from a typed bundle shape. The component-id set
    /// is resolved here, once.
    pub fn search<B: ComponentBundle>(&self, mode: Match) -> Result<Search, QueryError> {
        let registry = self.registry.read();
        let ids = B::component_ids(&registry)?;
        Ok(Search::new(IdSet::from_ids(&ids), mode))
    }

    /// Build a search from registered component names.
    pub fn search_named(&self, names: &[&str], mode: Match) -> Result<Search, QueryError> {
        let registry = self.registry.read();
        let mut set = IdSet::new();
        for name in names {
            set.insert(registry.id_of(name)?);
        }
        Ok(Search::new(set, mode))
    }

    /// Ad-hoc query: component names, a match mode, and an optional
    /// boolean predicate evaluated against each entity's field
    /// dictionary.
    pub fn filter(
        &self,
        names: &[&str],
        mode: Match,
        predicate: Option<&dyn FilterPredicate>,
    ) -> Result<Vec<EntityId>, QueryError> {
        let registry = self.registry.read();
        let mut set = IdSet::new();
        for name in names {
            set.insert(registry.id_of(name)?);
        }

        let store = self.store.read();
        let mut out = Vec::new();
        for archetype in &store.archetypes {
            let matched = match mode {
                Match::Contains => archetype.contains(&set),
                Match::Exact => archetype.matches(&set),
            };
            if !matched {
                continue;
            }
            for &entity in archetype.entities() {
                let Some(predicate) = predicate else {
                    out.push(entity);
                    continue;
                };

                let row = archetype
                    .row_of(entity)
                    .ok_or(StorageError::EntityNotFound { entity })?;
                let mut fields = serde_json::Map::new();
                for &cid in archetype.component_ids() {
                    let name = registry
                        .name_of(cid)
                        .ok_or(RegistryError::UnknownName {
                            name: format!("component id {cid}"),
                        })?
                        .to_string();
                    fields.insert(name, archetype.column(cid)?.encode_field(row)?);
                }

                let verdict = predicate.eval(&fields).map_err(QueryError::Predicate)?;
                match verdict {
                    serde_json::Value::Bool(true) => out.push(entity),
                    serde_json::Value::Bool(false) => {}
                    other => {
                        return Err(QueryError::PredicateNotBoolean {
                            got: other.to_string(),
                        })
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i64,
        y: i64,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Velocity {
        dx: i64,
        dy: i64,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: i64,
    }

    fn test_world() -> World {
        let world = World::new();
        world.register_component::<Position>("position").unwrap();
        world.register_component::<Velocity>("velocity").unwrap();
        world.register_component::<Health>("health").unwrap();
        world
    }

    fn populated_world() -> World {
        let world = test_world();
        for i in 0..50 {
            world
                .create_entity((Position { x: i, y: 0 }, Velocity { dx: 1, dy: 0 }))
                .unwrap();
        }
        for i in 0..20 {
            world.create_entity((Position { x: i, y: 1 },)).unwrap();
        }
        world
    }

    #[test]
    fn test_contains_vs_exact_counts() {
        let world = populated_world();

        let contains = world.search::<(Position,)>(Match::Contains).unwrap();
        assert_eq!(contains.count(&world), 70);

        let exact = world.search::<(Position,)>(Match::Exact).unwrap();
        assert_eq!(exact.count(&world), 20);

        let pair = world
            .search::<(Position, Velocity)>(Match::Exact)
            .unwrap();
        assert_eq!(pair.count(&world), 50);
    }

    #[test]
    fn test_iter_supports_early_termination() {
        let world = populated_world();
        let search = world.search::<(Position,)>(Match::Contains).unwrap();

        let first_ten: Vec<_> = search.iter(&world).take(10).collect();
        assert_eq!(first_ten.len(), 10);

        // A fresh pass still sees everything.
        assert_eq!(search.iter(&world).count(), 70);
    }

    #[test]
    fn test_contains_search_sees_archetypes_created_later() {
        let world = test_world();
        let search = world.search::<(Position,)>(Match::Contains).unwrap();
        assert_eq!(search.count(&world), 0);

        world.create_entity((Position::default(),)).unwrap();
        assert_eq!(search.count(&world), 1);

        // A new superset archetype appears after the first scan.
        world
            .create_entity((Position::default(), Health { current: 1 }))
            .unwrap();
        assert_eq!(search.count(&world), 2);
    }

    #[test]
    fn test_search_named_matches_typed_search() {
        let world = populated_world();
        let named = world
            .search_named(&["position", "velocity"], Match::Exact)
            .unwrap();
        assert_eq!(named.count(&world), 50);
    }

    #[test]
    fn test_create_through_search_checks_bundle_shape() {
        let world = test_world();
        let search = world.search::<(Position,)>(Match::Exact).unwrap();

        let entity = search
            .create(&world, (Position { x: 1, y: 2 },))
            .unwrap();
        assert_eq!(
            world.get_component::<Position>(entity).unwrap(),
            Position { x: 1, y: 2 }
        );

        let err = search
            .create(&world, (Position::default(), Health::default()))
            .unwrap_err();
        assert!(matches!(err, QueryError::BundleMismatch { .. }));
    }

    #[test]
    fn test_get_by_id_enforces_search_bounds() {
        let world = test_world();
        let with_pair = world
            .create_entity((Position { x: 3, y: 0 }, Velocity::default()))
            .unwrap();
        let bare = world.create_entity((Health::default(),)).unwrap();

        let search = world.search::<(Position,)>(Match::Contains).unwrap();
        let entity = search.get_by_id(&world, with_pair).unwrap();
        assert_eq!(entity.get::<Position>().unwrap().x, 3);
        assert_eq!(
            format!("{entity:?}"),
            format!("EntityRef {{ entity: {with_pair} }}")
        );

        let err = search.get_by_id(&world, bare).unwrap_err();
        assert!(matches!(err, QueryError::EntityNotInSearch { .. }));

        search.destroy(&world, with_pair).unwrap();
        assert!(!world.is_live(with_pair));
        let err = search.get_by_id(&world, with_pair).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Storage(StorageError::EntityNotFound { .. })
        ));
    }

    struct MinHealth(i64);

    impl FilterPredicate for MinHealth {
        fn eval(
            &self,
            fields: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            let current = fields
                .get("health")
                .and_then(|v| v.get("current"))
                .and_then(|v| v.as_i64())
                .ok_or("missing health.current")?;
            Ok(serde_json::Value::Bool(current >= self.0))
        }
    }

    struct NotABool;

    impl FilterPredicate for NotABool {
        fn eval(
            &self,
            _fields: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            Ok(serde_json::json!(1))
        }
    }

    #[test]
    fn test_filter_applies_predicate_per_entity() {
        let world = test_world();
        for current in [10, 60, 80] {
            world.create_entity((Health { current },)).unwrap();
        }

        let all = world.filter(&["health"], Match::Contains, None).unwrap();
        assert_eq!(all.len(), 3);

        let healthy = world
            .filter(&["health"], Match::Contains, Some(&MinHealth(50)))
            .unwrap();
        assert_eq!(healthy.len(), 2);
        for entity in healthy {
            assert!(world.get_component::<Health>(entity).unwrap().current >= 50);
        }
    }

    #[test]
    fn test_filter_rejects_non_boolean_verdict() {
        let world = test_world();
        world.create_entity((Health { current: 1 },)).unwrap();

        let err = world
            .filter(&["health"], Match::Contains, Some(&NotABool))
            .unwrap_err();
        assert!(matches!(err, QueryError::PredicateNotBoolean { .. }));
    }

    #[test]
    fn test_contains_search_survives_restore_to_smaller_store() {
        let world = test_world();
        world.create_entity((Position::default(),)).unwrap();
        world
            .create_entity((Position::default(), Velocity::default()))
            .unwrap();

        let search = world.search::<(Position,)>(Match::Contains).unwrap();
        assert_eq!(search.count(&world), 2);

        // Restoring an empty snapshot shrinks the archetype list out
        // from under the search's cursor.
        let empty = test_world();
        let bytes = empty.snapshot().unwrap();
        world.restore(&bytes).unwrap();

        assert_eq!(search.count(&world), 0);
        assert_eq!(search.iter(&world).count(), 0);

        // The search keeps working as the restored store grows again.
        world.create_entity((Position::default(),)).unwrap();
        assert_eq!(search.count(&world), 1);
    }

    #[test]
    fn test_filter_unknown_component_name() {
        let world = test_world();
        let err = world.filter(&["missing"], Match::Exact, None).unwrap_err();
        assert!(matches!(err, QueryError::Registry(_)));
    }
}

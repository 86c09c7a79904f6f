// world.rs - World state, structural migration and the tick loop
//
// The world owns the archetype list, the set -> archetype index, the
// entity allocator, the three message buffers and the scheduler.
// Structural mutation (create, migrate, destroy) happens under the
// store's write lock; the scheduler's dependency graph is the primary
// mechanism keeping concurrent systems off the same component
// storage, the lock is the backstop.

use crate::ecs::bitset::IdSet;
use crate::ecs::bundle::ComponentBundle;
use crate::ecs::component::{Component, ComponentId, ComponentRegistry, RegistryError};
use crate::ecs::entity::{EntityAllocator, EntityId};
use crate::ecs::message::{
    CommandBuffer, EventBuffer, IncomingCommand, MessageError, SystemEventBuffer,
};
use crate::ecs::schedule::{
    Phase, ScheduleError, Scheduler, SystemError, SystemScope, TickError,
};
use crate::ecs::snapshot::{self, SnapshotError};
use crate::ecs::storage::{Archetype, ArchetypeId, ColumnError, StorageError};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Archetype list, set index and allocator. Lives behind the world's
/// store lock.
pub(crate) struct WorldStore {
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) index: HashMap<IdSet, ArchetypeId>,
    pub(crate) allocator: EntityAllocator,
    /// Bumped whenever the archetype list shrinks or is replaced, so
    /// search caches built against the old list reset themselves. Mere
    /// growth keeps the generation; grow-only is what query cursors
    /// rely on.
    pub(crate) generation: u64,
}

impl WorldStore {
    /// Archetype id of the distinguished empty-set archetype.
    pub(crate) const VOID: ArchetypeId = 0;

    pub(crate) fn new(registry: &ComponentRegistry) -> Self {
        let void = Archetype::new(Self::VOID, IdSet::new(), registry)
            .expect("void archetype has no columns");
        let mut index = HashMap::new();
        index.insert(IdSet::new(), Self::VOID);
        Self {
            archetypes: vec![void],
            index,
            allocator: EntityAllocator::new(),
            generation: 0,
        }
    }

    /// Find or create the archetype for an exact component set. The
    /// archetype list only grows, which is what makes query cursors a
    /// valid cache.
    pub(crate) fn archetype_for(
        &mut self,
        set: IdSet,
        registry: &ComponentRegistry,
    ) -> Result<ArchetypeId, StorageError> {
        if let Some(&id) = self.index.get(&set) {
            return Ok(id);
        }
        let id = self.archetypes.len() as ArchetypeId;
        let archetype = Archetype::new(id, set, registry)?;
        tracing::debug!(archetype = id, components = set.len(), "created archetype");
        self.archetypes.push(archetype);
        self.index.insert(set, id);
        Ok(id)
    }

    pub(crate) fn create_entity(
        &mut self,
        registry: &ComponentRegistry,
        values: Vec<(ComponentId, Box<dyn Any + Send>)>,
    ) -> Result<EntityId, StorageError> {
        let set = IdSet::from_ids(&values.iter().map(|(cid, _)| *cid).collect::<Vec<_>>());
        let arch_id = self.archetype_for(set, registry)?;
        let entity = self.allocator.allocate(arch_id);
        if let Err(err) = self.archetypes[arch_id as usize].new_entity(entity, values) {
            self.allocator.release(entity);
            return Err(err);
        }
        Ok(entity)
    }

    /// Silent no-op when the entity is already gone.
    pub(crate) fn destroy_entity(&mut self, entity: EntityId) {
        let Some(arch_id) = self.allocator.location(entity) else {
            return;
        };
        // The location index and the archetype agree by invariant.
        let _ = self.archetypes[arch_id as usize].remove_entity(entity);
        self.allocator.release(entity);
    }

    fn location_of(&self, entity: EntityId) -> Result<ArchetypeId, StorageError> {
        self.allocator
            .location(entity)
            .ok_or(StorageError::EntityNotFound { entity })
    }

    pub(crate) fn component_ids_of(
        &self,
        entity: EntityId,
    ) -> Result<Vec<ComponentId>, StorageError> {
        let arch_id = self.location_of(entity)?;
        Ok(self.archetypes[arch_id as usize].component_ids().to_vec())
    }

    pub(crate) fn get_component(
        &self,
        entity: EntityId,
        cid: ComponentId,
    ) -> Result<Box<dyn Any + Send>, StorageError> {
        let arch_id = self.location_of(entity)?;
        self.archetypes[arch_id as usize].get_component(entity, cid)
    }

    /// Attach a component the entity does not have yet, migrating it
    /// to the destination archetype.
    pub(crate) fn add_component(
        &mut self,
        registry: &ComponentRegistry,
        entity: EntityId,
        cid: ComponentId,
        value: Box<dyn Any + Send>,
    ) -> Result<(), StorageError> {
        let src_id = self.location_of(entity)?;
        if self.archetypes[src_id as usize].set().contains(cid) {
            return Err(StorageError::ComponentAlreadyPresent {
                entity,
                component: cid,
            });
        }
        self.migrate_add(registry, entity, src_id, cid, value)
    }

    /// Upsert: overwrite in place when attached, migrate otherwise.
    pub(crate) fn set_component(
        &mut self,
        registry: &ComponentRegistry,
        entity: EntityId,
        cid: ComponentId,
        value: Box<dyn Any + Send>,
    ) -> Result<(), StorageError> {
        let src_id = self.location_of(entity)?;
        if self.archetypes[src_id as usize].set().contains(cid) {
            return self.archetypes[src_id as usize].set_component(entity, cid, value);
        }
        self.migrate_add(registry, entity, src_id, cid, value)
    }

    fn migrate_add(
        &mut self,
        registry: &ComponentRegistry,
        entity: EntityId,
        src_id: ArchetypeId,
        cid: ComponentId,
        value: Box<dyn Any + Send>,
    ) -> Result<(), StorageError> {
        let mut new_set = *self.archetypes[src_id as usize].set();
        new_set.insert(cid);

        let mut values = self.archetypes[src_id as usize].collect_components(entity, None)?;
        values.push((cid, value));

        let dst_id = self.archetype_for(new_set, registry)?;
        self.archetypes[dst_id as usize].new_entity(entity, values)?;
        self.archetypes[src_id as usize].remove_entity(entity)?;
        self.allocator.relocate(entity, dst_id);
        Ok(())
    }

    /// Detach a component. Silent no-op when the entity is gone or
    /// the component is absent; removing the last component destroys
    /// the entity outright.
    pub(crate) fn remove_component(
        &mut self,
        registry: &ComponentRegistry,
        entity: EntityId,
        cid: ComponentId,
    ) -> Result<(), StorageError> {
        let Some(src_id) = self.allocator.location(entity) else {
            return Ok(());
        };
        if !self.archetypes[src_id as usize].set().contains(cid) {
            return Ok(());
        }

        if self.archetypes[src_id as usize].set().len() == 1 {
            // Last component: the entity is destroyed, not moved to
            // the void archetype.
            self.archetypes[src_id as usize].remove_entity(entity)?;
            self.allocator.release(entity);
            return Ok(());
        }

        let mut new_set = *self.archetypes[src_id as usize].set();
        new_set.remove(cid);

        let values = self.archetypes[src_id as usize].collect_components(entity, Some(cid))?;
        let dst_id = self.archetype_for(new_set, registry)?;
        self.archetypes[dst_id as usize].new_entity(entity, values)?;
        self.archetypes[src_id as usize].remove_entity(entity)?;
        self.allocator.relocate(entity, dst_id);
        Ok(())
    }
}

/// The engine's root object. Created once and threaded through every
/// call; there are no ambient singletons.
pub struct World {
    pub(crate) registry: RwLock<ComponentRegistry>,
    pub(crate) store: RwLock<WorldStore>,
    commands: CommandBuffer,
    events: EventBuffer,
    system_events: SystemEventBuffer,
    scheduler: RwLock<Scheduler>,
    init_done: AtomicBool,
    tick_count: AtomicU64,
    #[cfg(feature = "metrics")]
    profiler: Mutex<strata_metrics::SystemProfiler>,
    #[cfg(feature = "metrics")]
    tick_timer: Mutex<strata_metrics::TickTimer>,
}

impl World {
    pub fn new() -> Self {
        let registry = ComponentRegistry::new();
        let store = WorldStore::new(&registry);
        Self {
            registry: RwLock::new(registry),
            store: RwLock::new(store),
            commands: CommandBuffer::new(),
            events: EventBuffer::new(),
            system_events: SystemEventBuffer::new(),
            scheduler: RwLock::new(Scheduler::new()),
            init_done: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            #[cfg(feature = "metrics")]
            profiler: Mutex::new(strata_metrics::SystemProfiler::new()),
            #[cfg(feature = "metrics")]
            tick_timer: Mutex::new(strata_metrics::TickTimer::new(64)),
        }
    }

    // -- registration -------------------------------------------------------

    pub fn register_component<T: Component>(&self, name: &str) -> Result<ComponentId, RegistryError> {
        self.registry.write().register::<T>(name)
    }

    pub fn component_id<T: Component>(&self) -> Result<ComponentId, RegistryError> {
        self.registry.read().id_of_type::<T>()
    }

    pub fn component_id_of(&self, name: &str) -> Result<ComponentId, RegistryError> {
        self.registry.read().id_of(name)
    }

    /// Register a system in a tick phase. The configure closure
    /// declares the system's dependency set; errors there are
    /// synchronous registration errors.
    pub fn register_system<C, F>(
        &self,
        phase: Phase,
        name: &str,
        configure: C,
        func: F,
    ) -> Result<(), ScheduleError>
    where
        C: FnOnce(&mut SystemScope<'_>) -> Result<(), ScheduleError>,
        F: Fn(&World) -> Result<(), SystemError> + Send + Sync + 'static,
    {
        let mut scope = SystemScope::new(self, name);
        configure(&mut scope)?;
        let deps = scope.into_deps();
        self.scheduler
            .write()
            .register(phase, name, deps, Box::new(func))
    }

    // -- entities and components -------------------------------------------

    pub fn create_entity<B: ComponentBundle>(&self, bundle: B) -> Result<EntityId, StorageError> {
        let registry = self.registry.read();
        let values = bundle.into_values(&registry)?;
        self.store.write().create_entity(&registry, values)
    }

    /// Silent no-op when the entity is already destroyed.
    pub fn destroy_entity(&self, entity: EntityId) {
        self.store.write().destroy_entity(entity);
    }

    pub fn is_live(&self, entity: EntityId) -> bool {
        self.store.read().allocator.is_live(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.store.read().allocator.live_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.store.read().archetypes.len()
    }

    /// The ids of every component currently attached to an entity.
    pub fn component_ids(&self, entity: EntityId) -> Result<Vec<ComponentId>, StorageError> {
        self.store.read().component_ids_of(entity)
    }

    pub fn get_component<T: Component>(&self, entity: EntityId) -> Result<T, StorageError> {
        let cid = self.component_id::<T>()?;
        let boxed = self.store.read().get_component(entity, cid)?;
        let value = boxed
            .downcast::<T>()
            .map_err(|_| StorageError::Column(ColumnError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            }))?;
        Ok(*value)
    }

    /// Attach a component the entity does not have yet.
    pub fn add_component<T: Component>(
        &self,
        entity: EntityId,
        value: T,
    ) -> Result<(), StorageError> {
        let cid = self.component_id::<T>()?;
        let registry = self.registry.read();
        self.store
            .write()
            .add_component(&registry, entity, cid, Box::new(value))
    }

    /// Upsert a component value, migrating the entity if needed.
    pub fn set_component<T: Component>(
        &self,
        entity: EntityId,
        value: T,
    ) -> Result<(), StorageError> {
        let cid = self.component_id::<T>()?;
        let registry = self.registry.read();
        self.store
            .write()
            .set_component(&registry, entity, cid, Box::new(value))
    }

    /// Silent no-op when the component is absent or the entity gone;
    /// removing the last component destroys the entity.
    pub fn remove_component<T: Component>(&self, entity: EntityId) -> Result<(), StorageError> {
        let cid = self.component_id::<T>()?;
        let registry = self.registry.read();
        self.store.write().remove_component(&registry, entity, cid)
    }

    // -- message buffers ----------------------------------------------------

    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn system_events(&self) -> &SystemEventBuffer {
        &self.system_events
    }

    /// Ingestion boundary: stage a batch of encoded commands for the
    /// next tick, or reject the whole batch.
    pub fn inject_commands(&self, batch: &[IncomingCommand]) -> Result<(), MessageError> {
        self.commands.inject(batch)
    }

    // -- tick loop ----------------------------------------------------------

    /// Run one tick: Init once on the first tick, then PreUpdate,
    /// Update and PostUpdate strictly in sequence. Every registered
    /// system fires exactly once; the first system error is returned
    /// after the full set has run. Buffers are cleared only on a
    /// successful tick, and storage mutations are never rolled back.
    pub fn tick(&self) -> Result<(), TickError> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let first_error = Mutex::new(None);
        {
            let scheduler = self.scheduler.read();
            if !self.init_done.swap(true, Ordering::SeqCst) {
                tracing::debug!("running init systems");
                scheduler.run_phase(Phase::Init, self, &first_error);
            }
            for phase in [Phase::PreUpdate, Phase::Update, Phase::PostUpdate] {
                tracing::trace!(?phase, "running tick phase");
                scheduler.run_phase(phase, self, &first_error);
            }
        }

        #[cfg(feature = "metrics")]
        self.tick_timer.lock().record(started.elapsed());

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => {
                self.commands.clear_all();
                self.events.clear_all();
                self.system_events.clear_all();
                self.tick_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    pub fn system_count(&self, phase: Phase) -> usize {
        self.scheduler.read().system_count(phase)
    }

    // -- snapshots ----------------------------------------------------------

    /// Deterministic binary encoding of the whole store.
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        // Lock order is registry before store everywhere.
        let registry = self.registry.read();
        let store = self.store.read();
        snapshot::serialize_store(&store, &registry)
    }

    /// Replace the store wholesale from a snapshot. Fails without
    /// partial mutation; a restored world never re-runs Init.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let registry = self.registry.read();
        let mut staged = snapshot::decode_store(bytes, &registry)?;
        let mut store = self.store.write();
        // Searches created before the restore must not trust their
        // archetype cursors against the replaced list.
        staged.generation = store.generation.wrapping_add(1);
        *store = staged;
        self.init_done.store(true, Ordering::SeqCst);
        tracing::info!("restored world from snapshot");
        Ok(())
    }

    // -- inspection ---------------------------------------------------------

    /// Registered component names with their runtime type
    /// descriptors. Tooling only.
    pub fn component_types(&self) -> Vec<(String, ComponentId, &'static str)> {
        self.registry
            .read()
            .descriptors()
            .map(|(name, id, ty)| (name.to_string(), id, ty))
            .collect()
    }

    pub fn command_types(&self) -> Vec<(String, u32, &'static str)> {
        self.commands.descriptors()
    }

    pub fn event_types(&self) -> Vec<(String, u32, &'static str)> {
        self.events.descriptors()
    }

    pub fn system_event_types(&self) -> Vec<(String, u32, &'static str)> {
        self.system_events.descriptors()
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn profiler(&self) -> &Mutex<strata_metrics::SystemProfiler> {
        &self.profiler
    }

    /// Accumulated per-system wall time.
    #[cfg(feature = "metrics")]
    pub fn system_timings(&self) -> Vec<(String, std::time::Duration)> {
        self.profiler
            .lock()
            .iter()
            .map(|(name, d)| (name.clone(), *d))
            .collect()
    }

    /// Mean tick duration over the recent window.
    #[cfg(feature = "metrics")]
    pub fn average_tick(&self) -> std::time::Duration {
        self.tick_timer.lock().average()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// -- convenience ------------------------------------------------------------

impl World {
    /// Register a command payload type on the world's command buffer.
    pub fn register_command<T: crate::ecs::message::Message + DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<u32, RegistryError> {
        self.commands.register::<T>(name)
    }

    /// Register an event payload type on the world's event buffer.
    pub fn register_event<T: crate::ecs::message::Message>(
        &self,
        name: &str,
    ) -> Result<u32, RegistryError> {
        self.events.register::<T>(name)
    }

    /// Register a system-event payload type.
    pub fn register_system_event<T: crate::ecs::message::Message>(
        &self,
        name: &str,
    ) -> Result<u32, RegistryError> {
        self.system_events.register::<T>(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Match;
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

    #[test]
    fn test_create_entity_and_read_back() {
        let world = test_world();
        let entity = world
            .create_entity((Position { x: 3, y: 4 }, Health { current: 100 }))
            .unwrap();

        assert!(world.is_live(entity));
        assert_eq!(world.entity_count(), 1);
        assert_eq!(
            world.get_component::<Position>(entity).unwrap(),
            Position { x: 3, y: 4 }
        );
        assert_eq!(
            world.get_component::<Health>(entity).unwrap(),
            Health { current: 100 }
        );
        assert!(world.get_component::<Velocity>(entity).is_err());
    }

    #[test]
    fn test_archetype_identity_ignores_insertion_order() {
        let world = test_world();

        let a = world.create_entity((Position::default(),)).unwrap();
        world.add_component(a, Velocity { dx: 1, dy: 0 }).unwrap();

        let b = world.create_entity((Velocity { dx: 2, dy: 0 },)).unwrap();
        world.add_component(b, Position::default()).unwrap();

        let mut ids_a = world.component_ids(a).unwrap();
        let mut ids_b = world.component_ids(b).unwrap();
        ids_a.sort_unstable();
        ids_b.sort_unstable();
        assert_eq!(ids_a, ids_b);

        // void, {position}, {velocity}, {position, velocity}
        assert_eq!(world.archetype_count(), 4);
    }

    #[test]
    fn test_add_component_rejects_duplicates() {
        let world = test_world();
        let entity = world.create_entity((Position::default(),)).unwrap();

        let err = world
            .add_component(entity, Position { x: 9, y: 9 })
            .unwrap_err();
        assert!(matches!(err, StorageError::ComponentAlreadyPresent { .. }));
        // The stored value is untouched.
        assert_eq!(
            world.get_component::<Position>(entity).unwrap(),
            Position::default()
        );
    }

    #[test]
    fn test_set_component_upserts() {
        let world = test_world();
        let entity = world.create_entity((Position::default(),)).unwrap();

        // Attach-by-set migrates the entity.
        world.set_component(entity, Health { current: 50 }).unwrap();
        assert_eq!(
            world.get_component::<Health>(entity).unwrap(),
            Health { current: 50 }
        );

        // Overwrite-by-set leaves the archetype alone.
        let before = world.archetype_count();
        world.set_component(entity, Health { current: 25 }).unwrap();
        assert_eq!(world.archetype_count(), before);
        assert_eq!(
            world.get_component::<Health>(entity).unwrap(),
            Health { current: 25 }
        );
    }

    #[test]
    fn test_remove_component_preserves_the_rest() {
        let world = test_world();
        let entity = world
            .create_entity((Position { x: 7, y: 8 }, Health { current: 100 }))
            .unwrap();

        world.remove_component::<Health>(entity).unwrap();
        assert!(world.get_component::<Health>(entity).is_err());
        assert_eq!(
            world.get_component::<Position>(entity).unwrap(),
            Position { x: 7, y: 8 }
        );

        // Re-adding after removal starts from the supplied value, not
        // the old one.
        world.add_component(entity, Health::default()).unwrap();
        assert_eq!(
            world.get_component::<Health>(entity).unwrap(),
            Health { current: 0 }
        );
    }

    #[test]
    fn test_removing_last_component_destroys_entity() {
        let world = test_world();
        let entity = world.create_entity((Position::default(),)).unwrap();

        world.remove_component::<Position>(entity).unwrap();
        assert!(!world.is_live(entity));
        assert_eq!(world.entity_count(), 0);

        // Removing from a dead entity stays a no-op.
        world.remove_component::<Position>(entity).unwrap();
    }

    #[test]
    fn test_destroy_is_idempotent_and_ids_recycle_fifo() {
        let world = test_world();
        let a = world.create_entity((Position::default(),)).unwrap();
        let b = world.create_entity((Position::default(),)).unwrap();

        world.destroy_entity(a);
        world.destroy_entity(a);
        world.destroy_entity(b);
        assert_eq!(world.entity_count(), 0);

        // Freed ids come back oldest-first.
        let c = world.create_entity((Health::default(),)).unwrap();
        let d = world.create_entity((Health::default(),)).unwrap();
        assert_eq!(c, a);
        assert_eq!(d, b);
    }

    #[test]
    fn test_swap_remove_keeps_survivors_intact() {
        let world = test_world();
        let entities: Vec<EntityId> = (0..8)
            .map(|i| {
                world
                    .create_entity((Position { x: i, y: -i },))
                    .unwrap()
            })
            .collect();

        // Remove from the middle so the tail row gets relocated.
        world.destroy_entity(entities[2]);
        world.destroy_entity(entities[5]);

        for (i, &entity) in entities.iter().enumerate() {
            if i == 2 || i == 5 {
                assert!(!world.is_live(entity));
                continue;
            }
            assert_eq!(
                world.get_component::<Position>(entity).unwrap(),
                Position {
                    x: i as i64,
                    y: -(i as i64)
                }
            );
        }
    }

    #[test]
    fn test_tick_clears_buffers_on_success() {
        #[derive(Debug, Clone)]
        struct Ping(u32);

        let world = test_world();
        world.register_event::<Ping>("ping").unwrap();
        world.events().emit(Ping(1)).unwrap();
        assert_eq!(world.events().read::<Ping>().unwrap().len(), 1);

        world.tick().unwrap();
        assert_eq!(world.tick_count(), 1);
        assert!(world.events().read::<Ping>().unwrap().is_empty());
    }

    #[test]
    fn test_failed_tick_leaves_buffers_and_count() {
        #[derive(Debug, Clone)]
        struct Ping(u32);

        let world = test_world();
        world.register_event::<Ping>("ping").unwrap();
        world
            .register_system(
                Phase::Update,
                "boom",
                |_scope| Ok(()),
                |_world| Err("deliberate failure".into()),
            )
            .unwrap();

        world.events().emit(Ping(7)).unwrap();
        let err = world.tick().unwrap_err();
        let TickError::SystemFailed { system, .. } = err;
        assert_eq!(system, "boom");
        assert_eq!(world.tick_count(), 0);
        assert_eq!(world.events().read::<Ping>().unwrap().len(), 1);
    }

    #[test]
    fn test_init_runs_once() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let world = test_world();
        let init_runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&init_runs);
        world
            .register_system(
                Phase::Init,
                "seed",
                |_scope| Ok(()),
                move |_world| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        for _ in 0..3 {
            world.tick().unwrap();
        }
        assert_eq!(init_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_skips_init() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let source = test_world();
        source
            .create_entity((Position { x: 1, y: 2 }, Health { current: 10 }))
            .unwrap();
        let bytes = source.snapshot().unwrap();

        let target = test_world();
        let init_runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&init_runs);
        target
            .register_system(
                Phase::Init,
                "seed",
                |_scope| Ok(()),
                move |_world| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        target.restore(&bytes).unwrap();
        target.tick().unwrap();
        assert_eq!(init_runs.load(Ordering::SeqCst), 0);
        assert_eq!(target.entity_count(), 1);
    }

    #[test]
    fn test_snapshot_runs_concurrently_with_mutation() {
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        struct Tag {
            n: u8,
        }

        let world = test_world();
        let entities: Vec<EntityId> = (0..8)
            .map(|_| world.create_entity((Position::default(),)).unwrap())
            .collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..100 {
                    world.snapshot().unwrap();
                }
            });
            scope.spawn(|| {
                for i in 0..100 {
                    for &entity in &entities {
                        world
                            .set_component(entity, Health { current: i as i64 })
                            .unwrap();
                        world.remove_component::<Health>(entity).unwrap();
                    }
                }
            });
            scope.spawn(|| {
                for i in 0..100 {
                    world
                        .register_component::<Tag>(&format!("tag_{i}"))
                        .unwrap();
                }
            });
        });

        assert_eq!(world.entity_count(), 8);
    }

    #[test]
    fn test_systems_mutate_through_queries() {
        let world = test_world();
        world
            .register_system(
                Phase::Update,
                "movement",
                |scope| {
                    scope.reads::<Velocity>()?;
                    scope.writes::<Position>()
                },
                |world| {
                    let search = world.search::<(Position, Velocity)>(Match::Contains)?;
                    for entity in search.iter(world) {
                        let pos = entity.get::<Position>()?;
                        let vel = entity.get::<Velocity>()?;
                        entity.set(Position {
                            x: pos.x + vel.dx,
                            y: pos.y + vel.dy,
                        })?;
                    }
                    Ok(())
                },
            )
            .unwrap();

        let mover = world
            .create_entity((Position::default(), Velocity { dx: 2, dy: 1 }))
            .unwrap();
        let still = world.create_entity((Position { x: 5, y: 5 },)).unwrap();

        for _ in 0..10 {
            world.tick().unwrap();
        }
        assert_eq!(
            world.get_component::<Position>(mover).unwrap(),
            Position { x: 20, y: 10 }
        );
        assert_eq!(
            world.get_component::<Position>(still).unwrap(),
            Position { x: 5, y: 5 }
        );
    }
}

// schedule.rs - Dependency-inferring concurrent system scheduler
//
// Systems declare what they touch (components and mailboxes) through
// an explicit builder at registration. For every ordered pair (A, B)
// with A registered first and overlapping dependency sets, the
// scheduler adds edge A -> B; registration order is the producer
// tie-break. Each run, tier-zero systems start immediately and every
// other system starts the instant its live indegree counter reaches
// zero. Counters are double-buffered so a run never allocates.

use crate::ecs::bitset::IdSet;
use crate::ecs::component::{Component, RegistryError};
use crate::ecs::message::Message;
use crate::ecs::world::World;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use thiserror::Error;

/// Tick phases, executed strictly in sequence. Init runs exactly once
/// before the first tick and never again, including after snapshot
/// restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    PreUpdate,
    Update,
    PostUpdate,
}

impl Phase {
    fn index(self) -> usize {
        match self {
            Phase::Init => 0,
            Phase::PreUpdate => 1,
            Phase::Update => 2,
            Phase::PostUpdate => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("system '{name}' is already registered")]
    DuplicateSystemName { name: String },

    #[error("system '{system}' declares a second {kind} receiver for type '{type_name}'")]
    DuplicateReceiver {
        system: String,
        kind: &'static str,
        type_name: &'static str,
    },

    #[error("system '{system}' declares a second {kind} emitter for type '{type_name}'")]
    DuplicateEmitter {
        system: String,
        kind: &'static str,
        type_name: &'static str,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error type systems may return; the scheduler wraps it with the
/// failing system's name.
pub type SystemError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("system '{system}' failed: {source}")]
    SystemFailed {
        system: String,
        #[source]
        source: SystemError,
    },
}

pub type SystemFn = Box<dyn Fn(&World) -> Result<(), SystemError> + Send + Sync>;

/// The ids a system touches, split by id space. Two systems depend on
/// each other when any of the four spaces overlap.
#[derive(Clone, Debug, Default)]
pub struct DependencySet {
    pub components: IdSet,
    pub commands: IdSet,
    pub events: IdSet,
    pub system_events: IdSet,
}

impl DependencySet {
    pub fn intersects(&self, other: &DependencySet) -> bool {
        self.components.intersects(&other.components)
            || self.commands.intersects(&other.commands)
            || self.events.intersects(&other.events)
            || self.system_events.intersects(&other.system_events)
    }
}

/// Declarative dependency builder handed to the configure closure at
/// registration. Every declaration resolves to ids immediately, so
/// bad declarations fail synchronously.
pub struct SystemScope<'w> {
    world: &'w World,
    name: String,
    deps: DependencySet,
    receivers: HashSet<(&'static str, TypeId)>,
    emitters: HashSet<(&'static str, TypeId)>,
}

impl<'w> SystemScope<'w> {
    pub(crate) fn new(world: &'w World, name: &str) -> Self {
        Self {
            world,
            name: name.to_string(),
            deps: DependencySet::default(),
            receivers: HashSet::new(),
            emitters: HashSet::new(),
        }
    }

    /// Declare a component this system reads.
    pub fn reads<T: Component>(&mut self) -> Result<(), ScheduleError> {
        let id = self.world.component_id::<T>()?;
        self.deps.components.insert(id);
        Ok(())
    }

    /// Declare a component this system writes.
    pub fn writes<T: Component>(&mut self) -> Result<(), ScheduleError> {
        let id = self.world.component_id::<T>()?;
        self.deps.components.insert(id);
        Ok(())
    }

    /// Declare the command mailbox this system consumes. At most one
    /// receiver per distinct command type.
    pub fn receives_command<T: Message + DeserializeOwned>(&mut self) -> Result<(), ScheduleError> {
        self.claim_receiver::<T>("command")?;
        let id = self.world.commands().id_of_type::<T>()?;
        self.deps.commands.insert(id);
        Ok(())
    }

    /// Declare the event mailbox this system emits into.
    pub fn emits_event<T: Message>(&mut self) -> Result<(), ScheduleError> {
        self.claim_emitter::<T>("event")?;
        let id = self.world.events().id_of_type::<T>()?;
        self.deps.events.insert(id);
        Ok(())
    }

    /// Declare an event mailbox this system reads. Distinct systems
    /// may read the same event type, but one scope declares it at
    /// most once.
    pub fn reads_event<T: Message>(&mut self) -> Result<(), ScheduleError> {
        self.claim_receiver::<T>("event")?;
        let id = self.world.events().id_of_type::<T>()?;
        self.deps.events.insert(id);
        Ok(())
    }

    /// Declare a system-event mailbox this system consumes.
    pub fn receives_system_event<T: Message>(&mut self) -> Result<(), ScheduleError> {
        self.claim_receiver::<T>("system event")?;
        let id = self.world.system_events().id_of_type::<T>()?;
        self.deps.system_events.insert(id);
        Ok(())
    }

    /// Declare a system-event mailbox this system emits into.
    pub fn emits_system_event<T: Message>(&mut self) -> Result<(), ScheduleError> {
        self.claim_emitter::<T>("system event")?;
        let id = self.world.system_events().id_of_type::<T>()?;
        self.deps.system_events.insert(id);
        Ok(())
    }

    fn claim_receiver<T: 'static>(&mut self, kind: &'static str) -> Result<(), ScheduleError> {
        if !self.receivers.insert((kind, TypeId::of::<T>())) {
            return Err(ScheduleError::DuplicateReceiver {
                system: self.name.clone(),
                kind,
                type_name: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    fn claim_emitter<T: 'static>(&mut self, kind: &'static str) -> Result<(), ScheduleError> {
        if !self.emitters.insert((kind, TypeId::of::<T>())) {
            return Err(ScheduleError::DuplicateEmitter {
                system: self.name.clone(),
                kind,
                type_name: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    pub(crate) fn into_deps(self) -> DependencySet {
        self.deps
    }
}

// System lifecycle, per tick-phase run. No reverse transitions within
// a run; the counters (not the states) are what gate execution.
const STATE_REGISTERED: u8 = 0;
const STATE_SCHEDULED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_COMPLETED: u8 = 3;

struct SystemEntry {
    name: String,
    deps: DependencySet,
    state: AtomicU8,
    func: SystemFn,
}

#[derive(Default)]
struct Bucket {
    entries: Vec<SystemEntry>,
    /// Adjacency: edges[i] lists systems unblocked by i's completion.
    edges: Vec<Vec<usize>>,
    base_indegree: Vec<u32>,
    /// Double-buffered live counters, swapped by parity each run so a
    /// tick gets fresh mutable counters without reallocation.
    counters: [Vec<AtomicU32>; 2],
    parity: AtomicUsize,
}

impl Bucket {
    fn register(&mut self, name: String, deps: DependencySet, func: SystemFn) {
        let idx = self.entries.len();
        self.edges.push(Vec::new());
        self.base_indegree.push(0);
        for i in 0..idx {
            if self.entries[i].deps.intersects(&deps) {
                self.edges[i].push(idx);
                self.base_indegree[idx] += 1;
            }
        }
        self.entries.push(SystemEntry {
            name,
            deps,
            state: AtomicU8::new(STATE_REGISTERED),
            func,
        });
        // Pre-size both counter buffers to the new system count.
        let n = self.entries.len();
        self.counters = [
            (0..n).map(|_| AtomicU32::new(0)).collect(),
            (0..n).map(|_| AtomicU32::new(0)).collect(),
        ];
    }

    fn run(&self, world: &World, first_error: &Mutex<Option<TickError>>) {
        if self.entries.is_empty() {
            return;
        }

        let parity = self.parity.fetch_xor(1, Ordering::AcqRel) & 1;
        let counters = &self.counters[parity];
        for (i, &indegree) in self.base_indegree.iter().enumerate() {
            counters[i].store(indegree, Ordering::Relaxed);
            let _prev = self.entries[i].state.swap(STATE_SCHEDULED, Ordering::Relaxed);
            debug_assert!(
                _prev == STATE_REGISTERED || _prev == STATE_COMPLETED,
                "system '{}' rescheduled mid-run",
                self.entries[i].name
            );
        }

        rayon::in_place_scope(|scope| {
            for (i, &indegree) in self.base_indegree.iter().enumerate() {
                if indegree == 0 {
                    self.spawn_system(scope, world, counters, first_error, i);
                }
            }
        });
    }

    fn spawn_system<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        world: &'s World,
        counters: &'s [AtomicU32],
        first_error: &'s Mutex<Option<TickError>>,
        idx: usize,
    ) {
        scope.spawn(move |scope| {
            let entry = &self.entries[idx];
            let _prev = entry.state.swap(STATE_RUNNING, Ordering::AcqRel);
            debug_assert_eq!(
                _prev, STATE_SCHEDULED,
                "system '{}' started twice in one run",
                entry.name
            );

            #[cfg(feature = "metrics")]
            let started = std::time::Instant::now();

            let result = (entry.func)(world);

            #[cfg(feature = "metrics")]
            world.profiler().lock().record(&entry.name, started.elapsed());

            let _prev = entry.state.swap(STATE_COMPLETED, Ordering::AcqRel);
            debug_assert_eq!(_prev, STATE_RUNNING);

            if let Err(source) = result {
                tracing::warn!(system = %entry.name, error = %source, "system failed");
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(TickError::SystemFailed {
                        system: entry.name.clone(),
                        source,
                    });
                }
            }

            // A failing system still unblocks its dependents: every
            // system fires exactly once per tick.
            for &dep in &self.edges[idx] {
                if counters[dep].fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.spawn_system(scope, world, counters, first_error, dep);
                }
            }
        });
    }
}

/// Per-phase buckets of registered systems.
pub(crate) struct Scheduler {
    buckets: [Bucket; 4],
    names: HashSet<String>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            names: HashSet::new(),
        }
    }

    pub fn register(
        &mut self,
        phase: Phase,
        name: &str,
        deps: DependencySet,
        func: SystemFn,
    ) -> Result<(), ScheduleError> {
        if !self.names.insert(name.to_string()) {
            return Err(ScheduleError::DuplicateSystemName {
                name: name.to_string(),
            });
        }
        tracing::debug!(system = name, ?phase, "registered system");
        self.buckets[phase.index()].register(name.to_string(), deps, func);
        Ok(())
    }

    /// Run one phase to completion, recording the first error without
    /// halting any sibling.
    pub fn run_phase(
        &self,
        phase: Phase,
        world: &World,
        first_error: &Mutex<Option<TickError>>,
    ) {
        self.buckets[phase.index()].run(world, first_error);
    }

    pub fn system_count(&self, phase: Phase) -> usize {
        self.buckets[phase.index()].entries.len()
    }
}

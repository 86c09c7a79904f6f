//! Entity Component System core types.
//!
//! The world stores typed components on numeric entity ids, groups
//! entities into archetypes by exact component signature, and runs
//! registered systems once per tick under a dependency-inferring
//! concurrent scheduler. Snapshots give a deterministic binary
//! encoding of the whole store.

mod bitset;
mod bundle;
mod component;
mod entity;
mod message;
mod query;
mod schedule;
mod snapshot;
pub mod storage;
mod world;

pub use bitset::{IdSet, MAX_IDS};
pub use bundle::ComponentBundle;
pub use component::{Component, ComponentId, ComponentRegistry, RegistryError};
pub use entity::{EntityAllocator, EntityId};
pub use message::{
    CommandBuffer, EventBuffer, IncomingCommand, Message, MessageError, MessageId,
    SystemEventBuffer,
};
pub use query::{EntityRef, FilterPredicate, Match, QueryError, Search, SearchIter};
pub use schedule::{
    DependencySet, Phase, ScheduleError, SystemError, SystemFn, SystemScope, TickError,
};
pub use snapshot::SnapshotError;
pub use storage::{Archetype, ArchetypeId, Column, ColumnError, ColumnStorage, StorageError};
pub use world::World;

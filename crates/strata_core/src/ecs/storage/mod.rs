//! Archetype and column storage.

mod archetype;
mod column;

pub use archetype::{Archetype, ArchetypeId, StorageError};
pub use column::{Column, ColumnError, ColumnStorage};

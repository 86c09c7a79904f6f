// component.rs - Runtime component registration
//
// Components are identified by compact u32 ids assigned at first
// registration of a stable name. The registry owns one column factory
// per component so archetypes can build storage without knowing the
// concrete Rust type.

use crate::ecs::bitset::MAX_IDS;
use crate::ecs::storage::{Column, ColumnStorage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use thiserror::Error;

pub type ComponentId = u32;

/// Marker trait for component value types.
///
/// The serde bounds are the per-component row codec: columns encode
/// and decode individual rows as opaque bytes, and the filter query
/// builds its per-entity field dictionary from the same encoding.
pub trait Component:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Component for T where
    T: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Errors raised synchronously at registration time.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("name '{name}' is not a valid identifier")]
    InvalidName { name: String },

    #[error("id space exhausted ({cap} ids)")]
    Exhausted { cap: usize },

    #[error("name '{name}' is already registered with a different type")]
    TypeMismatch { name: String },

    #[error("name '{name}' is not registered")]
    UnknownName { name: String },

    #[error("type '{type_name}' is not registered")]
    UnknownType { type_name: &'static str },
}

/// Validate that a name can appear in filter expressions: a leading
/// letter or underscore followed by letters, digits or underscores.
pub(crate) fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('\0');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(RegistryError::InvalidName {
            name: name.to_string(),
        });
    }
    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
        return Err(RegistryError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

type ColumnFactory = Box<dyn Fn() -> Box<dyn ColumnStorage> + Send + Sync>;

struct ComponentInfo {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    factory: ColumnFactory,
}

/// Name -> id registry plus per-component column factories.
///
/// Ids are strictly monotonic from 0 with no gaps; re-registering a
/// name is a no-op that returns the existing id.
#[derive(Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, ComponentId>,
    by_type: HashMap<TypeId, ComponentId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type under a stable name.
    pub fn register<T: Component>(&mut self, name: &str) -> Result<ComponentId, RegistryError> {
        validate_name(name)?;

        if let Some(&id) = self.by_name.get(name) {
            // Idempotent on repeat names, but the type must agree.
            if self.infos[id as usize].type_id != TypeId::of::<T>() {
                return Err(RegistryError::TypeMismatch {
                    name: name.to_string(),
                });
            }
            return Ok(id);
        }

        if self.infos.len() >= MAX_IDS {
            return Err(RegistryError::Exhausted { cap: MAX_IDS });
        }

        let id = self.infos.len() as ComponentId;
        self.infos.push(ComponentInfo {
            name: name.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            factory: Box::new(|| Box::new(Column::<T>::new())),
        });
        self.by_name.insert(name.to_string(), id);
        self.by_type.insert(TypeId::of::<T>(), id);
        tracing::debug!(component = name, id, "registered component");
        Ok(id)
    }

    /// Look up the id for a registered name.
    pub fn id_of(&self, name: &str) -> Result<ComponentId, RegistryError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownName {
                name: name.to_string(),
            })
    }

    /// Look up the id for a registered Rust type.
    pub fn id_of_type<T: Component>(&self) -> Result<ComponentId, RegistryError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(RegistryError::UnknownType {
                type_name: std::any::type_name::<T>(),
            })
    }

    pub fn name_of(&self, id: ComponentId) -> Option<&str> {
        self.infos.get(id as usize).map(|info| info.name.as_str())
    }

    /// Build a fresh column for a registered component.
    pub fn new_column(&self, id: ComponentId) -> Option<Box<dyn ColumnStorage>> {
        self.infos.get(id as usize).map(|info| (info.factory)())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Read-only inspection surface: (name, id, Rust type name).
    /// Tooling only, not on the hot path.
    pub fn descriptors(&self) -> impl Iterator<Item = (&str, ComponentId, &'static str)> + '_ {
        self.infos
            .iter()
            .enumerate()
            .map(|(id, info)| (info.name.as_str(), id as ComponentId, info.type_name))
    }
}

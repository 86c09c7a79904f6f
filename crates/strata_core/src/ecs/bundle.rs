// bundle.rs - Tuples of component values
//
// A bundle is the declared component shape of an entity or a search:
// a tuple of registered component types. Ids are resolved through the
// registry once, at the call site that consumes the bundle.

use crate::ecs::component::{Component, ComponentId, ComponentRegistry, RegistryError};
use std::any::Any;

/// A statically-typed set of components.
pub trait ComponentBundle {
    /// Resolve the bundle's component ids against a registry.
    fn component_ids(registry: &ComponentRegistry) -> Result<Vec<ComponentId>, RegistryError>;

    /// Turn the bundle into (id, boxed value) pairs for storage.
    fn into_values(
        self,
        registry: &ComponentRegistry,
    ) -> Result<Vec<(ComponentId, Box<dyn Any + Send>)>, RegistryError>;
}

/// The empty bundle: an entity with zero components lives in the void
/// archetype.
impl ComponentBundle for () {
    fn component_ids(_registry: &ComponentRegistry) -> Result<Vec<ComponentId>, RegistryError> {
        Ok(Vec::new())
    }

    fn into_values(
        self,
        _registry: &ComponentRegistry,
    ) -> Result<Vec<(ComponentId, Box<dyn Any + Send>)>, RegistryError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_bundle {
    ($($ty:ident),+) => {
        impl<$($ty: Component),+> ComponentBundle for ($($ty,)+) {
            fn component_ids(
                registry: &ComponentRegistry,
            ) -> Result<Vec<ComponentId>, RegistryError> {
                Ok(vec![$(registry.id_of_type::<$ty>()?),+])
            }

            #[allow(non_snake_case)]
            fn into_values(
                self,
                registry: &ComponentRegistry,
            ) -> Result<Vec<(ComponentId, Box<dyn Any + Send>)>, RegistryError> {
                let ($($ty,)+) = self;
                Ok(vec![$(
                    (registry.id_of_type::<$ty>()?, Box::new($ty) as Box<dyn Any + Send>)
                ),+])
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

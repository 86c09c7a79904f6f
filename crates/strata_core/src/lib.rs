//! Strata Engine Core
//!
//! Contains the fundamental simulation systems:
//! - Entity Component System (archetype storage, migration, queries)
//! - Dependency-inferring concurrent system scheduler
//! - Command / event / system-event staging buffers
//! - Deterministic world snapshots

pub mod ecs;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

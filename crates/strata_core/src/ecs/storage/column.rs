// column.rs - Dense per-component storage
//
// One column holds every value of a single component type inside one
// archetype, row-aligned with the archetype's entity list. Columns are
// kept behind a narrow object-safe trait so archetypes can store a
// heterogeneous ordered sequence of them without a central type
// switch.

use crate::ecs::component::Component;
use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("row {row} out of bounds (len {len})")]
    RowOutOfBounds { row: usize, len: usize },

    #[error("value type does not match column type '{expected}'")]
    TypeMismatch { expected: &'static str },

    #[error("row codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Capability surface every concrete column exposes.
///
/// Removal is swap-with-last then truncate; the caller is responsible
/// for fixing the row mapping of whichever entity occupied the last
/// slot.
pub trait ColumnStorage: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one zero-valued slot.
    fn push_default(&mut self);

    /// Append a typed value passed as `Box<dyn Any>`.
    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> Result<(), ColumnError>;

    /// Clone the value at `row` out of the column.
    fn get_boxed(&self, row: usize) -> Result<Box<dyn Any + Send>, ColumnError>;

    /// Overwrite the value at `row`.
    fn set_boxed(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), ColumnError>;

    /// Swap-with-last removal, O(1).
    fn swap_remove(&mut self, row: usize) -> Result<(), ColumnError>;

    /// Encode the value at `row` as opaque codec bytes.
    fn encode_row(&self, row: usize) -> Result<Vec<u8>, ColumnError>;

    /// Decode codec bytes and append the value.
    fn decode_push(&mut self, bytes: &[u8]) -> Result<(), ColumnError>;

    /// Encode the value at `row` as a JSON value for filter
    /// dictionaries.
    fn encode_field(&self, row: usize) -> Result<serde_json::Value, ColumnError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The single generic column implementation.
pub struct Column<T: Component> {
    rows: Vec<T>,
}

impl<T: Component> Column<T> {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn get(&self, row: usize) -> Option<&T> {
        self.rows.get(row)
    }

    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.rows.get_mut(row)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.rows
    }

    fn check_row(&self, row: usize) -> Result<(), ColumnError> {
        if row >= self.rows.len() {
            return Err(ColumnError::RowOutOfBounds {
                row,
                len: self.rows.len(),
            });
        }
        Ok(())
    }
}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ColumnStorage for Column<T> {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn push_default(&mut self) {
        self.rows.push(T::default());
    }

    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> Result<(), ColumnError> {
        let value = value.downcast::<T>().map_err(|_| ColumnError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })?;
        self.rows.push(*value);
        Ok(())
    }

    fn get_boxed(&self, row: usize) -> Result<Box<dyn Any + Send>, ColumnError> {
        self.check_row(row)?;
        Ok(Box::new(self.rows[row].clone()))
    }

    fn set_boxed(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), ColumnError> {
        self.check_row(row)?;
        let value = value.downcast::<T>().map_err(|_| ColumnError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })?;
        self.rows[row] = *value;
        Ok(())
    }

    fn swap_remove(&mut self, row: usize) -> Result<(), ColumnError> {
        self.check_row(row)?;
        self.rows.swap_remove(row);
        Ok(())
    }

    fn encode_row(&self, row: usize) -> Result<Vec<u8>, ColumnError> {
        self.check_row(row)?;
        Ok(serde_json::to_vec(&self.rows[row])?)
    }

    fn decode_push(&mut self, bytes: &[u8]) -> Result<(), ColumnError> {
        let value: T = serde_json::from_slice(bytes)?;
        self.rows.push(value);
        Ok(())
    }

    fn encode_field(&self, row: usize) -> Result<serde_json::Value, ColumnError> {
        self.check_row(row)?;
        Ok(serde_json::to_value(&self.rows[row])?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

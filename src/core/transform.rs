//! Transform trait applied by workers

use crate::core::error::TransformError;
use crate::core::item::Item;

/// Turns an item's payload into a result value
///
/// Implemented for any `Fn(&Item<T>) -> Result<U, TransformError>`, so plain
/// functions and closures can be handed to a pipeline directly.
///
/// ```rust
/// use bounded_pipeline::{Item, ItemId, Transform, TransformError};
///
/// fn double(item: &Item<u32>) -> Result<u32, TransformError> {
///     Ok(item.payload() * 2)
/// }
///
/// let item = Item::new(ItemId::new(0, 0), 21);
/// assert_eq!(double.transform(&item), Ok(42));
/// ```
pub trait Transform<T, U>: Send + Sync {
    /// Transform one item
    ///
    /// # Errors
    ///
    /// [`TransformError::Recoverable`] drops the item and keeps the worker
    /// running; [`TransformError::Fatal`] stops the worker.
    fn transform(&self, item: &Item<T>) -> Result<U, TransformError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "Transform"
    }
}

impl<F, T, U> Transform<T, U> for F
where
    F: Fn(&Item<T>) -> Result<U, TransformError> + Send + Sync,
{
    fn transform(&self, item: &Item<T>) -> Result<U, TransformError> {
        self(item)
    }
}

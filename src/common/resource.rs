//! Resource lifecycle contract and typed prerequisite handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use super::error::ResourceError;

/// Future returned by resource and façade operations.
pub type ResourceFuture<'a, T = ()> =
    Pin<Box<dyn Future<Output = Result<T, ResourceError>> + Send + 'a>>;

/// A single cloud object with create, read, and delete semantics.
///
/// `create` falls back to `read` when the provider reports the object as
/// already existing, `read` reports absence through
/// [`ResourceError::NotFound`], and `delete` succeeds when the object is
/// already gone.
pub trait Resource: Send + Sync {
    /// Creates the object, converging on an existing one.
    fn create(&self) -> ResourceFuture<'_>;

    /// Refreshes the observed state from the provider.
    fn read(&self) -> ResourceFuture<'_>;

    /// Deletes the object, tolerating prior deletion.
    fn delete(&self) -> ResourceFuture<'_>;

    /// Mutates the object in place.
    ///
    /// Only scaling primitives override this.
    fn update(&self) -> ResourceFuture<'_> {
        Box::pin(async { Err(ResourceError::NotImplemented) })
    }
}

/// Shared, late-bound state of a resource.
///
/// Each resource owns one slot for its observed state and hands clones of it
/// to the resources that depend on it. The slot is empty until a successful
/// create or read and is cleared on delete.
#[derive(Debug)]
pub struct Slot<T> {
    name: &'static str,
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Creates an empty slot labelled with the owning resource name.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns a copy of the current value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the current value or [`ResourceError::Unresolved`].
    ///
    /// # Errors
    ///
    /// Fails when the owning resource has not been created or read.
    pub fn require(&self) -> Result<T, ResourceError> {
        self.get().ok_or(ResourceError::Unresolved(self.name))
    }

    /// Stores a freshly observed value.
    pub fn set(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Resets the slot after a delete.
    pub fn clear(&self) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns `true` when a value has been observed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Runs `create`, falling back to `read` when the object already exists.
///
/// # Errors
///
/// Propagates every create error other than
/// [`ResourceError::AlreadyExists`] and every read error.
pub async fn create_or_read<F>(create: F, resource: &dyn Resource) -> Result<(), ResourceError>
where
    F: Future<Output = Result<(), ResourceError>>,
{
    match create.await {
        Err(ResourceError::AlreadyExists(message)) => {
            tracing::debug!(%message, "resource already exists, reading instead");
            resource.read().await
        }
        other => other,
    }
}

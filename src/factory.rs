//! Factory capability the pool uses to manage its objects

use async_trait::async_trait;

/// Creates, destroys and validates the objects held by an
/// [`AsyncPool`](crate::AsyncPool).
///
/// All three operations are asynchronous and may complete on any tokio
/// worker. The pool keeps objects behind an `Arc`, so `destroy` and
/// `validate` only borrow them.
///
/// # Examples
///
/// ```
/// use async_objectpool::ObjectFactory;
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// #[async_trait]
/// impl ObjectFactory for Counter {
///     type Object = usize;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<usize, std::io::Error> {
///         Ok(self.0.fetch_add(1, Ordering::Relaxed))
///     }
///
///     async fn destroy(&self, _object: &usize) -> Result<(), std::io::Error> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ObjectFactory: Send + Sync + 'static {
    /// Type of the pooled objects.
    type Object: Send + Sync + 'static;

    /// Error returned by any of the factory operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new object.
    async fn create(&self) -> Result<Self::Object, Self::Error>;

    /// Dispose of an object. Called at most once per object, including
    /// objects that just failed validation.
    async fn destroy(&self, object: &Self::Object) -> Result<(), Self::Error>;

    /// Check whether an object is still usable. `true` means healthy.
    async fn validate(&self, _object: &Self::Object) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

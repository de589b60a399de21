//! Error types for the object pool

use thiserror::Error;

/// Boxed error produced by an [`ObjectFactory`](crate::ObjectFactory).
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Cannot allocate object")]
    CreationFailed(#[source] CreationError),

    #[error("Pool exhausted - no idle object and no spare capacity")]
    PoolExhausted,

    #[error("Returned object not currently part of this pool")]
    NotManaged,

    #[error("Pool is closed")]
    Closed,

    #[error("Object could not be destroyed")]
    DestroyFailed(#[source] FactoryError),

    #[error("Operation was cancelled")]
    Cancelled,
}

/// Why a creation did not produce a usable object.
#[derive(Error, Debug)]
pub enum CreationError {
    #[error("factory failed to create object")]
    Factory(#[source] FactoryError),

    #[error("validation of the created object failed")]
    ValidationRejected,

    #[error("validation of the created object raised an error")]
    Validation(#[source] FactoryError),
}

impl PoolError {
    /// Returns `true` for [`PoolError::CreationFailed`].
    pub fn is_creation_failed(&self) -> bool {
        matches!(self, PoolError::CreationFailed(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

//! # Async Object Pool
//!
//! Bounded, thread-safe pool of expensive resources such as network
//! connections, driven by an asynchronous factory.
//!
//! ## Features
//!
//! - Lock-free idle set and atomic capacity accounting
//! - Asynchronous create, destroy and validate through [`ObjectFactory`]
//! - Optional validation on create, acquire and release
//! - Minimum idle replenishment and maximum idle trimming
//! - Fail-fast exhaustion, no request queueing
//! - Draining shutdown that destroys checked-out objects too
//! - Metrics snapshot and Prometheus text export
//!
//! ## Quick Start
//!
//! ```rust
//! use async_objectpool::{AsyncPool, ObjectFactory, PoolConfiguration};
//! use async_trait::async_trait;
//!
//! struct Sessions;
//!
//! #[async_trait]
//! impl ObjectFactory for Sessions {
//!     type Object = u32;
//!     type Error = std::io::Error;
//!
//!     async fn create(&self) -> Result<u32, std::io::Error> {
//!         Ok(7)
//!     }
//!
//!     async fn destroy(&self, _session: &u32) -> Result<(), std::io::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = AsyncPool::new(PoolConfiguration::new().with_max_total(4), Sessions);
//!
//! let session = pool.acquire().await.unwrap();
//! println!("Got: {}", *session);
//! pool.release(session).await.unwrap();
//!
//! pool.close().await;
//! # }
//! ```

mod pool;
mod config;
mod factory;
mod metrics;
mod errors;

pub use pool::{AsyncPool, LifecycleState, Pending, PooledObject};
pub use config::PoolConfiguration;
pub use factory::ObjectFactory;
pub use metrics::{PoolMetrics, MetricsExporter};
pub use errors::{CreationError, FactoryError, PoolError, PoolResult};

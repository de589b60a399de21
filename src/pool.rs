//! Core asynchronous object pool implementation

use crate::config::PoolConfiguration;
use crate::errors::{CreationError, PoolError, PoolResult};
use crate::factory::ObjectFactory;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// An object checked out of an [`AsyncPool`].
///
/// Hand it back with [`AsyncPool::release`]. Dropping it instead keeps the
/// object counted against the pool until the pool is closed.
pub struct PooledObject<T> {
    object: Arc<T>,
    object_id: usize,
}

impl<T> PooledObject<T> {
    /// Pool-assigned identifier, unique within one pool
    pub fn id(&self) -> usize {
        self.object_id
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("id", &self.object_id)
            .field("object", &*self.object)
            .finish()
    }
}

/// Lifecycle of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting acquisitions and releases
    Active,

    /// Closed, every managed object is being or has been destroyed
    Shutdown,
}

/// Outcome of an [`AsyncPool::acquire`] or [`AsyncPool::release`] call.
///
/// The work behind it is already running when the call returns. Dropping a
/// `Pending` does not cancel that work.
#[must_use = "the outcome of a pool operation should be awaited or explicitly dropped"]
pub struct Pending<R> {
    rx: oneshot::Receiver<PoolResult<R>>,
}

impl<R> Pending<R> {
    fn channel() -> (oneshot::Sender<PoolResult<R>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    fn ready(result: PoolResult<R>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }
}

impl<R> Future for Pending<R> {
    type Output = PoolResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Cancelled)))
    }
}

impl<R> fmt::Debug for Pending<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

/// What happens to the capacity slot of an object leaving the pool
#[derive(Clone, Copy)]
enum Slot {
    Release,
    /// Keep the slot reserved for a replacement creation
    Transfer,
}

struct Shared<F: ObjectFactory> {
    factory: F,
    config: PoolConfiguration,

    idle: SegQueue<PooledObject<F::Object>>,
    live: DashMap<usize, Arc<F::Object>>,

    idle_count: AtomicUsize,
    object_count: AtomicUsize,
    creating: AtomicUsize,
    /// `object_count + creating`, advanced before either of them
    reserved: AtomicUsize,
    next_id: AtomicUsize,

    closed: AtomicBool,
    metrics: MetricsTracker,
}

/// Asynchronous pool of objects produced by an [`ObjectFactory`].
///
/// Cloning the pool is cheap and every clone shares the same objects.
/// `acquire`, `release` and the constructor dispatch work onto the ambient
/// tokio runtime and must be called from within one.
///
/// # Examples
///
/// ```
/// use async_objectpool::{AsyncPool, ObjectFactory, PoolConfiguration};
/// use async_trait::async_trait;
///
/// struct Connections;
///
/// #[async_trait]
/// impl ObjectFactory for Connections {
///     type Object = String;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<String, std::io::Error> {
///         Ok("connection".to_string())
///     }
///
///     async fn destroy(&self, _object: &String) -> Result<(), std::io::Error> {
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = AsyncPool::new(PoolConfiguration::new().with_max_total(2), Connections);
///
/// let conn = pool.acquire().await.unwrap();
/// assert_eq!(conn.as_str(), "connection");
/// pool.release(conn).await.unwrap();
///
/// assert_eq!(pool.idle_count(), 1);
/// pool.close().await;
/// # }
/// ```
pub struct AsyncPool<F: ObjectFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ObjectFactory> Clone for AsyncPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ObjectFactory> AsyncPool<F> {
    /// Create a pool and start filling it up to the configured minimum idle
    /// count.
    ///
    /// # Panics
    ///
    /// Panics outside of a tokio runtime when `min_idle` is non-zero.
    pub fn new(config: PoolConfiguration, factory: F) -> Self {
        let shared = Arc::new(Shared {
            factory,
            config,
            idle: SegQueue::new(),
            live: DashMap::new(),
            idle_count: AtomicUsize::new(0),
            object_count: AtomicUsize::new(0),
            creating: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        });

        shared.replenish();

        Self { shared }
    }

    /// Acquire an object.
    ///
    /// An idle object is preferred. Without one, a new object is created if
    /// capacity allows, otherwise the call fails with
    /// [`PoolError::PoolExhausted`]. Requests are never queued.
    pub fn acquire(&self) -> Pending<PooledObject<F::Object>> {
        let shared = &self.shared;

        if shared.is_closed() {
            return Pending::ready(Err(PoolError::Closed));
        }

        if let Some(pooled) = shared.pop_idle() {
            if shared.config.test_on_acquire() {
                let (tx, pending) = Pending::channel();
                let task = Arc::clone(shared);
                tokio::spawn(async move {
                    let result = task.validate_idle(pooled).await;
                    task.deliver(tx, result);
                });
                return pending;
            }

            MetricsTracker::record(&shared.metrics.total_acquired);
            shared.replenish();
            return Pending::ready(Ok(pooled));
        }

        if !shared.begin_creation() {
            MetricsTracker::record(&shared.metrics.exhausted_events);
            debug!(
                objects = shared.object_count.load(Ordering::SeqCst),
                creating = shared.creating.load(Ordering::SeqCst),
                "pool exhausted"
            );
            return Pending::ready(Err(PoolError::PoolExhausted));
        }

        let (tx, pending) = Pending::channel();
        let task = Arc::clone(shared);
        tokio::spawn(async move {
            let result = task.create(task.config.test_on_create()).await;
            task.deliver(tx, result);
        });
        pending
    }

    /// Release a previously acquired object back to the pool.
    ///
    /// Fails with [`PoolError::NotManaged`] for objects this pool does not
    /// track, including objects of a closed pool. When the idle set is full the
    /// object is destroyed and the outcome of that destruction is reported.
    pub fn release(&self, object: PooledObject<F::Object>) -> Pending<()> {
        let shared = &self.shared;

        if shared.is_closed() || !shared.is_managed(&object) {
            return Pending::ready(Err(PoolError::NotManaged));
        }

        MetricsTracker::record(&shared.metrics.total_released);

        if shared.idle_count.load(Ordering::SeqCst) >= shared.config.max_idle() {
            return shared.dispose(object);
        }

        if shared.config.test_on_release() {
            let (tx, pending) = Pending::channel();
            let task = Arc::clone(shared);
            tokio::spawn(async move {
                let outcome = task.factory.validate(&*object).await;
                match outcome {
                    Ok(true) => task.return_to_idle(object),
                    outcome => {
                        task.record_validation_failure(object.object_id, outcome.err());
                        let _ = task.dispose(object).await;
                    }
                }
                let _ = tx.send(Ok(()));
            });
            return pending;
        }

        shared.return_to_idle(object);
        Pending::ready(Ok(()))
    }

    /// Shut the pool down and destroy every managed object, including the ones
    /// currently checked out.
    ///
    /// Returns once every destruction has finished. Calling it again is a
    /// no-op.
    pub async fn close(&self) {
        let shared = &self.shared;

        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Pairs with the fence in `register`: either a racing creation sees
        // the pool closed, or the drain below sees its live entry.
        atomic::fence(Ordering::SeqCst);

        shared.drain_idle();

        let ids: Vec<usize> = shared.live.iter().map(|entry| *entry.key()).collect();
        let mut destroys = JoinSet::new();

        for id in ids {
            if let Some((id, object)) = shared.live.remove(&id) {
                shared.retire(Slot::Release);
                let task = Arc::clone(shared);
                destroys.spawn(async move {
                    task.factory.destroy(&*object).await.map_err(|err| (id, err))
                });
            }
        }

        let drained = destroys.len();
        while let Some(joined) = destroys.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((object_id, err))) => {
                    warn!(object_id, error = %err, "failed to destroy object during shutdown");
                }
                Err(err) => warn!(error = %err, "destroy task did not complete"),
            }
        }

        info!(drained, "pool closed");
    }

    /// Number of idle objects
    pub fn idle_count(&self) -> usize {
        self.shared.idle_count.load(Ordering::SeqCst)
    }

    /// Number of managed objects, idle and checked out
    pub fn object_count(&self) -> usize {
        self.shared.object_count.load(Ordering::SeqCst)
    }

    /// Number of creations dispatched but not yet resolved
    pub fn creation_in_progress(&self) -> usize {
        self.shared.creating.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        if self.shared.is_closed() {
            LifecycleState::Shutdown
        } else {
            LifecycleState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    /// The factory this pool manages objects with
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.metrics.get_metrics(
            self.idle_count(),
            self.object_count(),
            self.creation_in_progress(),
            self.shared.config.max_total(),
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }
}

impl<F: ObjectFactory> fmt::Debug for AsyncPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncPool")
            .field("state", &self.state())
            .field("idle", &self.idle_count())
            .field("objects", &self.object_count())
            .field("creating", &self.creation_in_progress())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<F: ObjectFactory> Shared<F> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_managed(&self, pooled: &PooledObject<F::Object>) -> bool {
        self.live
            .get(&pooled.object_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), &pooled.object))
    }

    /// Capacity left for new objects, `None` when unbounded
    fn available_capacity(&self) -> Option<usize> {
        self.config
            .max_total()
            .map(|max| max.saturating_sub(self.reserved.load(Ordering::SeqCst)))
    }

    /// Reserve a slot and count a creation in progress. Fails without side
    /// effects when the pool is at capacity.
    fn begin_creation(&self) -> bool {
        let reserved = match self.config.max_total() {
            None => {
                self.reserved.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(max) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    (current < max).then_some(current + 1)
                })
                .is_ok(),
        };

        if reserved {
            self.creating.fetch_add(1, Ordering::SeqCst);
        }
        reserved
    }

    fn abandon_creation(&self) {
        self.creating.fetch_sub(1, Ordering::SeqCst);
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }

    fn register(&self, object: F::Object) -> PooledObject<F::Object> {
        let object_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let object = Arc::new(object);

        self.live.insert(object_id, Arc::clone(&object));
        atomic::fence(Ordering::SeqCst);
        self.creating.fetch_sub(1, Ordering::SeqCst);
        self.object_count.fetch_add(1, Ordering::SeqCst);
        MetricsTracker::record(&self.metrics.total_created);
        debug!(object_id, "object created");

        PooledObject { object, object_id }
    }

    /// Remove an object from the live set. Returns `false` if some other path
    /// already did.
    fn unregister(&self, pooled: &PooledObject<F::Object>, slot: Slot) -> bool {
        let removed = self
            .live
            .remove_if(&pooled.object_id, |_, object| Arc::ptr_eq(object, &pooled.object))
            .is_some();
        if removed {
            self.retire(slot);
        }
        removed
    }

    fn retire(&self, slot: Slot) {
        self.object_count.fetch_sub(1, Ordering::SeqCst);
        match slot {
            Slot::Release => {
                self.reserved.fetch_sub(1, Ordering::SeqCst);
            }
            Slot::Transfer => {
                self.creating.fetch_add(1, Ordering::SeqCst);
            }
        }
        MetricsTracker::record(&self.metrics.total_destroyed);
    }

    fn pop_idle(&self) -> Option<PooledObject<F::Object>> {
        while let Some(pooled) = self.idle.pop() {
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
            if self.live.contains_key(&pooled.object_id) {
                return Some(pooled);
            }
        }
        None
    }

    fn drain_idle(&self) {
        while self.idle.pop().is_some() {
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn record_validation_failure<E: fmt::Display>(&self, object_id: usize, error: Option<E>) {
        MetricsTracker::record(&self.metrics.validation_failures);
        match error {
            Some(err) => warn!(object_id, error = %err, "object validation raised an error"),
            None => debug!(object_id, "object failed validation"),
        }
    }

    /// Hand a result to the acquirer. An object nobody is waiting for any more
    /// goes back to the pool.
    fn deliver(
        self: &Arc<Self>,
        tx: oneshot::Sender<PoolResult<PooledObject<F::Object>>>,
        result: PoolResult<PooledObject<F::Object>>,
    ) {
        let acquired = result.is_ok();
        match tx.send(result) {
            Ok(()) if acquired => MetricsTracker::record(&self.metrics.total_acquired),
            Ok(()) => {}
            Err(Ok(pooled)) => {
                debug!(object_id = pooled.object_id, "acquirer went away, returning object");
                self.return_to_idle(pooled);
            }
            Err(Err(_)) => {}
        }
    }

    /// Take an object out of the pool right away and destroy it in the
    /// background, releasing its capacity slot.
    fn dispose(self: &Arc<Self>, pooled: PooledObject<F::Object>) -> Pending<()> {
        if !self.unregister(&pooled, Slot::Release) {
            return Pending::ready(Ok(()));
        }

        debug!(object_id = pooled.object_id, "destroying object");
        let (tx, pending) = Pending::channel();
        let task = Arc::clone(self);
        tokio::spawn(async move {
            let result = task.factory.destroy(&*pooled).await;
            if let Err(err) = &result {
                warn!(object_id = pooled.object_id, error = %err, "failed to destroy object");
            }
            let _ = tx.send(result.map_err(|err| PoolError::DestroyFailed(err.into())));
        });
        pending
    }

    /// Create an object into an already reserved slot.
    async fn create(self: &Arc<Self>, validate: bool) -> PoolResult<PooledObject<F::Object>> {
        if self.is_closed() {
            self.abandon_creation();
            return Err(PoolError::Closed);
        }

        let object = match self.factory.create().await {
            Ok(object) => object,
            Err(err) => {
                self.abandon_creation();
                MetricsTracker::record(&self.metrics.creation_failures);
                warn!(error = %err, "failed to create object");
                return Err(PoolError::CreationFailed(CreationError::Factory(err.into())));
            }
        };

        if validate {
            let rejection = match self.factory.validate(&object).await {
                Ok(true) => None,
                Ok(false) => Some(CreationError::ValidationRejected),
                Err(err) => Some(CreationError::Validation(err.into())),
            };

            if let Some(cause) = rejection {
                MetricsTracker::record(&self.metrics.validation_failures);
                MetricsTracker::record(&self.metrics.creation_failures);
                debug!(error = %cause, "created object rejected");

                if let Err(err) = self.factory.destroy(&object).await {
                    warn!(error = %err, "failed to destroy rejected object");
                }
                MetricsTracker::record(&self.metrics.total_destroyed);
                self.abandon_creation();
                return Err(PoolError::CreationFailed(cause));
            }
        }

        let pooled = self.register(object);

        if self.is_closed() {
            let _ = self.dispose(pooled).await;
            return Err(PoolError::Closed);
        }

        Ok(pooled)
    }

    /// Validate an object taken from the idle set. A rejected object is
    /// destroyed and its slot reused to create a replacement for the same
    /// request.
    async fn validate_idle(
        self: &Arc<Self>,
        pooled: PooledObject<F::Object>,
    ) -> PoolResult<PooledObject<F::Object>> {
        let outcome = self.factory.validate(&*pooled).await;
        if matches!(outcome, Ok(true)) {
            return Ok(pooled);
        }

        self.record_validation_failure(pooled.object_id, outcome.err());

        if !self.unregister(&pooled, Slot::Transfer) {
            return Err(PoolError::Closed);
        }

        if let Err(err) = self.factory.destroy(&*pooled).await {
            warn!(object_id = pooled.object_id, error = %err, "failed to destroy invalid idle object");
        }

        self.create(self.config.test_on_create()).await
    }

    /// Put an object back into the idle set, or destroy it if that would push
    /// the idle count over `max_idle`.
    fn return_to_idle(self: &Arc<Self>, pooled: PooledObject<F::Object>) {
        let idle = self.idle_count.fetch_add(1, Ordering::SeqCst) + 1;

        if idle > self.config.max_idle() {
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
            debug!(object_id = pooled.object_id, "idle set full");
            let _ = self.dispose(pooled);
            return;
        }

        debug!(object_id = pooled.object_id, "object returned to idle");
        self.idle.push(pooled);

        if self.is_closed() {
            self.drain_idle();
        }
    }

    /// Dispatch creations until the idle set reaches `min_idle` or capacity
    /// runs out.
    fn replenish(self: &Arc<Self>) {
        let min_idle = self.config.min_idle();
        let idle = self.idle_count.load(Ordering::SeqCst);
        if idle >= min_idle || self.is_closed() {
            return;
        }

        let deficit = min_idle - idle;
        let to_create = self
            .available_capacity()
            .map_or(deficit, |available| available.min(deficit));

        for _ in 0..to_create {
            if !self.begin_creation() {
                break;
            }

            let task = Arc::clone(self);
            tokio::spawn(async move {
                match task.create(false).await {
                    Ok(pooled) => task.return_to_idle(pooled),
                    Err(err) => warn!(error = %err, "failed to replenish idle object"),
                }
            });
        }
    }
}

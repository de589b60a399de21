//! Pool configuration options

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_TEST_ON_CREATE: bool = false;
pub const DEFAULT_TEST_ON_ACQUIRE: bool = false;
pub const DEFAULT_TEST_ON_RELEASE: bool = false;
pub const DEFAULT_MAX_TOTAL: usize = 8;
pub const DEFAULT_MAX_IDLE: usize = 8;
pub const DEFAULT_MIN_IDLE: usize = 0;

/// Configuration for object pool behavior
///
/// The configuration is immutable once handed to a pool. Build it by chaining
/// the `with_*` methods on [`PoolConfiguration::new`].
///
/// # Examples
///
/// ```
/// use async_objectpool::PoolConfiguration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(16)
///     .with_max_idle(4)
///     .with_min_idle(2)
///     .with_test_on_acquire();
///
/// assert_eq!(config.max_total(), Some(16));
/// assert_eq!(config.min_idle(), 2);
/// assert!(config.test_on_acquire());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    test_on_create: bool,
    test_on_acquire: bool,
    test_on_release: bool,

    /// `None` means no limit on the number of managed objects
    #[cfg_attr(feature = "serde", serde(deserialize_with = "deserialize_max_total"))]
    max_total: Option<usize>,
    max_idle: usize,
    min_idle: usize,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            test_on_create: DEFAULT_TEST_ON_CREATE,
            test_on_acquire: DEFAULT_TEST_ON_ACQUIRE,
            test_on_release: DEFAULT_TEST_ON_RELEASE,
            max_total: Some(DEFAULT_MAX_TOTAL),
            max_idle: DEFAULT_MAX_IDLE,
            min_idle: DEFAULT_MIN_IDLE,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate newly created objects before handing them out
    pub fn with_test_on_create(self) -> Self {
        self.with_test_on_create_enabled(true)
    }

    pub fn with_test_on_create_enabled(mut self, enabled: bool) -> Self {
        self.test_on_create = enabled;
        self
    }

    /// Validate idle objects before handing them out
    pub fn with_test_on_acquire(self) -> Self {
        self.with_test_on_acquire_enabled(true)
    }

    pub fn with_test_on_acquire_enabled(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }

    /// Validate objects when they are released back to the pool
    pub fn with_test_on_release(self) -> Self {
        self.with_test_on_release_enabled(true)
    }

    pub fn with_test_on_release_enabled(mut self, enabled: bool) -> Self {
        self.test_on_release = enabled;
        self
    }

    /// Set the cap on the total number of managed objects.
    ///
    /// A negative value removes the cap.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_objectpool::PoolConfiguration;
    ///
    /// assert_eq!(PoolConfiguration::new().with_max_total(4).max_total(), Some(4));
    /// assert_eq!(PoolConfiguration::new().with_max_total(-1).max_total(), None);
    /// ```
    pub fn with_max_total(mut self, max_total: i64) -> Self {
        self.max_total = max_total_bound(max_total);
        self
    }

    /// Remove the cap on the total number of managed objects
    pub fn with_unbounded_total(mut self) -> Self {
        self.max_total = None;
        self
    }

    /// Set the cap on the number of idle objects
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the number of idle objects the pool tries to keep around
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn test_on_create(&self) -> bool {
        self.test_on_create
    }

    pub fn test_on_acquire(&self) -> bool {
        self.test_on_acquire
    }

    pub fn test_on_release(&self) -> bool {
        self.test_on_release
    }

    /// Maximum number of managed objects, `None` if unbounded
    pub fn max_total(&self) -> Option<usize> {
        self.max_total
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    /// Effective minimum idle target.
    ///
    /// A configured value above [`max_idle`](Self::max_idle) is capped to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_objectpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_idle(2).with_min_idle(5);
    /// assert_eq!(config.min_idle(), 2);
    /// ```
    pub fn min_idle(&self) -> usize {
        self.min_idle.min(self.max_idle)
    }
}

/// Negative means unbounded; bounds beyond the address space saturate.
fn max_total_bound(max_total: i64) -> Option<usize> {
    if max_total < 0 {
        return None;
    }
    Some(usize::try_from(max_total).unwrap_or(usize::MAX))
}

/// Accepts a count, `null`, or a negative number for no limit.
#[cfg(feature = "serde")]
fn deserialize_max_total<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.and_then(max_total_bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfiguration::default();

        assert!(!config.test_on_create());
        assert!(!config.test_on_acquire());
        assert!(!config.test_on_release());
        assert_eq!(config.max_total(), Some(8));
        assert_eq!(config.max_idle(), 8);
        assert_eq!(config.min_idle(), 0);
    }

    #[test]
    fn test_switches() {
        let config = PoolConfiguration::new()
            .with_test_on_create()
            .with_test_on_acquire()
            .with_test_on_release()
            .with_test_on_acquire_enabled(false);

        assert!(config.test_on_create());
        assert!(!config.test_on_acquire());
        assert!(config.test_on_release());
    }

    #[test]
    fn test_negative_max_total_is_unbounded() {
        let config = PoolConfiguration::new().with_max_total(-1);
        assert_eq!(config.max_total(), None);

        let config = config.with_max_total(0);
        assert_eq!(config.max_total(), Some(0));

        assert_eq!(PoolConfiguration::new().with_unbounded_total().max_total(), None);
    }

    #[test]
    fn test_large_max_total_stays_bounded() {
        assert!(PoolConfiguration::new().with_max_total(i64::MAX).max_total().is_some());
        assert_eq!(max_total_bound(i64::MAX), Some(usize::try_from(i64::MAX).unwrap_or(usize::MAX)));
        assert_eq!(max_total_bound(i64::MIN), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_negative_max_total() {
        let config: PoolConfiguration =
            serde_json::from_str(r#"{"max_total": -1, "max_idle": 4}"#).unwrap();
        assert_eq!(config.max_total(), None);
        assert_eq!(config.max_idle(), 4);

        let config: PoolConfiguration = serde_json::from_str(r#"{"max_total": 12}"#).unwrap();
        assert_eq!(config.max_total(), Some(12));

        let config: PoolConfiguration = serde_json::from_str(r#"{"max_total": null}"#).unwrap();
        assert_eq!(config.max_total(), None);

        let config: PoolConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PoolConfiguration::default());
    }

    #[test]
    fn test_min_idle_capped_by_max_idle() {
        let config = PoolConfiguration::new().with_max_idle(3).with_min_idle(10);
        assert_eq!(config.min_idle(), 3);

        let config = config.with_max_idle(20);
        assert_eq!(config.min_idle(), 10);
    }
}

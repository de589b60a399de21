//! Metrics collection and export for object pools

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Point-in-time metrics of a pool
///
/// The gauges are read independently of each other and are not a
/// transactionally consistent view.
///
/// # Examples
///
/// ```
/// use async_objectpool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// let exported = metrics.export();
/// assert_eq!(exported["idle_objects"], "0");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Successful acquisitions
    pub total_acquired: usize,

    /// Objects handed back through `release`
    pub total_released: usize,

    /// Objects registered with the pool after creation
    pub total_created: usize,

    /// Objects removed from the pool and passed to the factory for destruction
    pub total_destroyed: usize,

    /// Creations that failed or were rejected by validation
    pub creation_failures: usize,

    /// Acquisitions rejected because the pool was exhausted
    pub exhausted_events: usize,

    /// Validations that returned `false` or an error
    pub validation_failures: usize,

    /// Current idle objects
    pub idle_objects: usize,

    /// Current managed objects, idle and checked out
    pub managed_objects: usize,

    /// Creations dispatched but not yet resolved
    pub creation_in_progress: usize,

    /// `(managed + in creation) / max_total`, 0.0 when unbounded
    pub utilization: f64,

    /// Configured cap, `None` when unbounded
    pub max_total: Option<usize>,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("idle_objects".to_string(), self.idle_objects.to_string());
        metrics.insert("managed_objects".to_string(), self.managed_objects.to_string());
        metrics.insert("creation_in_progress".to_string(), self.creation_in_progress.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert(
            "max_total".to_string(),
            self.max_total.map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use async_objectpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&PoolMetrics::default(), "redis", Some(&tags));
    /// assert!(output.contains("objectpool_objects_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("objectpool_objects_idle", "Current idle objects", metrics.idle_objects as f64),
            ("objectpool_objects_managed", "Current managed objects", metrics.managed_objects as f64),
            (
                "objectpool_objects_creating",
                "Creations in progress",
                metrics.creation_in_progress as f64,
            ),
            ("objectpool_utilization", "Pool utilization ratio", metrics.utilization),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} gauge");
            let _ = writeln!(output, "{name}{{{labels}}} {value:.2}");
        }

        let counters = [
            ("objectpool_objects_acquired_total", "Total objects acquired", metrics.total_acquired),
            ("objectpool_objects_released_total", "Total objects released", metrics.total_released),
            ("objectpool_objects_created_total", "Total objects created", metrics.total_created),
            ("objectpool_objects_destroyed_total", "Total objects destroyed", metrics.total_destroyed),
            (
                "objectpool_creation_failures_total",
                "Failed object creations",
                metrics.creation_failures,
            ),
            ("objectpool_events_exhausted_total", "Pool exhausted events", metrics.exhausted_events),
            (
                "objectpool_validation_failures_total",
                "Validation failures",
                metrics.validation_failures,
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name}{{{labels}}} {value}");
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut sorted: Vec<_> = tags.iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal lifetime counters
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub validation_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        managed: usize,
        creating: usize,
        max_total: Option<usize>,
    ) -> PoolMetrics {
        let utilization = match max_total {
            Some(max) if max > 0 => (managed + creating) as f64 / max as f64,
            _ => 0.0,
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            idle_objects: idle,
            managed_objects: managed,
            creation_in_progress: creating,
            utilization,
            max_total,
        }
    }
}

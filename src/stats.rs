/*! Run-time counter fabric.

Every pipeline stage owns a set of named 64-bit counters. Counters are
registered once at startup and written exclusively by their owning thread;
an external telemetry scraper reads them by index through [`Statistics`].
Reads are lock-free and tear-allowed: the scraper does not need cross-field
atomicity, only that each individual counter is monotonic.
*/
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// Handle to one 64-bit counter.
///
/// Cloning hands out another handle to the same underlying value, which is
/// how a counter ends up shared between its owning component and the
/// [`Statistics`] registry.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    /// Create a fresh counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Add `n`.
    pub fn add(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Overwrite the value. Used for gauges like the runtime status mask.
    pub fn set(&self, n: i64) {
        self.0.store(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    fn same_backing(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

struct StatTuple {
    name: String,
    counter: Counter,
}

/// Ordered registry of named counters.
///
/// The index API is 1-based, matching what the telemetry scraper expects:
/// `name(0)` is the empty string and `value(0)` is -1.
#[derive(Default)]
pub struct Statistics {
    prefix: String,
    stats: Vec<StatTuple>,
}

const POINT: char = '.';

impl Statistics {
    /// New registry with no prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graphite prefix and region prepended to every stat name.
    ///
    /// Both segments get a terminating dot if they lack one.
    pub fn set_prefix(&mut self, stats_prefix: &str, stats_region: &str) {
        self.prefix.clear();
        for segment in [stats_prefix, stats_region] {
            if segment.is_empty() {
                continue;
            }
            self.prefix.push_str(segment);
            if !segment.ends_with(POINT) {
                self.prefix.push(POINT);
            }
        }
    }

    /// Register a counter under `name`, resetting it to zero.
    ///
    /// Fails on a duplicate (prefixed) name and on a handle whose backing
    /// value is already registered under another name.
    pub fn create(&mut self, name: &str, counter: &Counter) -> Result<()> {
        log::info!("Adding stat {name}");
        counter.set(0);
        let pfname = format!("{}{}", self.prefix, name);
        for s in &self.stats {
            if s.name == pfname || s.counter.same_backing(counter) {
                log::error!("Duplicate stat name or backing counter for {name}");
                return Err(Error::DuplicateStat(pfname));
            }
        }
        self.stats.push(StatTuple {
            name: pfname,
            counter: counter.clone(),
        });
        Ok(())
    }

    /// Number of registered counters.
    #[must_use]
    pub fn size(&self) -> usize {
        self.stats.len()
    }

    /// Full name of the 1-based `index`, or `""` when out of range.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        if index < 1 || index > self.stats.len() {
            return "";
        }
        &self.stats[index - 1].name
    }

    /// Value of the 1-based `index`, or -1 when out of range.
    #[must_use]
    pub fn value(&self, index: usize) -> i64 {
        if index < 1 || index > self.stats.len() {
            return -1;
        }
        self.stats[index - 1].counter.value()
    }

    /// Format all counters, one `name value` pair per line.
    ///
    /// Used by the periodic stats log in the daemon.
    #[must_use]
    pub fn report(&self) -> String {
        use itertools::Itertools;
        self.stats
            .iter()
            .map(|s| format!("{} {}", s.name, s.counter.value()))
            .join("\n")
    }
}

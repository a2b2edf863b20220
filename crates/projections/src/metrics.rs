use prometheus::{register_int_counter_vec, IntCounterVec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

lazy_static::lazy_static! {
    /// Operational counters, exported through the default registry.
    static ref CACHE_OPS: IntCounterVec = register_int_counter_vec!(
        "cache_projection_ops_total",
        "Cache projection operations by projection and outcome.",
        &["projection", "op"]
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub read_errors: u64,
}

/// Per-service atomic counters. Each service owns its own instance;
/// the prometheus registry aggregates across instances by projection
/// label.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
    read_errors: AtomicU64,
}

#[derive(Clone)]
pub struct ProjectionMetrics {
    projection: &'static str,
    counters: Arc<Counters>,
}

impl ProjectionMetrics {
    pub fn new(projection: &'static str) -> Self {
        Self {
            projection,
            counters: Arc::new(Counters::default()),
        }
    }

    fn bump(&self, op: &str, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        CACHE_OPS.with_label_values(&[self.projection, op]).inc();
    }

    pub fn hit(&self) {
        self.bump("hit", &self.counters.hits);
    }
    pub fn miss(&self) {
        self.bump("miss", &self.counters.misses);
    }
    pub fn write(&self) {
        self.bump("write", &self.counters.writes);
    }
    pub fn write_error(&self) {
        self.bump("write_error", &self.counters.write_errors);
    }
    pub fn read_error(&self) {
        self.bump("read_error", &self.counters.read_errors);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
        }
    }
}

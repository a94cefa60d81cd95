use std::sync::atomic::{AtomicU64, Ordering};

/// Global pipeline counters
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub fallbacks: AtomicU64,
    pub cache_store_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            cache_store_errors: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition format
    pub fn render(&self) -> String {
        let counters = [
            ("thumbproxy_cache_hits_total", "Total number of cache hits", &self.cache_hits),
            ("thumbproxy_cache_misses_total", "Total number of cache misses", &self.cache_misses),
            ("thumbproxy_transforms_total", "Total number of thumbnail transformations", &self.transforms),
            ("thumbproxy_fallbacks_total", "Total number of fallback responses", &self.fallbacks),
            ("thumbproxy_cache_store_errors_total", "Total number of failed cache writes", &self.cache_store_errors),
        ];

        let mut out = String::new();
        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

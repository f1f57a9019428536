//! Thread-safe metrics collection for crawl progress and API monitoring.
//!
//! Counters and gauges are name-keyed and lock-free; histograms keep running
//! min/max/avg under a short-lived mutex. The whole registry renders to the
//! Prometheus text exposition format for the `/metrics` endpoint.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[derive(Default)]
pub struct Metrics {
    counters: DashMap<String, AtomicU64>,
    // Gauges store f64 bit patterns so reads and writes stay lock-free
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Mutex<Histogram>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    pub fn add_counter(&self, name: &str, delta: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(Histogram::default()))
            .lock()
            .observe(value);
    }

    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.histograms.get(name).map(|h| h.lock().clone())
    }

    /// Render all metrics in the Prometheus text exposition format.
    ///
    /// Histograms are exposed as `_avg`, `_min` and `_max` gauges. Names are
    /// sorted so the output is stable across scrapes.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in counters {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }

        let mut gauges: Vec<(String, f64)> = self
            .gauges
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    f64::from_bits(e.value().load(Ordering::Relaxed)),
                )
            })
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in gauges {
            out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
        }

        let mut histograms: Vec<(String, Histogram)> = self
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().lock().clone()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, hist) in histograms {
            if hist.count() == 0 {
                continue;
            }
            out.push_str(&format!(
                "# TYPE {name}_avg gauge\n{name}_avg {}\n",
                hist.avg()
            ));
            out.push_str(&format!(
                "# TYPE {name}_min gauge\n{name}_min {}\n",
                hist.min()
            ));
            out.push_str(&format!(
                "# TYPE {name}_max gauge\n{name}_max {}\n",
                hist.max()
            ));
        }

        out
    }
}

pub type SharedMetrics = Arc<Metrics>;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;

/// Exported counter that only grows.
///
/// Hardware counters can be cleared underneath us; a sample lower than the
/// previous one is taken as a restart from zero, so the exported value stays
/// monotonic. Updated through `&self` so the poller can run under a read
/// lock.
#[derive(Debug)]
pub struct MonotonicCounter {
    name: String,
    value: AtomicU64,
    last_sample: AtomicU64,
    /// Per-second rate between the last two samples, as `f64` bits.
    rate: AtomicU64,
    updated_ms: AtomicI64,
}

impl MonotonicCounter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(0),
            last_sample: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            updated_ms: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    pub fn update(&self, sample: u64) {
        self.update_at(sample, Utc::now().timestamp_millis());
    }

    pub(crate) fn update_at(&self, sample: u64, now_ms: i64) {
        let last = self.last_sample.swap(sample, Ordering::Relaxed);
        let delta = if sample >= last { sample - last } else { sample };
        self.value.fetch_add(delta, Ordering::Relaxed);

        let prev_ms = self.updated_ms.swap(now_ms, Ordering::Relaxed);
        if prev_ms > 0 && now_ms > prev_ms {
            let rate = delta as f64 * 1000.0 / (now_ms - prev_ms) as f64;
            self.rate.store(rate.to_bits(), Ordering::Relaxed);
        }
    }
}

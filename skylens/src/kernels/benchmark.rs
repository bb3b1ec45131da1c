//! Benchmark records and the CPU/GPU recommendation cache.
//!
//! The first time an (operation, size bucket) pair is dispatched, both
//! execution paths are timed and the winner is cached. Subsequent calls
//! for similar sizes skip re-benchmarking and use the cached
//! recommendation unless the cache is cleared.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{Backend, KernelOp};

/// Guard against a zero GPU time measurement producing an infinite speedup.
const MIN_GPU_TIME_US: f64 = 1e-3;

/// Default cap on retained benchmark records.
pub const DEFAULT_MAX_HISTORY: usize = 256;

/// GPU must beat CPU by this factor before it is recommended; small wins
/// are not worth the upload/readback risk on marginal hardware.
const GPU_ADVANTAGE_THRESHOLD: f64 = 1.05;

/// One timed CPU-vs-GPU comparison for a kernel operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub operation: KernelOp,
    pub cpu_time_us: f64,
    pub gpu_time_us: f64,
    /// cpu_time / max(gpu_time, epsilon). Always positive and finite.
    pub speedup: f64,
    pub recommendation: Backend,
    pub pixel_count: usize,
    pub timestamp_ms: u64,
}

impl BenchmarkRecord {
    pub fn new(
        operation: KernelOp,
        cpu_time_us: f64,
        gpu_time_us: f64,
        pixel_count: usize,
    ) -> Self {
        let speedup = cpu_time_us.max(0.0) / gpu_time_us.max(MIN_GPU_TIME_US);
        let recommendation = if speedup > GPU_ADVANTAGE_THRESHOLD {
            Backend::Gpu
        } else {
            Backend::Cpu
        };
        Self {
            operation,
            cpu_time_us,
            gpu_time_us,
            speedup,
            recommendation,
            pixel_count,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

/// Coarse size bucket for recommendation caching: images within the same
/// power-of-two pixel count share a bucket.
pub fn size_bucket(pixel_count: usize) -> u32 {
    (usize::BITS - pixel_count.max(1).leading_zeros()).saturating_sub(1)
}

/// Rolling benchmark history plus the per-(operation, bucket)
/// recommendation cache. Process-lifetime, trimmed to a maximum size.
#[derive(Debug)]
pub struct BenchmarkCache {
    history: VecDeque<BenchmarkRecord>,
    max_history: usize,
    recommendations: HashMap<(KernelOp, u32), Backend>,
}

impl BenchmarkCache {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max_history: max_history.max(1),
            recommendations: HashMap::new(),
        }
    }

    /// Record a benchmark and cache its recommendation.
    pub fn record(&mut self, record: BenchmarkRecord) {
        self.recommendations.insert(
            (record.operation, size_bucket(record.pixel_count)),
            record.recommendation,
        );
        self.history.push_back(record);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Cached recommendation for an operation at a given pixel count.
    pub fn recommendation(&self, operation: KernelOp, pixel_count: usize) -> Option<Backend> {
        self.recommendations
            .get(&(operation, size_bucket(pixel_count)))
            .copied()
    }

    /// Pin a recommendation without a timed record (used when the GPU path
    /// fails during benchmarking).
    pub fn pin(&mut self, operation: KernelOp, pixel_count: usize, backend: Backend) {
        self.recommendations
            .insert((operation, size_bucket(pixel_count)), backend);
    }

    /// Drop all cached recommendations, forcing re-benchmarking.
    pub fn clear_recommendations(&mut self) {
        self.recommendations.clear();
    }

    pub fn history(&self) -> impl Iterator<Item = &BenchmarkRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Export the history as JSON for diagnostics.
    pub fn export_json(&self) -> serde_json::Result<String> {
        let records: Vec<&BenchmarkRecord> = self.history.iter().collect();
        serde_json::to_string_pretty(&records)
    }

    /// Import a previously exported history, replaying the records into
    /// the recommendation cache.
    pub fn import_json(&mut self, json: &str) -> serde_json::Result<()> {
        let records: Vec<BenchmarkRecord> = serde_json::from_str(json)?;
        for record in records {
            self.record(record);
        }
        Ok(())
    }
}

impl Default for BenchmarkCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speedup_is_finite_with_zero_gpu_time() {
        let record = BenchmarkRecord::new(KernelOp::Laplacian, 1000.0, 0.0, 1 << 20);
        assert!(record.speedup.is_finite());
        assert!(record.speedup > 0.0);
        assert_eq!(record.recommendation, Backend::Gpu);
    }

    #[test]
    fn test_slow_gpu_recommends_cpu() {
        let record = BenchmarkRecord::new(KernelOp::BlockVariance, 100.0, 500.0, 1 << 16);
        assert_eq!(record.recommendation, Backend::Cpu);
        assert!(record.speedup < 1.0);
    }

    #[test]
    fn test_size_bucket_is_coarse() {
        assert_eq!(size_bucket(1_000_000), size_bucket(1_040_000));
        assert_ne!(size_bucket(1 << 18), size_bucket(1 << 22));
        // Degenerate input does not panic.
        let _ = size_bucket(0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut cache = BenchmarkCache::new(4);
        for i in 0..10 {
            cache.record(BenchmarkRecord::new(
                KernelOp::Laplacian,
                100.0 + i as f64,
                50.0,
                1 << 20,
            ));
        }
        assert_eq!(cache.history_len(), 4);
    }

    #[test]
    fn test_recommendation_hit_and_miss() {
        let mut cache = BenchmarkCache::default();
        assert!(cache.recommendation(KernelOp::Laplacian, 1 << 20).is_none());
        cache.record(BenchmarkRecord::new(KernelOp::Laplacian, 500.0, 100.0, 1 << 20));
        assert_eq!(
            cache.recommendation(KernelOp::Laplacian, (1 << 20) + 5000),
            Some(Backend::Gpu)
        );
        // Different bucket still misses.
        assert!(cache.recommendation(KernelOp::Laplacian, 1 << 10).is_none());
    }

    #[test]
    fn test_json_round_trip_preserves_fields() {
        let mut cache = BenchmarkCache::default();
        cache.record(BenchmarkRecord::new(KernelOp::AberrationMap, 812.5, 90.25, 2_073_600));
        cache.record(BenchmarkRecord::new(KernelOp::VignettingMap, 55.0, 80.0, 307_200));

        let json = cache.export_json().unwrap();
        let mut restored = BenchmarkCache::default();
        restored.import_json(&json).unwrap();

        let original: Vec<_> = cache.history().cloned().collect();
        let round_tripped: Vec<_> = restored.history().cloned().collect();
        assert_eq!(original, round_tripped);
    }
}

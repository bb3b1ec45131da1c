//! Kernel execution backend: CPU reference kernels, GPU shader
//! equivalents, and benchmark-driven dispatch between them.
//!
//! Analyzers call the typed operations on [`ExecutionContext`]; the
//! context consults the benchmark cache to pick a backend per
//! (operation, image-size bucket), timing both paths the first time a
//! bucket is seen. A GPU failure is logged and downgraded to the CPU
//! path; it never surfaces to the caller.

pub mod benchmark;
pub mod cpu;
pub mod gpu;

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::Buffer2;
use crate::error::Result;
use crate::loader::PixelBuffer;

pub use benchmark::{size_bucket, BenchmarkCache, BenchmarkRecord, DEFAULT_MAX_HISTORY};
pub use gpu::GpuExecutor;

use gpu::KernelParams;

/// Pixel-level kernel operations with both CPU and GPU implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelOp {
    Laplacian,
    HarrisResponse,
    BlockVariance,
    BlockingMap,
    AberrationMap,
    VignettingMap,
}

impl KernelOp {
    pub fn name(&self) -> &'static str {
        match self {
            KernelOp::Laplacian => "laplacian",
            KernelOp::HarrisResponse => "harris_response",
            KernelOp::BlockVariance => "block_variance",
            KernelOp::BlockingMap => "blocking_map",
            KernelOp::AberrationMap => "aberration_map",
            KernelOp::VignettingMap => "vignetting_map",
        }
    }
}

/// Execution backend for a kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
}

/// Shared execution state for kernel dispatch: the optional GPU executor
/// and the benchmark/recommendation cache.
///
/// One context is created per process (or per scheduler) and passed by
/// reference into analysis calls. Pixel-level work is task-local, so the
/// only synchronization here is single-owner access to the GPU and the
/// cache.
#[derive(Debug)]
pub struct ExecutionContext {
    gpu: Mutex<Option<GpuExecutor>>,
    bench: Mutex<BenchmarkCache>,
}

impl ExecutionContext {
    /// Create a context, attempting GPU initialization. A missing or
    /// broken GPU downgrades to CPU-only execution with a log line.
    pub fn new() -> Self {
        let gpu = match GpuExecutor::new() {
            Ok(executor) => Some(executor),
            Err(err) => {
                tracing::warn!("GPU unavailable, running CPU-only: {err}");
                None
            }
        };
        Self {
            gpu: Mutex::new(gpu),
            bench: Mutex::new(BenchmarkCache::default()),
        }
    }

    /// Create a CPU-only context. Used in tests and on headless CI.
    pub fn cpu_only() -> Self {
        Self {
            gpu: Mutex::new(None),
            bench: Mutex::new(BenchmarkCache::default()),
        }
    }

    /// Whether a GPU execution path is available.
    pub fn gpu_available(&self) -> bool {
        self.gpu.lock().is_some()
    }

    /// Snapshot of the benchmark history.
    pub fn benchmark_history(&self) -> Vec<BenchmarkRecord> {
        self.bench.lock().history().cloned().collect()
    }

    /// Export benchmark history as JSON for diagnostics.
    pub fn export_benchmarks(&self) -> serde_json::Result<String> {
        self.bench.lock().export_json()
    }

    /// Import a previously exported benchmark history.
    pub fn import_benchmarks(&self, json: &str) -> serde_json::Result<()> {
        self.bench.lock().import_json(json)
    }

    /// Drop cached recommendations, forcing re-benchmarking on next use.
    pub fn clear_recommendations(&self) {
        self.bench.lock().clear_recommendations();
    }

    /// Evict GPU buffer pool entries idle for longer than `max_idle`.
    pub fn evict_idle_gpu(&self, max_idle: Duration) {
        if let Some(gpu) = self.gpu.lock().as_mut() {
            gpu.evict_idle(max_idle);
        }
    }

    /// Absolute Laplacian response map.
    pub fn laplacian_map(&self, luma: &Buffer2<f32>) -> Buffer2<f32> {
        let (w, h) = (luma.width(), luma.height());
        self.dispatch(
            KernelOp::Laplacian,
            w * h,
            || cpu::laplacian_map(luma),
            |gpu| {
                let out = gpu.run(
                    KernelOp::Laplacian,
                    KernelParams::for_size(w, h),
                    luma.pixels(),
                    None,
                    w * h,
                )?;
                Ok(Buffer2::new(w, h, out))
            },
        )
    }

    /// Harris corner response map.
    pub fn harris_response(&self, luma: &Buffer2<f32>, k: f32) -> Buffer2<f32> {
        let (w, h) = (luma.width(), luma.height());
        self.dispatch(
            KernelOp::HarrisResponse,
            w * h,
            || cpu::harris_response_map(luma, k),
            |gpu| {
                let params = KernelParams {
                    harris_k: k,
                    ..KernelParams::for_size(w, h)
                };
                let out = gpu.run(KernelOp::HarrisResponse, params, luma.pixels(), None, w * h)?;
                Ok(Buffer2::new(w, h, out))
            },
        )
    }

    /// Per-block luminance variances.
    pub fn block_variances(&self, luma: &Buffer2<f32>, block_size: usize) -> Vec<f32> {
        let (w, h) = (luma.width(), luma.height());
        let (bw, bh) = (w / block_size, h / block_size);
        if bw == 0 || bh == 0 {
            return Vec::new();
        }
        self.dispatch(
            KernelOp::BlockVariance,
            w * h,
            || cpu::block_variances(luma, block_size),
            |gpu| {
                let params = KernelParams {
                    block_size: block_size as u32,
                    ..KernelParams::for_size(w, h)
                };
                gpu.run(KernelOp::BlockVariance, params, luma.pixels(), None, bw * bh)
            },
        )
    }

    /// Compression blocking signature map.
    pub fn blocking_map(&self, luma: &Buffer2<f32>, period: usize) -> Buffer2<f32> {
        let (w, h) = (luma.width(), luma.height());
        self.dispatch(
            KernelOp::BlockingMap,
            w * h,
            || cpu::blocking_map(luma, period),
            |gpu| {
                let params = KernelParams {
                    period: period as u32,
                    ..KernelParams::for_size(w, h)
                };
                let out = gpu.run(KernelOp::BlockingMap, params, luma.pixels(), None, w * h)?;
                Ok(Buffer2::new(w, h, out))
            },
        )
    }

    /// Chromatic aberration map.
    pub fn aberration_map(&self, buffer: &PixelBuffer, edge_threshold: f32) -> Buffer2<f32> {
        let (w, h) = (buffer.width(), buffer.height());
        self.dispatch(
            KernelOp::AberrationMap,
            w * h,
            || cpu::aberration_map(buffer, edge_threshold),
            |gpu| {
                let params = KernelParams {
                    edge_threshold,
                    ..KernelParams::for_size(w, h)
                };
                let out = gpu.run(
                    KernelOp::AberrationMap,
                    params,
                    buffer.luma().pixels(),
                    Some(buffer.rgba()),
                    w * h,
                )?;
                Ok(Buffer2::new(w, h, out))
            },
        )
    }

    /// Mean brightness per concentric ring from center to corner.
    pub fn ring_profile(&self, luma: &Buffer2<f32>, rings: usize) -> Vec<f32> {
        let (w, h) = (luma.width(), luma.height());
        self.dispatch(
            KernelOp::VignettingMap,
            w * h,
            || cpu::ring_profile(luma, rings),
            |gpu| {
                let params = KernelParams {
                    ring_count: rings as u32,
                    ..KernelParams::for_size(w, h)
                };
                let raw = gpu.run(
                    KernelOp::VignettingMap,
                    params,
                    luma.pixels(),
                    None,
                    rings * 2,
                )?;
                // raw = [sum_0..sum_{R-1}, count_0..count_{R-1}]
                Ok((0..rings)
                    .map(|r| {
                        let count = raw[rings + r];
                        if count > 0.0 {
                            raw[r] / count
                        } else {
                            0.0
                        }
                    })
                    .collect())
            },
        )
    }

    /// Run `op` on the recommended backend, benchmarking both paths the
    /// first time this (operation, size bucket) pair is seen.
    fn dispatch<T, C, G>(&self, op: KernelOp, pixel_count: usize, cpu_path: C, gpu_path: G) -> T
    where
        C: Fn() -> T,
        G: Fn(&mut GpuExecutor) -> Result<T>,
    {
        let mut gpu_guard = self.gpu.lock();
        let Some(gpu_exec) = gpu_guard.as_mut() else {
            drop(gpu_guard);
            return cpu_path();
        };

        let cached = self.bench.lock().recommendation(op, pixel_count);
        match cached {
            Some(Backend::Cpu) => {
                drop(gpu_guard);
                cpu_path()
            }
            Some(Backend::Gpu) => match gpu_path(gpu_exec) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(op = op.name(), "GPU kernel failed, falling back: {err}");
                    drop(gpu_guard);
                    cpu_path()
                }
            },
            None => {
                // First sight of this (op, bucket): time both paths.
                let cpu_start = Instant::now();
                let cpu_value = cpu_path();
                let cpu_time_us = cpu_start.elapsed().as_secs_f64() * 1e6;

                let gpu_start = Instant::now();
                match gpu_path(gpu_exec) {
                    Ok(gpu_value) => {
                        let gpu_time_us = gpu_start.elapsed().as_secs_f64() * 1e6;
                        let record =
                            BenchmarkRecord::new(op, cpu_time_us, gpu_time_us, pixel_count);
                        let use_gpu = record.recommendation == Backend::Gpu;
                        tracing::debug!(
                            op = op.name(),
                            cpu_us = cpu_time_us,
                            gpu_us = gpu_time_us,
                            speedup = record.speedup,
                            "kernel benchmarked"
                        );
                        self.bench.lock().record(record);
                        if use_gpu {
                            gpu_value
                        } else {
                            cpu_value
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            op = op.name(),
                            "GPU kernel failed during benchmark, pinning CPU: {err}"
                        );
                        self.bench.lock().pin(op, pixel_count, Backend::Cpu);
                        cpu_value
                    }
                }
            }
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::checkerboard_buffer;

    #[test]
    fn test_cpu_only_dispatch_runs_cpu() {
        let ctx = ExecutionContext::cpu_only();
        assert!(!ctx.gpu_available());

        let buffer = checkerboard_buffer(32, 32, 4);
        let map = ctx.laplacian_map(buffer.luma());
        assert_eq!(map.len(), 32 * 32);
        // CPU-only dispatch never benchmarks.
        assert!(ctx.benchmark_history().is_empty());
    }

    #[test]
    fn test_benchmark_export_import() {
        let ctx = ExecutionContext::cpu_only();
        ctx.import_benchmarks(
            &serde_json::to_string(&vec![BenchmarkRecord::new(
                KernelOp::Laplacian,
                200.0,
                40.0,
                1 << 20,
            )])
            .unwrap(),
        )
        .unwrap();

        let history = ctx.benchmark_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, KernelOp::Laplacian);

        let json = ctx.export_benchmarks().unwrap();
        assert!(json.contains("laplacian") || json.contains("Laplacian"));
    }

    #[test]
    fn test_ring_profile_dispatch() {
        let ctx = ExecutionContext::cpu_only();
        let buffer = checkerboard_buffer(40, 40, 8);
        let profile = ctx.ring_profile(buffer.luma(), 8);
        assert_eq!(profile.len(), 8);
    }
}

//! GPU-shader-equivalent kernel implementations.
//!
//! One WGSL compute shader per kernel operation, all sharing a single bind
//! group layout (uniform params, luminance plane, packed RGBA samples,
//! output). Per-pixel maps are computed on the GPU and reduced on the CPU.
//!
//! Device buffers are pooled: a bounded number of sized entries are reused
//! across dispatches, resized least-recently-used first, and evictable by
//! idle time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use pollster::FutureExt;
use wgpu::util::DeviceExt;

use crate::error::AnalysisError;

use super::KernelOp;

/// Maximum pooled buffer sets kept alive at once.
const MAX_POOL_ENTRIES: usize = 4;

/// Workgroup edge for 2D map kernels.
const WORKGROUP_DIM: u32 = 16;

/// Uniform parameter block shared by all kernel shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub ring_count: u32,
    pub harris_k: f32,
    pub edge_threshold: f32,
    pub period: u32,
    pub _pad: u32,
}

impl KernelParams {
    pub fn for_size(width: usize, height: usize) -> Self {
        Self {
            width: width as u32,
            height: height as u32,
            block_size: 8,
            ring_count: 8,
            harris_k: 0.04,
            edge_threshold: 0.1,
            period: 8,
            _pad: 0,
        }
    }
}

/// Compiled compute pipeline for one kernel operation.
#[derive(Debug)]
struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
}

/// Pooled device buffers sized for one image.
#[derive(Debug)]
struct PooledBuffers {
    luma_capacity: u64,
    rgba_capacity: u64,
    output_capacity: u64,
    luma: wgpu::Buffer,
    rgba: wgpu::Buffer,
    output: wgpu::Buffer,
    staging: wgpu::Buffer,
    last_used: Instant,
}

/// GPU kernel executor: device, per-operation pipelines, pooled buffers.
#[derive(Debug)]
pub struct GpuExecutor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<KernelOp, KernelPipeline>,
    pool: Vec<PooledBuffers>,
}

impl GpuExecutor {
    /// Request an adapter and device. Fails cleanly when no usable GPU is
    /// present; callers fall back to the CPU path.
    pub fn new() -> Result<Self, AnalysisError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .block_on()
            .ok_or_else(|| AnalysisError::Kernel("no suitable GPU adapter".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("skylens_kernel_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .block_on()
            .map_err(|e| AnalysisError::Kernel(format!("device request failed: {e}")))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kernel_bind_group_layout"),
            entries: &[
                // Params uniform buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Luminance plane (read-only)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Packed RGBA samples (read-only)
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Output map (read-write)
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        tracing::info!("GPU kernel executor initialized");

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipelines: HashMap::new(),
            pool: Vec::new(),
        })
    }

    fn shader_source(op: KernelOp) -> &'static str {
        match op {
            KernelOp::Laplacian => include_str!("shaders/laplacian.wgsl"),
            KernelOp::HarrisResponse => include_str!("shaders/harris.wgsl"),
            KernelOp::BlockVariance => include_str!("shaders/block_variance.wgsl"),
            KernelOp::BlockingMap => include_str!("shaders/blocking.wgsl"),
            KernelOp::AberrationMap => include_str!("shaders/aberration.wgsl"),
            KernelOp::VignettingMap => include_str!("shaders/vignetting.wgsl"),
        }
    }

    fn ensure_pipeline(&mut self, op: KernelOp) {
        if self.pipelines.contains_key(&op) {
            return;
        }

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(op.name()),
                source: wgpu::ShaderSource::Wgsl(Self::shader_source(op).into()),
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(op.name()),
                bind_group_layouts: &[&self.bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(op.name()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        self.pipelines.insert(op, KernelPipeline { pipeline });
    }

    /// Find or create a pooled buffer set with at least the requested
    /// capacities. When the pool is full, the least-recently-used entry is
    /// resized instead of growing the pool.
    fn acquire_buffers(&mut self, luma_bytes: u64, rgba_bytes: u64, output_bytes: u64) -> usize {
        if let Some(idx) = self.pool.iter().position(|entry| {
            entry.luma_capacity >= luma_bytes
                && entry.rgba_capacity >= rgba_bytes
                && entry.output_capacity >= output_bytes
        }) {
            self.pool[idx].last_used = Instant::now();
            return idx;
        }

        let entry = self.create_buffers(luma_bytes, rgba_bytes, output_bytes);
        if self.pool.len() < MAX_POOL_ENTRIES {
            self.pool.push(entry);
            return self.pool.len() - 1;
        }

        // Resize the least-recently-used entry.
        let lru = self
            .pool
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(i, _)| i)
            .unwrap_or(0);
        tracing::debug!(slot = lru, "resizing LRU GPU buffer pool entry");
        self.pool[lru] = entry;
        lru
    }

    fn create_buffers(&self, luma_bytes: u64, rgba_bytes: u64, output_bytes: u64) -> PooledBuffers {
        let luma = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_luma_buffer"),
            size: luma_bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let rgba = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_rgba_buffer"),
            size: rgba_bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_output_buffer"),
            size: output_bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_staging_buffer"),
            size: output_bytes.max(4),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        PooledBuffers {
            luma_capacity: luma_bytes.max(4),
            rgba_capacity: rgba_bytes.max(4),
            output_capacity: output_bytes.max(4),
            luma,
            rgba,
            output,
            staging,
            last_used: Instant::now(),
        }
    }

    /// Drop pooled buffer sets idle for longer than `max_idle`.
    pub fn evict_idle(&mut self, max_idle: Duration) {
        let before = self.pool.len();
        let now = Instant::now();
        self.pool
            .retain(|entry| now.duration_since(entry.last_used) <= max_idle);
        let evicted = before - self.pool.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle GPU buffer pool entries");
        }
    }

    pub fn pooled_entries(&self) -> usize {
        self.pool.len()
    }

    /// Run a kernel and read back its output map.
    ///
    /// `output_len` is the number of f32 values the operation produces
    /// (w*h for map kernels, block-grid size for block variance,
    /// 2*ring_count for the radial profile).
    pub fn run(
        &mut self,
        op: KernelOp,
        params: KernelParams,
        luma: &[f32],
        rgba: Option<&[u8]>,
        output_len: usize,
    ) -> Result<Vec<f32>, AnalysisError> {
        self.ensure_pipeline(op);

        let luma_bytes = std::mem::size_of_val(luma) as u64;
        let rgba_bytes = rgba.map_or(4, |r| r.len() as u64);
        let output_bytes = (output_len * std::mem::size_of::<f32>()) as u64;

        let slot = self.acquire_buffers(luma_bytes, rgba_bytes, output_bytes);

        self.queue
            .write_buffer(&self.pool[slot].luma, 0, bytemuck::cast_slice(luma));
        if let Some(rgba) = rgba {
            self.queue.write_buffer(&self.pool[slot].rgba, 0, rgba);
        }

        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_params_buffer"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let entry = &self.pool[slot];
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(op.name()),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: entry.luma.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: entry.rgba.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: entry.output.as_entire_binding(),
                },
            ],
        });

        let pipeline = &self.pipelines[&op].pipeline;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(op.name()),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(op.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);

            let (wx, wy) = dispatch_size(op, &params);
            pass.dispatch_workgroups(wx, wy, 1);
        }

        encoder.copy_buffer_to_buffer(&entry.output, 0, &entry.staging, 0, output_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = entry.staging.slice(..output_bytes);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| AnalysisError::Kernel("GPU readback channel closed".to_string()))?
            .map_err(|e| AnalysisError::Kernel(format!("buffer map failed: {e}")))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        entry.staging.unmap();

        Ok(result)
    }
}

/// Workgroup grid for an operation.
fn dispatch_size(op: KernelOp, params: &KernelParams) -> (u32, u32) {
    match op {
        KernelOp::BlockVariance => {
            let bw = params.width / params.block_size;
            let bh = params.height / params.block_size;
            (bw.div_ceil(WORKGROUP_DIM), bh.div_ceil(WORKGROUP_DIM))
        }
        KernelOp::VignettingMap => (params.ring_count, 1),
        _ => (
            params.width.div_ceil(WORKGROUP_DIM),
            params.height.div_ceil(WORKGROUP_DIM),
        ),
    }
}

//! Bounded-concurrency analysis scheduler.
//!
//! A fixed pool of tokio workers drains a FIFO queue of encoded images.
//! Each worker decodes under a wall-clock budget, runs the analysis
//! pipeline on the blocking pool, and reports stage boundaries through
//! the progress callback. A task failure is contained to its own
//! result; the pool keeps draining.

pub mod progress;
pub mod task;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::analyze;
use crate::config::AnalysisConfig;
use crate::kernels::ExecutionContext;
use crate::loader::{self, LoadOptions, DEFAULT_DECODE_BUDGET_MS};

pub use progress::{AnalysisStage, CompletionCallback, ProgressCallback, ProgressUpdate};
pub use task::{AnalysisResult, AnalysisTask, TaskId};

/// Scheduler construction parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on concurrent workers. The effective pool size is
    /// `min(available_parallelism, max_workers)`.
    pub max_workers: usize,
    /// Wall-clock budget for decoding one image.
    pub decode_budget_ms: u64,
    pub analysis: AnalysisConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            decode_budget_ms: DEFAULT_DECODE_BUDGET_MS,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) {
        assert!(self.max_workers > 0, "max_workers must be > 0");
        assert!(self.decode_budget_ms > 0, "decode_budget_ms must be > 0");
        self.analysis.validate();
    }
}

struct SchedulerInner {
    queue: Mutex<VecDeque<AnalysisTask>>,
    notify: Notify,
    shutdown: AtomicBool,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    ctx: Arc<ExecutionContext>,
    config: SchedulerConfig,
    progress: ProgressCallback,
    completion: CompletionCallback,
}

/// Analysis scheduler. Create with [`Scheduler::new`], submit tasks,
/// then call [`Scheduler::shutdown`] to drain and join the pool.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        ctx: Arc<ExecutionContext>,
        progress: ProgressCallback,
        completion: CompletionCallback,
    ) -> Self {
        config.validate();

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let worker_count = parallelism.min(config.max_workers);

        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            ctx,
            config,
            progress,
            completion,
        });

        let workers = (0..worker_count)
            .map(|worker_idx| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    worker_loop(worker_idx, inner).await;
                })
            })
            .collect();

        debug!(workers = worker_count, "scheduler started");

        Self {
            inner,
            workers,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue an image for analysis. Returns the assigned task id.
    pub fn submit(&self, source: impl Into<String>, bytes: Vec<u8>) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = AnalysisTask {
            id,
            source: source.into(),
            bytes,
        };
        self.emit_progress(ProgressUpdate::new(id, AnalysisStage::Queued));
        self.inner.queue.lock().push_back(task);
        self.inner.notify.notify_one();
        id
    }

    /// Drop every queued (not yet started) task. Running tasks finish
    /// normally. Returns the dropped task ids.
    pub fn clear_pending(&self) -> Vec<TaskId> {
        let dropped: Vec<TaskId> = self.inner.queue.lock().drain(..).map(|t| t.id).collect();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "cleared pending tasks");
        }
        dropped
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Highest number of simultaneously running tasks observed.
    pub fn peak_running(&self) -> usize {
        self.inner.peak_running.load(Ordering::Relaxed)
    }

    /// Drain the queue and join the worker pool.
    pub async fn shutdown(mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("scheduler worker panicked: {e}");
            }
        }
    }

    fn emit_progress(&self, update: ProgressUpdate) {
        if let Some(cb) = self.inner.progress.as_ref() {
            cb(update);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!("scheduler dropped with live workers; call Scheduler::shutdown() first");
        }
    }
}

async fn worker_loop(worker_idx: usize, inner: Arc<SchedulerInner>) {
    loop {
        let notified = inner.notify.notified();
        let task = inner.queue.lock().pop_front();
        match task {
            Some(task) => {
                process_task(&inner, task).await;
            }
            None => {
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        }
    }
    debug!(worker = worker_idx, "scheduler worker exited");
}

async fn process_task(inner: &Arc<SchedulerInner>, task: AnalysisTask) {
    let running = inner.running.fetch_add(1, Ordering::SeqCst) + 1;
    inner.peak_running.fetch_max(running, Ordering::SeqCst);

    let result = run_task(inner, task).await;

    inner.running.fetch_sub(1, Ordering::SeqCst);

    let stage = if result.is_failed() {
        AnalysisStage::Failed
    } else {
        AnalysisStage::Completed
    };
    emit(inner, ProgressUpdate::new(result.task_id, stage));
    if let Some(cb) = inner.completion.as_ref() {
        cb(result);
    }
}

async fn run_task(inner: &Arc<SchedulerInner>, task: AnalysisTask) -> AnalysisResult {
    let AnalysisTask { id, source, bytes } = task;
    emit(inner, ProgressUpdate::new(id, AnalysisStage::Loading));

    let options = LoadOptions {
        gpu_available: inner.ctx.gpu_available(),
        ..LoadOptions::default()
    };
    let buffer =
        match loader::decode_with_timeout(bytes, options, inner.config.decode_budget_ms).await {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(task = id, source = %source, "decode failed: {e}");
                return AnalysisResult::failed(id, source, e.to_string());
            }
        };

    let ctx = Arc::clone(&inner.ctx);
    let config = inner.config.analysis.clone();
    let progress = inner.progress.clone();
    let analysis = tokio::task::spawn_blocking(move || {
        analyze::analyze_buffer_staged(&buffer, &config, &ctx, |stage| {
            if let Some(cb) = progress.as_ref() {
                cb(ProgressUpdate::new(id, AnalysisStage::Analyzing(stage)));
            }
        })
    })
    .await;

    match analysis {
        Ok(report) => AnalysisResult::completed(id, source, report),
        Err(e) => {
            warn!(task = id, source = %source, "analysis task panicked: {e}");
            AnalysisResult::failed(id, source, format!("analysis failed: {e}"))
        }
    }
}

fn emit(inner: &Arc<SchedulerInner>, update: ProgressUpdate) {
    if let Some(cb) = inner.progress.as_ref() {
        cb(update);
    }
}

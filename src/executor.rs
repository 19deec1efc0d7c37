//! Runs a reconstruction end to end: preprocessing, partitioning, the cores
//! (serially or on a worker pool), merging and completion notification.

use crate::config::{ExecutionConfig, ReconstructionParams};
use crate::enums::ExecutionMode;
use crate::error::{CoreError, ReconstructionError, TrackingGapWarning};
use crate::input::RawInputData;
use crate::partitioner::{OutputVolumePartitioner, VolumeGeometry};
use crate::preprocessor::{InputPreprocessor, PreprocessedInput};
use crate::reconstruction_core::{CoreId, CoreSettings, ReconstructionCore, VoxelBuffer};
use crate::volume::{BYTES_PER_VOXEL, OutputVolume};

use futures::channel::oneshot;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use web_time::Instant;

/// User facing cancellation flag, shared between the caller and the cores.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the cores poll between frames: the user's cancellation plus the
/// executor's own abort raised when a sibling core fails.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancel: CancelToken,
    abort: CancelToken,
}

impl StopSignal {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            abort: CancelToken::new(),
        }
    }

    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    fn abort(&self) {
        self.abort.cancel();
    }
}

/// Notifications emitted during a run. All methods may be called from
/// worker threads.
pub trait ReconstructionObserver: Send + Sync {
    fn core_started(&self, _core: CoreId) {}

    /// Fraction of frame contributions processed, in `[0, 1]`.
    fn progress(&self, _fraction: f32) {}

    /// Called exactly once per started run.
    fn finished(&self, _outcome: &ReconstructionOutcome) {}
}

pub struct NoopObserver;

impl ReconstructionObserver for NoopObserver {}

/// Logs progress in ten percent steps and the final outcome.
#[derive(Default)]
pub struct TracingObserver {
    last_decile: AtomicUsize,
}

impl ReconstructionObserver for TracingObserver {
    fn core_started(&self, core: CoreId) {
        debug!("Core {core} started");
    }

    fn progress(&self, fraction: f32) {
        let decile = (fraction * 10.0).floor() as usize;
        if self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!("Reconstruction {:.0}% done", fraction * 100.0);
        }
    }

    fn finished(&self, outcome: &ReconstructionOutcome) {
        self.last_decile.store(0, Ordering::Relaxed);
        match outcome {
            ReconstructionOutcome::Completed(output) => info!(
                "Reconstruction finished: {:?} voxels in {:.2?}",
                output.bmode.dim(),
                output.stats.elapsed
            ),
            ReconstructionOutcome::Failed(reason) => warn!("Reconstruction failed: {reason}"),
            ReconstructionOutcome::Cancelled => info!("Reconstruction cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconstructionOutcome {
    Completed(Arc<ReconstructionOutput>),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub cores: usize,
    pub parallel: bool,
    pub valid_frames: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconstructionOutput {
    pub bmode: OutputVolume,
    pub angio: Option<OutputVolume>,
    /// Frames left out because of missing or unreliable tracking.
    pub warnings: Vec<TrackingGapWarning>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    BMode,
    Angio,
}

struct Job {
    stream: Stream,
    core: ReconstructionCore,
}

/// A validated run whose cores exist but have not been started.
pub struct PreparedRun {
    input: PreprocessedInput,
    geometry: VolumeGeometry,
    jobs: Vec<Job>,
    parallel: bool,
    threads: usize,
    hole_fill_radius: usize,
}

impl PreparedRun {
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn core_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn total_frame_work(&self) -> usize {
        self.jobs.iter().map(|job| job.core.input().valid_frame_count()).sum()
    }
}

struct Progress {
    done: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    fn new() -> Self {
        Self {
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.done.load(Ordering::Relaxed) as f32 / total as f32).min(1.0)
    }
}

pub struct ReconstructionExecutor {
    observer: Arc<dyn ReconstructionObserver>,
}

impl Default for ReconstructionExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopObserver))
    }
}

impl ReconstructionExecutor {
    pub fn new(observer: Arc<dyn ReconstructionObserver>) -> Self {
        Self { observer }
    }

    /// Validate the input and build the cores without starting any thread.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructionError::InvalidInput`] for malformed or
    /// insufficient input.
    pub fn prepare(
        &self,
        raw: &RawInputData,
        params: &ReconstructionParams,
    ) -> Result<PreparedRun, ReconstructionError> {
        let input = InputPreprocessor::process(raw, params)?;
        let geometry = OutputVolumePartitioner::compute_geometry(&input.bmode)?;
        let regions = OutputVolumePartitioner::partition(&geometry, params.execution.core_count());

        let settings = CoreSettings {
            compounding: params.compounding,
            kernel_radius_mm: params.kernel_radius_mm,
        };
        let streams = std::iter::once((Stream::BMode, &input.bmode))
            .chain(input.angio.as_ref().map(|angio| (Stream::Angio, angio)));
        let jobs: Vec<Job> = streams
            .flat_map(|(stream, data)| {
                regions.iter().map(move |region| (stream, data, region))
            })
            .enumerate()
            .map(|(id, (stream, data, region))| Job {
                stream,
                core: ReconstructionCore::new(id, region.clone(), geometry, Arc::clone(data), settings),
            })
            .collect();

        let stream_count = 1 + usize::from(input.angio.is_some());
        let merge_bytes = Self::merge_memory(&geometry, stream_count);
        let parallel = Self::can_run_parallel(&jobs, merge_bytes, &params.execution);
        let threads = params.execution.max_threads.min(jobs.len()).max(1);
        info!(
            "Prepared {} core(s) over {} slab(s), {} execution",
            jobs.len(),
            regions.len(),
            if parallel {
                format!("parallel on {threads} thread(s)")
            } else {
                "serial".to_string()
            }
        );

        Ok(PreparedRun {
            input,
            geometry,
            jobs,
            parallel,
            threads,
            hole_fill_radius: params.hole_fill_radius,
        })
    }

    /// Bytes held while merging: the output volumes plus the finished slabs
    /// waiting to be placed, per stream.
    fn merge_memory(geometry: &VolumeGeometry, streams: usize) -> u64 {
        (geometry.voxel_count() as u64)
            .saturating_mul(streams as u64)
            .saturating_mul(2 * BYTES_PER_VOXEL)
    }

    /// Parallel only if the working buffers of the cores that would run at the
    /// same time, together with the merge buffers, fit into the memory budget.
    fn can_run_parallel(jobs: &[Job], merge_bytes: u64, execution: &ExecutionConfig) -> bool {
        match execution.mode {
            ExecutionMode::Serial => false,
            ExecutionMode::Parallel => true,
            ExecutionMode::Auto => {
                if execution.max_threads <= 1 || jobs.len() <= 1 {
                    return false;
                }
                let Some(budget) = execution.memory_budget_bytes else {
                    return true;
                };
                let mut footprints: Vec<u64> = jobs.iter().map(|job| job.core.estimated_memory()).collect();
                footprints.sort_unstable_by(|a, b| b.cmp(a));
                let peak = footprints
                    .iter()
                    .take(execution.max_threads)
                    .fold(merge_bytes, |sum, &bytes| sum.saturating_add(bytes));
                debug!("Peak parallel footprint {peak} bytes ({merge_bytes} for merging), budget {budget} bytes");
                peak <= budget
            }
        }
    }

    /// Preprocess, reconstruct and merge on the calling thread.
    pub fn run_blocking(
        &self,
        raw: &RawInputData,
        params: &ReconstructionParams,
        cancel: CancelToken,
    ) -> Result<Arc<ReconstructionOutput>, ReconstructionError> {
        let prepared = self.prepare(raw, params)?;
        let result = self.execute(prepared, &cancel, &Progress::new());
        self.notify_finished(&result);
        result
    }

    /// Validate synchronously, then reconstruct on a background thread.
    ///
    /// # Errors
    ///
    /// Input errors are returned here, before any worker thread exists.
    pub fn start(
        &self,
        raw: &RawInputData,
        params: &ReconstructionParams,
        cancel: CancelToken,
    ) -> Result<ReconstructionHandle, ReconstructionError> {
        let prepared = self.prepare(raw, params)?;
        let progress = Arc::new(Progress::new());
        let (sender, receiver) = oneshot::channel();

        let executor = ReconstructionExecutor {
            observer: Arc::clone(&self.observer),
        };
        let thread_cancel = cancel.clone();
        let thread_progress = Arc::clone(&progress);
        let thread = thread::Builder::new()
            .name("us-reconstruction".into())
            .spawn(move || {
                let result = executor.execute(prepared, &thread_cancel, &thread_progress);
                executor.notify_finished(&result);
                let _ = sender.send(result);
            })
            .map_err(ReconstructionError::Spawn)?;

        Ok(ReconstructionHandle {
            cancel,
            progress,
            receiver: Some(receiver),
            thread: Some(thread),
        })
    }

    fn notify_finished(&self, result: &Result<Arc<ReconstructionOutput>, ReconstructionError>) {
        let outcome = match result {
            Ok(output) => ReconstructionOutcome::Completed(Arc::clone(output)),
            Err(ReconstructionError::Cancelled) => ReconstructionOutcome::Cancelled,
            Err(e) => ReconstructionOutcome::Failed(e.to_string()),
        };
        self.observer.finished(&outcome);
    }

    fn execute(
        &self,
        prepared: PreparedRun,
        cancel: &CancelToken,
        progress: &Progress,
    ) -> Result<Arc<ReconstructionOutput>, ReconstructionError> {
        let started = Instant::now();
        progress.total.store(prepared.total_frame_work(), Ordering::Relaxed);

        let PreparedRun {
            input,
            geometry,
            mut jobs,
            parallel,
            threads,
            hole_fill_radius,
        } = prepared;
        let stop = StopSignal::new(cancel.clone());

        let results: Vec<Result<VoxelBuffer, CoreError>> = if parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("recon-core-{i}"))
                .build()?;
            pool.install(|| {
                jobs.par_iter_mut()
                    .map(|job| self.run_job(job, &stop, progress))
                    .collect()
            })
        } else {
            let mut results = Vec::with_capacity(jobs.len());
            for job in &mut jobs {
                let result = self.run_job(job, &stop, progress);
                let failed = result.is_err();
                results.push(result);
                if failed {
                    break;
                }
            }
            results
        };

        if cancel.is_cancelled() {
            info!("Reconstruction cancelled, discarding partial results");
            return Err(ReconstructionError::Cancelled);
        }

        let failures: Vec<(CoreId, &CoreError)> = results
            .iter()
            .zip(&jobs)
            .filter_map(|(result, job)| match result {
                Err(e) if *e != CoreError::Cancelled => Some((job.core.id(), e)),
                _ => None,
            })
            .collect();
        if let Some(&(core, error)) = failures.first() {
            return Err(ReconstructionError::CoreExecution {
                core,
                failed_cores: failures.len(),
                reason: error.to_string(),
            });
        }

        let mut bmode = OutputVolume::new(&geometry)?;
        let mut angio = input
            .angio
            .as_ref()
            .map(|_| OutputVolume::new(&geometry))
            .transpose()?;
        for (result, job) in results.into_iter().zip(&jobs) {
            // Only sibling aborts are left, and those imply a failure above.
            let buffer = result.map_err(|_| ReconstructionError::Cancelled)?;
            match (job.stream, angio.as_mut()) {
                (Stream::Angio, Some(angio)) => angio.place(&buffer),
                _ => bmode.place(&buffer),
            }
        }

        if hole_fill_radius > 0 {
            let filled = bmode.fill_holes(hole_fill_radius);
            debug!("Filled {filled} empty voxels");
            if let Some(angio) = angio.as_mut() {
                angio.fill_holes(hole_fill_radius);
            }
        }

        let stats = RunStats {
            cores: jobs.len(),
            parallel,
            valid_frames: input.bmode.valid_frame_count(),
            elapsed: started.elapsed(),
        };
        info!(
            "Reconstructed {:?} voxels ({} covered) from {} frames in {:.2?}",
            bmode.dim(),
            bmode.covered_voxels(),
            stats.valid_frames,
            stats.elapsed
        );

        Ok(Arc::new(ReconstructionOutput {
            bmode,
            angio,
            warnings: input.warnings,
            stats,
        }))
    }

    fn run_job(&self, job: &mut Job, stop: &StopSignal, progress: &Progress) -> Result<VoxelBuffer, CoreError> {
        let on_frame_done = || {
            let done = progress.done.fetch_add(1, Ordering::Relaxed) + 1;
            let total = progress.total.load(Ordering::Relaxed).max(1);
            self.observer.progress((done as f32 / total as f32).min(1.0));
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.observer.core_started(job.core.id());
            job.core.run(stop, &on_frame_done)
        }))
        .unwrap_or_else(|payload| Err(CoreError::Panicked(panic_message(payload.as_ref()))));

        if let Err(e) = &result {
            if *e != CoreError::Cancelled {
                warn!("Core {} failed: {e}", job.core.id());
                stop.abort();
            }
        }
        result
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A reconstruction running on its own thread.
pub struct ReconstructionHandle {
    cancel: CancelToken,
    progress: Arc<Progress>,
    /// `None` once the result has been claimed.
    receiver: Option<oneshot::Receiver<Result<Arc<ReconstructionOutput>, ReconstructionError>>>,
    thread: Option<JoinHandle<()>>,
}

impl ReconstructionHandle {
    /// Ask the cores to stop at their next frame.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> f32 {
        self.progress.fraction()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Resolves once the run completed, failed or was cancelled.
    pub async fn finished(mut self) -> Result<Arc<ReconstructionOutput>, ReconstructionError> {
        let receiver = self.receiver.take().ok_or(ReconstructionError::Disconnected)?;
        let result = receiver.await.unwrap_or(Err(ReconstructionError::Disconnected));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }

    pub fn wait(self) -> Result<Arc<ReconstructionOutput>, ReconstructionError> {
        futures::executor::block_on(self.finished())
    }
}

impl Drop for ReconstructionHandle {
    /// A handle dropped before its result was claimed cancels the run.
    fn drop(&mut self) {
        if self.receiver.is_some() && !self.is_finished() {
            debug!("Reconstruction handle dropped, cancelling the run");
            self.cancel.cancel();
        }
    }
}

/// Reconstruction service for one client (GUI, CLI, ...), replacing global
/// managers: the observer is injected and the state lives with the session.
pub struct ReconstructionSession {
    executor: ReconstructionExecutor,
    current: Option<ReconstructionHandle>,
    result: Option<Arc<ReconstructionOutput>>,
}

impl ReconstructionSession {
    pub fn new(observer: Arc<dyn ReconstructionObserver>) -> Self {
        Self {
            executor: ReconstructionExecutor::new(observer),
            current: None,
            result: None,
        }
    }

    /// Start a run in the background. The previous result is dropped.
    ///
    /// # Errors
    ///
    /// [`ReconstructionError::Busy`] while another run is in flight, or any
    /// input validation error.
    pub fn start_reconstruction(
        &mut self,
        raw: &RawInputData,
        params: &ReconstructionParams,
    ) -> Result<(), ReconstructionError> {
        if self.is_running() {
            return Err(ReconstructionError::Busy);
        }
        self.current = None;
        self.result = None;
        self.current = Some(self.executor.start(raw, params, CancelToken::new())?);
        Ok(())
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.current {
            handle.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn progress(&self) -> f32 {
        match (&self.current, &self.result) {
            (Some(handle), _) => handle.progress(),
            (None, Some(_)) => 1.0,
            (None, None) => 0.0,
        }
    }

    /// Block until the current run ends and keep its result.
    pub fn wait(&mut self) -> Result<Arc<ReconstructionOutput>, ReconstructionError> {
        let handle = self
            .current
            .take()
            .ok_or_else(|| ReconstructionError::invalid_input("no reconstruction started"))?;
        let output = handle.wait()?;
        self.result = Some(Arc::clone(&output));
        Ok(output)
    }

    /// Result of the last completed run; `None` after failure or cancellation.
    pub fn result(&self) -> Option<Arc<ReconstructionOutput>> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MEMORY_BUDGET_BYTES, ExecutionConfig};
    use crate::partitioner::Bounds;
    use crate::synthetic::{SweepConfig, linear_sweep};

    fn params(mode: ExecutionMode, budget: Option<u64>) -> ReconstructionParams {
        ReconstructionParams {
            execution: ExecutionConfig {
                max_threads: 4,
                cores: Some(4),
                memory_budget_bytes: budget,
                mode,
            },
            ..Default::default()
        }
    }

    #[test]
    fn memory_budget_forces_serial_execution() {
        let raw = linear_sweep(&SweepConfig::default());
        let executor = ReconstructionExecutor::default();

        let unlimited = executor.prepare(&raw, &params(ExecutionMode::Auto, None)).unwrap();
        assert!(unlimited.is_parallel());

        let tight = executor.prepare(&raw, &params(ExecutionMode::Auto, Some(16))).unwrap();
        assert!(!tight.is_parallel());
        assert_eq!(tight.core_count(), 4);

        let forced = executor.prepare(&raw, &params(ExecutionMode::Parallel, Some(16))).unwrap();
        assert!(forced.is_parallel());
    }

    #[test]
    fn default_budget_decides_auto_mode() {
        let raw = linear_sweep(&SweepConfig::default());
        let params = ReconstructionParams {
            execution: ExecutionConfig {
                max_threads: 4,
                cores: Some(4),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(params.execution.memory_budget_bytes.is_some());
        let prepared = ReconstructionExecutor::default().prepare(&raw, &params).unwrap();
        assert!(prepared.is_parallel());
    }

    #[test]
    fn merge_buffers_count_against_the_budget() {
        let raw = linear_sweep(&SweepConfig::default());
        let executor = ReconstructionExecutor::default();
        let unlimited = executor.prepare(&raw, &params(ExecutionMode::Auto, None)).unwrap();
        let voxels = unlimited.geometry().voxel_count() as u64;
        let settings = CoreSettings {
            compounding: Default::default(),
            kernel_radius_mm: 0.0,
        };
        let cores_only = voxels * settings.bytes_per_voxel();
        let merge = ReconstructionExecutor::merge_memory(unlimited.geometry(), 1);
        assert_eq!(merge, voxels * 2 * BYTES_PER_VOXEL);

        let cores_fit = executor
            .prepare(&raw, &params(ExecutionMode::Auto, Some(cores_only + merge / 2)))
            .unwrap();
        assert!(!cores_fit.is_parallel());

        let all_fit = executor
            .prepare(&raw, &params(ExecutionMode::Auto, Some(cores_only + merge)))
            .unwrap();
        assert!(all_fit.is_parallel());
    }

    #[test]
    fn huge_explicit_bounds_are_coarsened_or_rejected() {
        let raw = linear_sweep(&SweepConfig::default());
        let mut params = ReconstructionParams {
            explicit_bounds: Some(Bounds::new([0.0; 3], [1.0e6; 3])),
            output_spacing_mm: Some(0.001),
            max_output_voxels: Some(1_000_000),
            ..params(ExecutionMode::Auto, Some(DEFAULT_MEMORY_BUDGET_BYTES))
        };
        assert!(params.validate().is_ok());
        let prepared = ReconstructionExecutor::default().prepare(&raw, &params).unwrap();
        assert!(prepared.geometry().voxel_count() <= 1_000_000);

        params.max_output_voxels = None;
        assert!(matches!(
            ReconstructionExecutor::default().prepare(&raw, &params),
            Err(ReconstructionError::InvalidInput(_))
        ));
    }

    #[test]
    fn tracing_observer_restarts_progress_per_run() {
        let observer = TracingObserver::default();
        observer.progress(0.55);
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 5);
        observer.finished(&ReconstructionOutcome::Cancelled);
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 0);
        observer.progress(0.1);
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn serial_and_parallel_runs_agree() {
        let raw = linear_sweep(&SweepConfig::default());
        let executor = ReconstructionExecutor::default();
        let serial = executor
            .run_blocking(&raw, &params(ExecutionMode::Serial, None), CancelToken::new())
            .unwrap();
        let parallel = executor
            .run_blocking(&raw, &params(ExecutionMode::Parallel, None), CancelToken::new())
            .unwrap();
        assert!(!serial.stats.parallel);
        assert!(parallel.stats.parallel);
        assert_eq!(serial.bmode, parallel.bmode);
    }

    #[test]
    fn cancelled_token_discards_result() {
        let raw = linear_sweep(&SweepConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = ReconstructionExecutor::default().run_blocking(&raw, &params(ExecutionMode::Auto, None), cancel);
        assert!(matches!(result, Err(ReconstructionError::Cancelled)));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn progress_fraction_is_bounded() {
        let progress = Progress::new();
        assert_eq!(progress.fraction(), 0.0);
        progress.total.store(4, Ordering::Relaxed);
        progress.done.store(2, Ordering::Relaxed);
        assert_eq!(progress.fraction(), 0.5);
        progress.done.store(9, Ordering::Relaxed);
        assert_eq!(progress.fraction(), 1.0);
    }
}

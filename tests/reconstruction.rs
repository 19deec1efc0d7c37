use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::Vector3;
use us_reconstruction::enums::{Compounding, ExecutionMode};
use us_reconstruction::executor::CancelToken;
use us_reconstruction::reconstruction_core::CoreId;
use us_reconstruction::synthetic::{SweepConfig, linear_sweep};
use us_reconstruction::{
    ExecutionConfig, Frame, ProbeDefinition, RawInputData, ReconstructionError,
    ReconstructionExecutor, ReconstructionObserver, ReconstructionOutcome, ReconstructionParams,
    ReconstructionSession, RigidTransform, TimestampedTransform,
};

#[derive(Default)]
struct Recorder {
    started: Mutex<Vec<CoreId>>,
    outcomes: Mutex<Vec<String>>,
    finished_calls: AtomicUsize,
    cancel_on_start: Option<CancelToken>,
    panic_on_core: Option<CoreId>,
}

impl ReconstructionObserver for Recorder {
    fn core_started(&self, core: CoreId) {
        self.started.lock().unwrap().push(core);
        if let Some(token) = &self.cancel_on_start {
            token.cancel();
        }
        if self.panic_on_core == Some(core) {
            panic!("injected failure in core {core}");
        }
    }

    fn finished(&self, outcome: &ReconstructionOutcome) {
        self.finished_calls.fetch_add(1, Ordering::SeqCst);
        let label = match outcome {
            ReconstructionOutcome::Completed(_) => "completed",
            ReconstructionOutcome::Failed(_) => "failed",
            ReconstructionOutcome::Cancelled => "cancelled",
        };
        self.outcomes.lock().unwrap().push(label.to_string());
    }
}

fn params(cores: usize, mode: ExecutionMode) -> ReconstructionParams {
    ReconstructionParams {
        execution: ExecutionConfig {
            max_threads: cores,
            cores: Some(cores),
            memory_budget_bytes: None,
            mode,
        },
        ..Default::default()
    }
}

/// Two uniform 4x4 frames 10mm apart with tracking exactly at the frame times.
fn two_frame_sweep() -> RawInputData {
    let frames = vec![
        Frame::gray(0.0, GrayImage::from_pixel(4, 4, Luma([200]))),
        Frame::gray(1.0, GrayImage::from_pixel(4, 4, Luma([200]))),
    ];
    let tracking = vec![
        TimestampedTransform::new(0.0, RigidTransform::identity()),
        TimestampedTransform::new(1.0, RigidTransform::from_translation(0.0, 0.0, 10.0)),
    ];
    RawInputData::new("two frames", frames, tracking, ProbeDefinition::new((4, 4), (1.0, 1.0)))
}

#[test]
fn two_frames_fill_their_footprints() {
    let executor = ReconstructionExecutor::default();
    let output = executor
        .run_blocking(&two_frame_sweep(), &params(4, ExecutionMode::Auto), CancelToken::new())
        .unwrap();

    let volume = &output.bmode;
    assert_eq!(volume.dim(), (11, 4, 4));
    assert!(output.warnings.is_empty());
    for ((z, _, _), &value) in volume.data().indexed_iter() {
        let expected = if z == 0 || z == 10 { 200 } else { 0 };
        assert_eq!(value, expected, "voxel at slice {z}");
    }
    assert_eq!(volume.covered_voxels(), 32);
}

#[test]
fn cancelling_from_a_core_discards_the_result() {
    let cancel = CancelToken::new();
    let recorder = Arc::new(Recorder {
        cancel_on_start: Some(cancel.clone()),
        ..Default::default()
    });
    let executor = ReconstructionExecutor::new(recorder.clone());
    let handle = executor
        .start(&linear_sweep(&SweepConfig::default()), &params(4, ExecutionMode::Auto), cancel)
        .unwrap();

    assert!(matches!(handle.wait(), Err(ReconstructionError::Cancelled)));
    assert_eq!(recorder.finished_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.outcomes.lock().unwrap(), vec!["cancelled"]);
}

/// Holds the first core until the test has requested cancellation.
struct Gate {
    release: Mutex<mpsc::Receiver<()>>,
    finished_calls: AtomicUsize,
}

impl ReconstructionObserver for Gate {
    fn core_started(&self, _core: CoreId) {
        let _ = self.release.lock().unwrap().recv();
    }

    fn finished(&self, outcome: &ReconstructionOutcome) {
        assert!(!matches!(outcome, ReconstructionOutcome::Completed(_)));
        self.finished_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn session_cancel_leaves_no_result() {
    let (release, gate) = mpsc::channel();
    let observer = Arc::new(Gate {
        release: Mutex::new(gate),
        finished_calls: AtomicUsize::new(0),
    });
    let mut session = ReconstructionSession::new(observer.clone());

    session
        .start_reconstruction(&linear_sweep(&SweepConfig::default()), &params(2, ExecutionMode::Parallel))
        .unwrap();
    assert!(session.is_running());
    assert!(matches!(
        session.start_reconstruction(&linear_sweep(&SweepConfig::default()), &params(2, ExecutionMode::Parallel)),
        Err(ReconstructionError::Busy)
    ));

    session.cancel();
    release.send(()).unwrap();
    drop(release);

    assert!(matches!(session.wait(), Err(ReconstructionError::Cancelled)));
    assert!(session.result().is_none());
    assert_eq!(observer.finished_calls.load(Ordering::SeqCst), 1);
}

/// Blocks the first core until released and forwards the outcome.
struct Relay {
    release: Mutex<mpsc::Receiver<()>>,
    outcome: Mutex<mpsc::Sender<&'static str>>,
}

impl ReconstructionObserver for Relay {
    fn core_started(&self, _core: CoreId) {
        let _ = self.release.lock().unwrap().recv();
    }

    fn finished(&self, outcome: &ReconstructionOutcome) {
        let label = match outcome {
            ReconstructionOutcome::Completed(_) => "completed",
            ReconstructionOutcome::Failed(_) => "failed",
            ReconstructionOutcome::Cancelled => "cancelled",
        };
        let _ = self.outcome.lock().unwrap().send(label);
    }
}

#[test]
fn dropping_the_handle_cancels_the_run() {
    let (release, gate) = mpsc::channel();
    let (outcome_tx, outcomes) = mpsc::channel();
    let executor = ReconstructionExecutor::new(Arc::new(Relay {
        release: Mutex::new(gate),
        outcome: Mutex::new(outcome_tx),
    }));

    let handle = executor
        .start(&linear_sweep(&SweepConfig::default()), &params(2, ExecutionMode::Parallel), CancelToken::new())
        .unwrap();
    drop(handle);
    release.send(()).unwrap();
    drop(release);

    assert_eq!(outcomes.recv_timeout(Duration::from_secs(30)), Ok("cancelled"));
}

#[test]
fn session_keeps_the_last_result() {
    let recorder = Arc::new(Recorder::default());
    let mut session = ReconstructionSession::new(recorder.clone());
    assert!(session.result().is_none());

    session
        .start_reconstruction(&linear_sweep(&SweepConfig::default()), &params(3, ExecutionMode::Auto))
        .unwrap();
    let output = session.wait().unwrap();
    assert_eq!(session.progress(), 1.0);
    assert!(Arc::ptr_eq(&output, &session.result().unwrap()));
    assert_eq!(*recorder.outcomes.lock().unwrap(), vec!["completed"]);

    let mut started = recorder.started.lock().unwrap().clone();
    started.sort_unstable();
    assert_eq!(started, vec![0, 1, 2]);
}

#[test]
fn too_few_tracked_frames_fail_before_any_core_starts() {
    let mut raw = linear_sweep(&SweepConfig {
        frame_count: 3,
        ..Default::default()
    });
    let first = raw.frames[0].timestamp;
    raw.tracking = vec![
        TimestampedTransform::new(first - 0.01, RigidTransform::identity()),
        TimestampedTransform::new(first + 0.01, RigidTransform::identity()),
    ];

    let recorder = Arc::new(Recorder::default());
    let mut session = ReconstructionSession::new(recorder.clone());
    let result = session.start_reconstruction(&raw, &params(4, ExecutionMode::Auto));

    assert!(matches!(result, Err(ReconstructionError::InvalidInput(_))));
    assert!(!session.is_running());
    assert!(recorder.started.lock().unwrap().is_empty());
    assert_eq!(recorder.finished_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn serial_and_parallel_are_bit_identical() {
    let raw = linear_sweep(&SweepConfig {
        frame_count: 30,
        tilt_per_frame_rad: 0.01,
        ..Default::default()
    });
    let executor = ReconstructionExecutor::default();
    for compounding in [Compounding::Nearest, Compounding::Average, Compounding::Maximum] {
        let run = |cores, mode| {
            let params = ReconstructionParams {
                compounding,
                kernel_radius_mm: 0.6,
                ..params(cores, mode)
            };
            executor.run_blocking(&raw, &params, CancelToken::new()).unwrap()
        };
        let serial = run(1, ExecutionMode::Serial);
        let parallel = run(4, ExecutionMode::Parallel);
        assert_eq!(serial.bmode, parallel.bmode, "{compounding:?}");
    }
}

#[test]
fn failing_core_is_reported_once() {
    for mode in [ExecutionMode::Serial, ExecutionMode::Parallel] {
        let recorder = Arc::new(Recorder {
            panic_on_core: Some(1),
            ..Default::default()
        });
        let executor = ReconstructionExecutor::new(recorder.clone());
        let result = executor
            .start(&linear_sweep(&SweepConfig::default()), &params(3, mode), CancelToken::new())
            .unwrap()
            .wait();

        match result {
            Err(ReconstructionError::CoreExecution {
                core,
                failed_cores,
                reason,
            }) => {
                assert_eq!(core, 1);
                assert_eq!(failed_cores, 1);
                assert!(reason.contains("injected failure"), "{reason}");
            }
            other => panic!("expected core failure, got {other:?}"),
        }
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec!["failed"]);
    }
}

#[test]
fn colour_flow_is_split_into_angio_volume() {
    let mut raw = linear_sweep(&SweepConfig {
        frame_count: 4,
        frame_size: (8, 8),
        ..Default::default()
    });
    for frame in &mut raw.frames {
        let image = RgbImage::from_fn(8, 8, |x, _| if x < 4 { Rgb([90, 90, 90]) } else { Rgb([200, 20, 20]) });
        *frame = Frame::rgb(frame.timestamp, image);
    }

    let output = ReconstructionExecutor::default()
        .run_blocking(&raw, &params(2, ExecutionMode::Auto), CancelToken::new())
        .unwrap();
    let angio = output.angio.as_ref().expect("colour frames should produce angio");
    assert_eq!(angio.dim(), output.bmode.dim());

    let grey_voxel = [0, 0, 1];
    let red_voxel = [0, 0, 6];
    assert_eq!(output.bmode.data()[grey_voxel], 90);
    assert_eq!(angio.data()[grey_voxel], 0);
    assert!(angio.data()[red_voxel] > 0);
    assert_eq!(angio.data()[red_voxel], output.bmode.data()[red_voxel]);
}

#[test]
fn reference_transform_moves_the_volume() {
    let shift = Vector3::new(5.0, -3.0, 2.0);
    let raw = two_frame_sweep().with_reference_transform(RigidTransform::from_translation(shift.x, shift.y, shift.z));
    let output = ReconstructionExecutor::default()
        .run_blocking(&raw, &params(1, ExecutionMode::Serial), CancelToken::new())
        .unwrap();
    let origin = output.bmode.origin;
    assert_eq!([origin.x, origin.y, origin.z], [5.0, -3.0, 2.0]);
    assert_eq!(output.bmode.dim(), (11, 4, 4));
}

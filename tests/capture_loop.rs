//! End-to-end loop policy coverage: one-shot, repeat, timeout, stop signal,
//! and per-frame failure resilience.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use capture_kernel::{
    CameraCapture, CaptureConfig, CaptureError, CaptureSession, ChannelOrder, FrameAnalyzer,
    FrameDiscovery, FrameReader, ImageView, LoopController, LoopOptions, LoopOutcome,
    MemoryPreference, PixelFormat, RawFrame, ScriptedDiscovery, SourceFilter, SourceHandle,
    StreamProperties, SyntheticDiscovery,
};

fn props(width: u32, height: u32) -> StreamProperties {
    StreamProperties {
        width,
        height,
        pixel_format: PixelFormat::Bgra32,
        frame_rate_num: 30,
        frame_rate_den: 1,
    }
}

fn bgra_frame(width: u32, height: u32, fill: u8) -> RawFrame {
    RawFrame {
        bytes: vec![fill; (width * height * 4) as usize],
        width,
        height,
        pixel_format: PixelFormat::Bgra32,
    }
}

fn scripted_config(device: &str) -> CaptureConfig {
    let mut cfg = CaptureConfig::default();
    cfg.source.device = device.to_string();
    cfg
}

/// Produces the frame's first byte on every frame.
struct FirstByteAnalyzer;

impl FrameAnalyzer for FirstByteAnalyzer {
    type Output = u8;

    fn analyze(&mut self, image: &ImageView<'_>) -> Result<Option<u8>> {
        Ok(image.data().first().copied())
    }
}

/// Never produces a result.
struct AbsentAnalyzer;

impl FrameAnalyzer for AbsentAnalyzer {
    type Output = u8;

    fn analyze(&mut self, _image: &ImageView<'_>) -> Result<Option<u8>> {
        Ok(None)
    }
}

/// Fails on one specific call, produces the call index otherwise.
struct FlakyAnalyzer {
    calls: u32,
    fail_on: u32,
}

impl FrameAnalyzer for FlakyAnalyzer {
    type Output = u32;

    fn analyze(&mut self, _image: &ImageView<'_>) -> Result<Option<u32>> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(anyhow!("injected failure on frame {}", self.calls));
        }
        Ok(Some(self.calls))
    }
}

#[test]
fn one_shot_dispatches_result_exactly_once_and_terminates() {
    let frames = (0..5).map(|i| Some(bgra_frame(4, 4, 100 + i))).collect();
    let discovery = Arc::new(ScriptedDiscovery::new(vec![props(4, 4)], frames));
    let capture = CameraCapture::new(discovery, scripted_config("scripted://cam"));

    let seen: Arc<Mutex<Vec<Option<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = capture
        .start_processing(
            FirstByteAnalyzer,
            Some(move |r: Option<&u8>| sink.lock().unwrap().push(r.copied())),
            None::<fn()>,
        )
        .expect("setup")
        .expect("source exists");

    let (outcome, last) = handle.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::Completed);
    assert_eq!(last, Some(100));
    // Exactly one dispatch, with the iteration-k result.
    assert_eq!(*seen.lock().unwrap(), vec![Some(100)]);
    assert!(!capture.is_running());
}

#[test]
fn timeout_dispatches_absent_exactly_once_at_or_after_deadline() {
    let mut cfg = scripted_config("stub://cam0");
    cfg.processing.timeout = Some(Duration::from_millis(300));
    cfg.processing.repeat = false;
    cfg.source.fps = 60;

    let discovery = Arc::new(SyntheticDiscovery::new(32, 32, 60));
    let capture = CameraCapture::new(discovery, cfg);

    let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let started = Instant::now();
    let handle = capture
        .start_processing(
            AbsentAnalyzer,
            Some(move |r: Option<&u8>| sink.lock().unwrap().push(r.is_some())),
            None::<fn()>,
        )
        .expect("setup")
        .expect("source exists");

    let (outcome, last) = handle.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::TimedOut);
    assert!(last.is_none());
    assert!(started.elapsed() >= Duration::from_millis(300));
    // Exactly one dispatch, and it signals absence.
    assert_eq!(*seen.lock().unwrap(), vec![false]);
}

#[test]
fn stop_signal_terminates_repeat_loop() {
    let mut cfg = scripted_config("stub://cam0");
    cfg.processing.repeat = true;
    cfg.source.fps = 240;

    let discovery = Arc::new(SyntheticDiscovery::new(16, 16, 240));
    let capture = CameraCapture::new(discovery, cfg);

    let handle = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("setup")
        .expect("source exists");
    assert!(capture.is_running());
    assert!(handle.is_active());

    std::thread::sleep(Duration::from_millis(50));
    handle.request_stop();
    let (outcome, _) = handle.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::Stopped);
    assert!(!capture.is_running());
}

#[test]
fn analyzer_failure_on_one_frame_does_not_abort_the_loop() {
    // 10 frames; the analyzer fails on frame 3. Frames 1-2 and 4-10 must
    // still be processed and callback-invoked.
    let frames = (0..10).map(|i| Some(bgra_frame(4, 4, i))).collect();
    let discovery = Arc::new(ScriptedDiscovery::new(vec![props(4, 4)], frames));
    let handle = discovery.find_source(&SourceFilter {
        device: "scripted://cam".to_string(),
    });
    let mut session = CaptureSession::new(discovery, ChannelOrder::Bgr, MemoryPreference::Cpu);
    session.start(handle).expect("start");

    let stop = Arc::new(AtomicBool::new(false));
    let controller = LoopController::new(
        LoopOptions {
            timeout: None,
            repeat: true,
        },
        stop.clone(),
    );

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut iterations = 0u32;
    let stop_after = stop.clone();
    let (outcome, _) = controller.run(
        &mut session,
        &mut FlakyAnalyzer { calls: 0, fail_on: 3 },
        Some(move |r: Option<&u32>| {
            if let Some(&v) = r {
                sink.lock().unwrap().push(v);
            }
        }),
        Some(move || {
            iterations += 1;
            // Scripted reader yields one frame per poll; a few extra passes
            // make sure the script is exhausted before stopping.
            if iterations > 20 {
                stop_after.store(true, Ordering::SeqCst);
            }
        }),
    );

    assert_eq!(outcome, LoopOutcome::Stopped);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(session.stats().frames_skipped, 1);
    assert_eq!(session.stats().frames_processed, 9);
}

#[test]
fn bad_stride_frame_is_skipped_and_the_loop_continues() {
    let bad = RawFrame {
        bytes: vec![0u8; 7],
        width: 4,
        height: 4,
        pixel_format: PixelFormat::Bgra32,
    };
    let frames = vec![
        Some(bgra_frame(4, 4, 1)),
        Some(bad),
        Some(bgra_frame(4, 4, 3)),
    ];
    let discovery = Arc::new(ScriptedDiscovery::new(vec![props(4, 4)], frames));
    let handle = discovery.find_source(&SourceFilter {
        device: "scripted://cam".to_string(),
    });
    let mut session = CaptureSession::new(discovery, ChannelOrder::Bgr, MemoryPreference::Cpu);
    session.start(handle).expect("start");

    let stop = Arc::new(AtomicBool::new(false));
    let controller = LoopController::new(
        LoopOptions {
            timeout: None,
            repeat: true,
        },
        stop.clone(),
    );

    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut iterations = 0u32;
    let stop_after = stop.clone();
    let (outcome, _) = controller.run(
        &mut session,
        &mut FirstByteAnalyzer,
        Some(move |r: Option<&u8>| {
            if let Some(&v) = r {
                sink.lock().unwrap().push(v);
            }
        }),
        Some(move || {
            iterations += 1;
            if iterations > 10 {
                stop_after.store(true, Ordering::SeqCst);
            }
        }),
    );

    assert_eq!(outcome, LoopOutcome::Stopped);
    assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    assert_eq!(session.stats().frames_skipped, 1);
}

#[test]
fn pre_iteration_callback_runs_before_acquisition() {
    let frames = vec![Some(bgra_frame(4, 4, 42))];
    let discovery = Arc::new(ScriptedDiscovery::new(vec![props(4, 4)], frames));
    let capture = CameraCapture::new(discovery, scripted_config("scripted://cam"));

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let result_events = events.clone();
    let pre_events = events.clone();
    let handle = capture
        .start_processing(
            FirstByteAnalyzer,
            Some(move |_: Option<&u8>| result_events.lock().unwrap().push("result")),
            Some(move || pre_events.lock().unwrap().push("pre")),
        )
        .expect("setup")
        .expect("source exists");

    let (outcome, _) = handle.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::Completed);
    assert_eq!(*events.lock().unwrap(), vec!["pre", "result"]);
}

#[test]
fn missing_source_is_a_silent_noop() {
    let discovery = Arc::new(SyntheticDiscovery::new(640, 480, 30));
    // Non-stub device: the synthetic discovery has no match for it.
    let capture = CameraCapture::new(discovery, scripted_config("/dev/video0"));

    let started = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("no source is not an error");
    assert!(started.is_none());
    assert!(!capture.is_running());
}

#[test]
fn negotiation_failure_surfaces_before_the_loop_begins() {
    let discovery = Arc::new(ScriptedDiscovery::new(vec![], vec![]));
    let capture = CameraCapture::new(discovery, scripted_config("scripted://cam"));

    let err = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .unwrap_err();
    assert!(matches!(err, CaptureError::NegotiationFailed));
    assert!(!capture.is_running());
}

/// Reader whose every poll fails, for retry-path coverage.
struct FailingReader;

impl FrameReader for FailingReader {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<Option<RawFrame>> {
        Err(anyhow!("sensor detached"))
    }

    fn stop(&mut self) {}
}

struct FailingDiscovery;

impl FrameDiscovery for FailingDiscovery {
    fn find_source(&self, filter: &SourceFilter) -> Option<SourceHandle> {
        Some(SourceHandle {
            source_id: filter.device.clone(),
            group_id: "failing".to_string(),
            pixel_format_tag: "BGRA32".to_string(),
        })
    }

    fn list_stream_properties(&self, _handle: &SourceHandle) -> Vec<StreamProperties> {
        vec![props(4, 4)]
    }

    fn open_reader(
        &self,
        _handle: &SourceHandle,
        _properties: &StreamProperties,
        _memory: MemoryPreference,
    ) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(FailingReader))
    }
}

#[test]
fn failing_reader_backs_off_until_the_timeout_ceiling() {
    let discovery = Arc::new(FailingDiscovery);
    let handle = discovery.find_source(&SourceFilter {
        device: "fail://cam".to_string(),
    });
    let mut session = CaptureSession::new(discovery, ChannelOrder::Bgr, MemoryPreference::Cpu);
    session.start(handle).expect("start");

    let controller = LoopController::new(
        LoopOptions {
            timeout: Some(Duration::from_millis(50)),
            repeat: true,
        },
        Arc::new(AtomicBool::new(false)),
    );

    let mut iterations = 0u32;
    let (outcome, _) = controller.run(
        &mut session,
        &mut AbsentAnalyzer,
        None::<fn(Option<&u8>)>,
        Some(|| iterations += 1),
    );

    assert_eq!(outcome, LoopOutcome::TimedOut);
    // Failed polls back off like empty polls; a hot spin would burn
    // through orders of magnitude more iterations in 50ms.
    assert!(iterations < 500, "iterations = {}", iterations);
}

/// Panics on every frame, against the trait's documented obligations.
struct PanickingAnalyzer;

impl FrameAnalyzer for PanickingAnalyzer {
    type Output = u8;

    fn analyze(&mut self, _image: &ImageView<'_>) -> Result<Option<u8>> {
        panic!("analyzer blew up");
    }
}

#[test]
fn worker_panic_clears_running_and_allows_restart() {
    let discovery = Arc::new(SyntheticDiscovery::new(8, 8, 240));
    let capture = CameraCapture::new(discovery, scripted_config("stub://cam0"));

    let handle = capture
        .start_processing(PanickingAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("setup")
        .expect("source exists");

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, CaptureError::WorkerPanic));
    // The facade must recover: the running flag is cleared on the panic
    // path, so a fresh loop can start.
    assert!(!capture.is_running());

    let restarted = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("setup after panic")
        .expect("source exists");
    let (outcome, last) = restarted.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::Completed);
    assert!(last.is_some());
}

#[test]
fn second_loop_is_rejected_while_one_is_active() {
    let mut cfg = scripted_config("stub://cam0");
    cfg.processing.repeat = true;

    let discovery = Arc::new(SyntheticDiscovery::new(16, 16, 120));
    let capture = CameraCapture::new(discovery, cfg);

    let handle = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("setup")
        .expect("source exists");

    let err = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .unwrap_err();
    assert!(matches!(err, CaptureError::AlreadyRunning));

    handle.request_stop();
    let (outcome, _) = handle.wait().expect("worker");
    assert_eq!(outcome, LoopOutcome::Stopped);

    // Once the first loop is done, a new one may start.
    let restarted = capture
        .start_processing(FirstByteAnalyzer, None::<fn(Option<&u8>)>, None::<fn()>)
        .expect("setup")
        .expect("source exists");
    restarted.request_stop();
    restarted.wait().expect("worker");
}

//! Process-wide capture entry point.
//!
//! `CameraCapture` lazily constructs a session from the discovery
//! collaborator and runs the loop controller on one dedicated worker
//! thread. Opening a session is expensive and the underlying source can
//! typically only be claimed once, so at most one loop is live at a time;
//! a second `start_processing` while one is active is rejected.
//!
//! Control is exposed through `CaptureHandle` (and the facade's own
//! `is_running`/`request_stop`): plain atomic signals, cooperative and
//! best-effort, observed by the loop once per iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::CaptureConfig;
use crate::controller::{LoopController, LoopOptions, LoopOutcome};
use crate::session::{CaptureSession, FrameAnalyzer};
use crate::source::{FrameDiscovery, SourceFilter};
use crate::CaptureError;

pub struct CameraCapture {
    discovery: Arc<dyn FrameDiscovery>,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl CameraCapture {
    pub fn new(discovery: Arc<dyn FrameDiscovery>, config: CaptureConfig) -> Self {
        Self {
            discovery,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a capture loop is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the active loop (if any) to terminate. Cooperative: the loop
    /// exits within one further iteration, never mid-analysis.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Discover a source, start a session, and run the processing loop on
    /// a background worker.
    ///
    /// Returns `Ok(None)` when no source is discoverable (a normal no-op),
    /// `Err` for setup failures (`NegotiationFailed`, reader trouble,
    /// `AlreadyRunning`). Sessions are per-run: `Closed` is terminal, so
    /// each call constructs a fresh one.
    pub fn start_processing<A, R, P>(
        &self,
        mut analyzer: A,
        result_callback: Option<R>,
        pre_iteration: Option<P>,
    ) -> Result<Option<CaptureHandle<A::Output>>, CaptureError>
    where
        A: FrameAnalyzer + Send + 'static,
        A::Output: Send + 'static,
        R: FnMut(Option<&A::Output>) + Send + 'static,
        P: FnMut() + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let filter = SourceFilter {
            device: self.config.source.device.clone(),
        };
        let Some(handle) = self.discovery.find_source(&filter) else {
            self.running.store(false, Ordering::SeqCst);
            log::info!("no capture source matched '{}'", filter.device);
            return Ok(None);
        };

        let mut session = CaptureSession::new(
            self.discovery.clone(),
            self.config.processing.channel_order,
            self.config.processing.memory_preference,
        );
        // Start synchronously so negotiation failures surface to the caller
        // before any worker exists.
        if let Err(err) = session.start(Some(handle)) {
            self.running.store(false, Ordering::SeqCst);
            return Err(err);
        }

        // Fresh run, fresh signal.
        self.stop.store(false, Ordering::SeqCst);
        let controller = LoopController::new(
            LoopOptions {
                timeout: self.config.processing.timeout,
                repeat: self.config.processing.repeat,
            },
            self.stop.clone(),
        );

        let running = self.running.clone();
        let join = std::thread::spawn(move || {
            // Clears the running flag on every exit, panic included, so the
            // facade can start a fresh loop afterwards. The session's own
            // Drop releases the reader on the panic path.
            let _guard = RunningGuard(running);
            let (outcome, result) =
                controller.run(&mut session, &mut analyzer, result_callback, pre_iteration);
            session.stop();
            (outcome, result)
        });

        Ok(Some(CaptureHandle {
            active: self.running.clone(),
            stop: self.stop.clone(),
            join: Some(join),
        }))
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one running capture loop.
#[derive(Debug)]
pub struct CaptureHandle<T> {
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<(LoopOutcome, Option<T>)>>,
}

impl<T> CaptureHandle<T> {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cooperative stop: the loop terminates within one further iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Block until the loop terminates; yields the termination reason and
    /// the last produced result.
    pub fn wait(mut self) -> Result<(LoopOutcome, Option<T>), CaptureError> {
        let Some(join) = self.join.take() else {
            return Err(CaptureError::WorkerPanic);
        };
        join.join().map_err(|_| CaptureError::WorkerPanic)
    }
}

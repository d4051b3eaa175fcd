//! Loop policy over the raw per-frame poll loop.
//!
//! The controller layers timeout, repeat, and cooperative cancellation over
//! `CaptureSession` polling and owns result/timeout callback dispatch.
//! Separating "did we get a result" from "should we keep looping" lets
//! one-shot capture (`repeat = false`) and continuous streaming analysis
//! (`repeat = true`) share one loop body; the timeout is an orthogonal
//! ceiling applicable to either mode.
//!
//! The controller never raises to its caller: per-frame failures are
//! absorbed by the session, and acquisition errors are logged and retried.
//! Only setup errors (bad source, negotiation failure) propagate, and those
//! happen before the loop begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::session::{CaptureSession, FrameAnalyzer, FrameOutcome};

#[derive(Clone, Copy, Debug, Default)]
pub struct LoopOptions {
    /// Optional ceiling on total loop time. When exceeded, the result
    /// callback is dispatched once with `None` and the loop terminates.
    pub timeout: Option<Duration>,
    /// Keep looping after a result is produced.
    pub repeat: bool,
}

/// Why the loop terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopOutcome {
    /// A result was produced and `repeat` was off.
    Completed,
    /// The timeout ceiling elapsed; the absent callback was dispatched.
    TimedOut,
    /// The stop signal was observed.
    Stopped,
}

pub struct LoopController {
    options: LoopOptions,
    stop: Arc<AtomicBool>,
}

impl LoopController {
    pub fn new(options: LoopOptions, stop: Arc<AtomicBool>) -> Self {
        Self { options, stop }
    }

    /// Drive the session until a terminal condition.
    ///
    /// Per iteration: invoke the pre-iteration callback, poll for a frame,
    /// process it, dispatch the result callback synchronously when a result
    /// was produced, then evaluate termination. The stop signal is
    /// cooperative: it is observed once per iteration and never interrupts
    /// an in-flight analysis call.
    ///
    /// Returns the termination reason and the last produced result.
    pub fn run<A, R, P>(
        &self,
        session: &mut CaptureSession,
        analyzer: &mut A,
        mut result_callback: Option<R>,
        mut pre_iteration: Option<P>,
    ) -> (LoopOutcome, Option<A::Output>)
    where
        A: FrameAnalyzer,
        R: FnMut(Option<&A::Output>),
        P: FnMut(),
    {
        let loop_start = Instant::now();
        let mut last_result: Option<A::Output> = None;
        // Whether the most recently processed frame yielded a result.
        // Iterations with no frame ready leave it untouched.
        let mut have_result = false;

        loop {
            if let Some(pre) = pre_iteration.as_mut() {
                pre();
            }

            match session.try_acquire_frame() {
                Ok(Some(frame)) => match session.process_one_frame(&frame, analyzer) {
                    FrameOutcome::Produced(result) => {
                        have_result = true;
                        if let Some(cb) = result_callback.as_mut() {
                            cb(Some(&result));
                        }
                        last_result = Some(result);
                    }
                    FrameOutcome::Absent => {
                        have_result = false;
                    }
                    FrameOutcome::Skipped(reason) => {
                        have_result = false;
                        log::debug!("frame skipped: {}", reason);
                    }
                },
                Ok(None) => {
                    // No frame ready; back off briefly instead of spinning.
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => {
                    // Acquisition trouble is retried like an empty poll; the
                    // timeout ceiling bounds a reader that never recovers.
                    log::warn!("frame acquisition failed: {}", err);
                    std::thread::sleep(Duration::from_millis(1));
                }
            }

            if let Some(timeout) = self.options.timeout {
                if loop_start.elapsed() > timeout {
                    if let Some(cb) = result_callback.as_mut() {
                        cb(None);
                    }
                    log::info!(
                        "capture loop timed out after {:?}",
                        loop_start.elapsed()
                    );
                    return (LoopOutcome::TimedOut, last_result);
                }
            }
            if have_result && !self.options.repeat {
                return (LoopOutcome::Completed, last_result);
            }
            if self.stop.load(Ordering::SeqCst) {
                log::info!("capture loop observed stop signal");
                return (LoopOutcome::Stopped, last_result);
            }
        }
    }
}

//! Heart-rate measurement session.
//!
//! A session runs the acquisition pipeline on its own thread for a fixed
//! wall-clock duration:
//!
//! ```text
//!  Idle ─▶ Initializing ─▶ Streaming ─▶ Finalizing ─▶ Done
//!              ▲               │  ▲
//!              │               ▼  │
//!              └──────── FaultRecovering
//! ```
//!
//! Every analysed window produces one live line, pushed onto a bounded
//! channel without ever blocking the worker (lines are dropped when the
//! consumer falls behind). Hardware faults discard the driver and reopen it,
//! at most `max_resets` times. When the deadline passes or the reset budget
//! is exhausted the session finalizes: it computes the average of all
//! accepted smoothed values, sends the end-of-stream marker, closes the
//! channel and publishes the summary through a one-shot completion signal.

use crate::collector::driver::{init_sensor, DriverError, DriverFactory, SensorDriver};
use crate::config::{ConfigError, HrConfig};
use crate::core::estimator::{estimate_window, BpmEstimate, BpmEstimator};
use crate::core::smoother::{LiveMessage, LiveSmoother};
use crate::core::windowing::{Window, WindowCollector};
use crate::telemetry::{create_shared_counters, SharedCounters};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Streaming,
    FaultRecovering,
    Finalizing,
    Done,
}

/// Final outcome of a heart-rate session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartRateSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rounded mean of the accepted smoothed values
    pub average_bpm: Option<u32>,
    /// Number of accepted smoothed values
    pub accepted: usize,
    /// Number of windows analysed
    pub windows: u64,
    /// Driver reinitializations after hardware faults
    pub resets: u32,
    /// Live lines dropped because the consumer fell behind
    pub messages_dropped: u64,
    /// Whether the reset budget ran out before the deadline
    pub ended_early: bool,
}

/// Errors surfaced by the session API.
#[derive(Debug)]
pub enum SessionError {
    /// The heart-rate tunables are unusable
    InvalidConfig(ConfigError),
    /// The worker thread could not be started
    Spawn(std::io::Error),
    /// The worker stopped without publishing its summary
    WorkerLost,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidConfig(e) => write!(f, "{e}"),
            SessionError::Spawn(e) => write!(f, "Failed to start session worker: {e}"),
            SessionError::WorkerLost => write!(f, "Session worker stopped unexpectedly"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Items carried by the live channel.
#[derive(Debug)]
enum LiveEvent {
    Line(LiveMessage),
    End,
}

/// Consumer side of the live channel.
///
/// Iterating blocks until the next line arrives and ends at the
/// end-of-stream marker (or when the worker has gone away).
pub struct LiveStream {
    receiver: Receiver<LiveEvent>,
    finished: bool,
}

impl LiveStream {
    fn new(receiver: Receiver<LiveEvent>) -> Self {
        Self {
            receiver,
            finished: false,
        }
    }

    /// Whether the end of the stream has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Iterator for LiveStream {
    type Item = LiveMessage;

    fn next(&mut self) -> Option<LiveMessage> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(LiveEvent::Line(message)) => Some(message),
            Ok(LiveEvent::End) | Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

/// Accessor for the final summary of a running session.
pub struct SessionHandle {
    session_id: Uuid,
    receiver: oneshot::Receiver<HeartRateSummary>,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the session is done and take its summary.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`SessionHandle::wait_async`] there.
    pub fn wait(self) -> Result<HeartRateSummary, SessionError> {
        let result = self
            .receiver
            .blocking_recv()
            .map_err(|_| SessionError::WorkerLost);
        let _ = self.thread.join();
        result
    }

    /// Await the session summary.
    pub async fn wait_async(self) -> Result<HeartRateSummary, SessionError> {
        self.receiver.await.map_err(|_| SessionError::WorkerLost)
    }
}

/// A configured, not yet started heart-rate session.
pub struct VitalsSession {
    config: HrConfig,
    factory: Box<dyn DriverFactory>,
    estimator: Box<dyn BpmEstimator>,
    counters: SharedCounters,
}

impl VitalsSession {
    pub fn new(
        config: HrConfig,
        factory: Box<dyn DriverFactory>,
        estimator: Box<dyn BpmEstimator>,
    ) -> Self {
        Self {
            config,
            factory,
            estimator,
            counters: create_shared_counters(),
        }
    }

    /// Record into `counters` instead of a private counter set.
    pub fn with_counters(mut self, counters: SharedCounters) -> Self {
        self.counters = counters;
        self
    }

    /// Start the session on a background thread.
    ///
    /// The returned stream yields live lines until the session finalizes;
    /// the handle yields the summary exactly once.
    pub fn spawn(self, duration: Duration) -> Result<(SessionHandle, LiveStream), SessionError> {
        self.config.validate().map_err(SessionError::InvalidConfig)?;

        let session_id = Uuid::new_v4();
        let (sender, receiver) = bounded(self.config.live_capacity);
        let (done_tx, done_rx) = oneshot::channel();

        let worker = SessionWorker {
            session_id,
            smoother: LiveSmoother::new(self.config.ema_alpha),
            config: self.config,
            factory: self.factory,
            estimator: self.estimator,
            counters: self.counters,
            sender,
            state: SessionState::Idle,
            resets: 0,
            windows: 0,
            dropped: 0,
        };

        let thread = thread::Builder::new()
            .name(format!("vitals-session-{}", &session_id.to_string()[..8]))
            .spawn(move || {
                let summary = worker.run(duration);
                // The receiver may have been dropped; nothing to do then.
                let _ = done_tx.send(summary);
            })
            .map_err(SessionError::Spawn)?;

        Ok((
            SessionHandle {
                session_id,
                receiver: done_rx,
                thread,
            },
            LiveStream::new(receiver),
        ))
    }
}

/// Why the streaming loop stopped before the deadline.
#[derive(Debug)]
enum StreamFault {
    /// Bus-level failure; the driver must be reinitialized
    Hardware(DriverError),
    /// Anything else; logged and retried
    Unexpected(String),
}

impl From<DriverError> for StreamFault {
    fn from(e: DriverError) -> Self {
        if e.is_hardware_fault() {
            StreamFault::Hardware(e)
        } else {
            StreamFault::Unexpected(e.to_string())
        }
    }
}

/// State owned by the session thread.
struct SessionWorker {
    session_id: Uuid,
    config: HrConfig,
    factory: Box<dyn DriverFactory>,
    estimator: Box<dyn BpmEstimator>,
    counters: SharedCounters,
    sender: Sender<LiveEvent>,
    smoother: LiveSmoother,
    state: SessionState,
    resets: u32,
    windows: u64,
    dropped: u64,
}

impl SessionWorker {
    fn run(mut self, duration: Duration) -> HeartRateSummary {
        let started_at = Utc::now();
        let deadline = Instant::now() + duration;
        let mut driver: Option<Box<dyn SensorDriver>> = None;
        let mut ended_early = false;

        tracing::info!(
            "Session {} started ({}s, channel {})",
            self.session_id,
            duration.as_secs(),
            self.config.channel
        );

        while Instant::now() < deadline {
            let result = match driver.as_mut() {
                Some(active) => {
                    self.transition(SessionState::Streaming);
                    self.stream(active.as_mut(), deadline)
                }
                None => {
                    self.transition(SessionState::Initializing);
                    match init_sensor(
                        self.factory.as_mut(),
                        &self.config.driver,
                        self.config.settle_delay,
                    ) {
                        Ok(opened) => {
                            driver = Some(opened);
                            continue;
                        }
                        Err(e) => Err(StreamFault::from(e)),
                    }
                }
            };

            match result {
                // Deadline reached while streaming
                Ok(()) => break,
                Err(StreamFault::Hardware(e)) => {
                    driver = None;
                    if !self.recover(&e, deadline) {
                        ended_early = true;
                        break;
                    }
                }
                Err(StreamFault::Unexpected(reason)) => {
                    tracing::warn!("Unexpected error during session: {}", reason);
                    self.counters.record_unexpected();
                    self.emit(LiveMessage::unexpected(&reason));
                    sleep_within(self.config.fault_backoff, deadline);
                }
            }
        }

        self.finalize(started_at, ended_early)
    }

    /// Pull windows until the deadline or a fault.
    fn stream(
        &mut self,
        driver: &mut dyn SensorDriver,
        deadline: Instant,
    ) -> Result<(), StreamFault> {
        let mut collector = WindowCollector::new(driver, &self.config);

        while let Some(window) = collector.next_window(deadline)? {
            self.process_window(&window)?;
        }
        Ok(())
    }

    fn process_window(&mut self, window: &Window) -> Result<(), StreamFault> {
        let estimator = self.estimator.as_ref();
        let channel = self.config.channel;
        let estimate = panic::catch_unwind(AssertUnwindSafe(|| {
            estimate_window(estimator, window, channel)
        }))
        .map_err(|payload| StreamFault::Unexpected(panic_message(payload.as_ref())))?;

        self.windows += 1;
        self.counters.record_window();
        match estimate {
            BpmEstimate::Bpm(_) => self.counters.record_accepted(),
            BpmEstimate::NoSignal(reason) => self.counters.record_rejected(reason),
        }

        let message = self.smoother.observe(estimate);
        self.emit(message);
        Ok(())
    }

    /// Handle a hardware fault. Returns `false` once the reset budget is spent.
    fn recover(&mut self, error: &DriverError, deadline: Instant) -> bool {
        self.transition(SessionState::FaultRecovering);
        self.resets += 1;
        self.counters.record_reset();
        tracing::warn!(
            "Sensor fault ({}/{} resets): {}",
            self.resets,
            self.config.max_resets,
            error
        );
        self.emit(LiveMessage::hardware_fault(error));

        if self.resets > self.config.max_resets {
            tracing::warn!("Reset budget exhausted, ending session early");
            return false;
        }
        sleep_within(self.config.reset_backoff, deadline);
        true
    }

    fn finalize(mut self, started_at: DateTime<Utc>, ended_early: bool) -> HeartRateSummary {
        self.transition(SessionState::Finalizing);

        let summary = HeartRateSummary {
            session_id: self.session_id,
            started_at,
            finished_at: Utc::now(),
            average_bpm: self.smoother.average(),
            accepted: self.smoother.accepted().len(),
            windows: self.windows,
            resets: self.resets,
            messages_dropped: self.dropped,
            ended_early,
        };

        if self.sender.try_send(LiveEvent::End).is_err() {
            tracing::debug!("End-of-stream marker not delivered; closing channel");
        }
        self.counters.record_session_completed();
        self.transition(SessionState::Done);

        tracing::info!(
            "Session {} finished: avg {:?} BPM from {} of {} windows, {} resets",
            self.session_id,
            summary.average_bpm,
            summary.accepted,
            summary.windows,
            summary.resets
        );
        summary
    }

    /// Push a live line without blocking; drop it when the channel is full.
    fn emit(&mut self, message: LiveMessage) {
        match self.sender.try_send(LiveEvent::Line(message)) {
            Ok(()) => self.counters.record_sent(),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                self.counters.record_dropped();
                tracing::debug!("Live channel full, dropping line");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Live stream consumer gone");
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!("Session {}: {:?} -> {:?}", self.session_id, self.state, next);
            self.state = next;
        }
    }
}

/// Sleep for `delay`, but never past `deadline`.
fn sleep_within(delay: Duration, deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    thread::sleep(delay.min(remaining));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during window processing".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::noop::NoopDriver;
    use crate::core::estimator::PeakBpmEstimator;

    fn noop_factory() -> Box<dyn DriverFactory> {
        Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> {
            Ok(Box::new(NoopDriver::new()))
        })
    }

    #[test]
    fn test_spawn_rejects_invalid_config() {
        let config = HrConfig {
            ema_alpha: 0.0,
            ..HrConfig::default()
        };
        let session =
            VitalsSession::new(config, noop_factory(), Box::new(PeakBpmEstimator::new()));
        assert!(matches!(
            session.spawn(Duration::from_secs(1)),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_spawn_rejects_unbounded_window() {
        let config = HrConfig {
            window_secs: f64::INFINITY,
            ..HrConfig::default()
        };
        let session =
            VitalsSession::new(config, noop_factory(), Box::new(PeakBpmEstimator::new()));
        assert!(matches!(
            session.spawn(Duration::from_secs(1)),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_duration_finalizes_immediately() {
        let session = VitalsSession::new(
            HrConfig::default(),
            noop_factory(),
            Box::new(PeakBpmEstimator::new()),
        );
        let (handle, stream) = session.spawn(Duration::ZERO).unwrap();

        assert_eq!(stream.count(), 0);
        let summary = handle.wait().unwrap();
        assert_eq!(summary.average_bpm, None);
        assert_eq!(summary.windows, 0);
        assert!(!summary.ended_early);
    }

    #[test]
    fn test_stream_stops_after_end_marker() {
        let (sender, receiver) = bounded(4);
        sender
            .send(LiveEvent::Line(LiveMessage::unexpected("x")))
            .unwrap();
        sender.send(LiveEvent::End).unwrap();
        // anything after the marker is never observed
        sender
            .send(LiveEvent::Line(LiveMessage::unexpected("late")))
            .unwrap();

        let mut stream = LiveStream::new(receiver);
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "panic during window processing");
    }
}

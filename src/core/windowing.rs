//! Sliding-window management for the raw PPG sample stream.
//!
//! Samples arrive from the sensor FIFO in irregular bursts. The collector
//! keeps a rolling buffer per channel and turns the stream into fixed-length,
//! overlapping windows emitted every `step` new samples. The buffer is cut
//! back to exactly one window on every emission, so it never grows with the
//! session length.

use crate::collector::driver::{DriverError, SensorDriver};
use crate::collector::types::{Channel, Sample, SampleBatch};
use crate::config::HrConfig;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// A fixed-length snapshot of the trailing edge of the rolling buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    samples: Vec<Sample>,
    sample_hz: u32,
}

impl Window {
    pub fn new(samples: Vec<Sample>, sample_hz: u32) -> Self {
        Self { samples, sample_hz }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    /// Get the duration covered by this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_hz as f64
    }

    /// Extract one channel as floating-point values.
    pub fn signal(&self, channel: Channel) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.channel(channel) as f64)
            .collect()
    }
}

/// Per-channel rolling sample storage.
#[derive(Debug)]
pub struct RollingBuffer {
    red: VecDeque<u32>,
    ir: VecDeque<u32>,
    window_len: usize,
}

impl RollingBuffer {
    /// Create an empty buffer for windows of `window_len` samples.
    pub fn new(window_len: usize) -> Self {
        Self {
            red: VecDeque::with_capacity(window_len.saturating_mul(2)),
            ir: VecDeque::with_capacity(window_len.saturating_mul(2)),
            window_len,
        }
    }

    /// Append a poll result. Returns the number of samples added.
    pub fn push_batch(&mut self, batch: SampleBatch) -> usize {
        let mut added = 0;
        for sample in batch.into_samples() {
            self.red.push_back(sample.red);
            self.ir.push_back(sample.ir);
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.ir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ir.is_empty()
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Drop everything older than the trailing window.
    pub fn truncate_to_window(&mut self) {
        let excess = self.len().saturating_sub(self.window_len);
        self.red.drain(..excess);
        self.ir.drain(..excess);
    }

    /// Copy the current contents into an independent window.
    pub fn snapshot(&self, sample_hz: u32) -> Window {
        let samples = self
            .red
            .iter()
            .zip(self.ir.iter())
            .map(|(&red, &ir)| Sample::new(red, ir))
            .collect();
        Window::new(samples, sample_hz)
    }
}

/// Turns driver polls into a sequence of overlapping windows.
///
/// The sequence is conceptually infinite and cannot be restarted: a new
/// driver instance always gets a new collector with an empty buffer.
pub struct WindowCollector<'d> {
    driver: &'d mut dyn SensorDriver,
    buffer: RollingBuffer,
    step_len: usize,
    sample_hz: u32,
    fill_timeout: Duration,
    fill_poll: Duration,
    stream_poll: Duration,
    primed: bool,
    windows_emitted: u64,
}

impl<'d> WindowCollector<'d> {
    /// Create a collector polling `driver` with the timing from `config`.
    pub fn new(driver: &'d mut dyn SensorDriver, config: &HrConfig) -> Self {
        Self {
            driver,
            buffer: RollingBuffer::new(config.window_len()),
            step_len: config.step_len(),
            sample_hz: config.sample_hz,
            fill_timeout: config.fill_timeout(),
            fill_poll: config.fill_poll,
            stream_poll: config.stream_poll,
            primed: false,
            windows_emitted: 0,
        }
    }

    /// Number of windows handed out so far.
    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted
    }

    /// Current number of buffered samples.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Block until the next window is ready.
    ///
    /// Returns `Ok(None)` once `deadline` has passed. Driver errors are
    /// returned as-is; the caller decides whether to reinitialize.
    pub fn next_window(&mut self, deadline: Instant) -> Result<Option<Window>, DriverError> {
        if !self.primed {
            return self.fill(deadline);
        }

        let target = self.buffer.window_len() + self.step_len;
        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let batch = self.driver.read_sequential()?;
            if batch.has_data() {
                self.buffer.push_batch(batch);
                if self.buffer.len() >= target {
                    return Ok(Some(self.emit()));
                }
            }
            thread::sleep(self.stream_poll);
        }
    }

    /// Initial fill of the buffer up to one full window.
    ///
    /// When the fill timeout elapses first, whatever has been buffered is
    /// emitted as a short (possibly empty) window instead of failing.
    fn fill(&mut self, deadline: Instant) -> Result<Option<Window>, DriverError> {
        let started = Instant::now();

        while self.buffer.len() < self.buffer.window_len() {
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let batch = self.driver.read_sequential()?;
            if batch.has_data() {
                self.buffer.push_batch(batch);
            }
            thread::sleep(self.fill_poll);

            if started.elapsed() > self.fill_timeout {
                tracing::warn!(
                    "Initial fill timed out after {:?} with {}/{} samples",
                    self.fill_timeout,
                    self.buffer.len(),
                    self.buffer.window_len()
                );
                break;
            }
        }

        self.primed = true;
        Ok(Some(self.emit()))
    }

    fn emit(&mut self) -> Window {
        self.buffer.truncate_to_window();
        self.windows_emitted += 1;
        self.buffer.snapshot(self.sample_hz)
    }
}

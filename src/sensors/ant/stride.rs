//! Stride cadence smoothing.
//!
//! Stride SDM sensors report a cumulative stride count roughly every
//! 500 ms. [`StrideCadence`] turns those samples into a strides-per-minute
//! rate averaged over a trailing window, and [`StrideWorker`] feeds it from
//! an ordered queue on a dedicated thread.

use crate::sensors::types::DeviceId;
use crossbeam::channel::{self, Sender};
use std::collections::{HashMap, VecDeque};
use std::thread::JoinHandle;

/// Default averaging window in milliseconds
pub const DEFAULT_WINDOW_MS: i64 = 10_000;

/// Default cap on retained samples
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

const ONE_MINUTE_MS: f64 = 60_000.0;

/// Windowed strides-per-minute estimator.
#[derive(Debug, Clone)]
pub struct StrideCadence {
    /// (timestamp ms, cumulative strides), newest first
    history: VecDeque<(i64, u64)>,
    window_ms: i64,
    limit: usize,
}

impl Default for StrideCadence {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS, DEFAULT_HISTORY_LIMIT)
    }
}

impl StrideCadence {
    pub fn new(window_ms: i64, limit: usize) -> Self {
        Self {
            history: VecDeque::new(),
            window_ms,
            limit: limit.max(1),
        }
    }

    /// Record a sample and return the current strides per minute.
    ///
    /// Uses the newest sample at least one window old; until one exists the
    /// oldest sample gives an early estimate.
    pub fn push(&mut self, timestamp: i64, cumulative_strides: u64) -> u64 {
        self.history.push_front((timestamp, cumulative_strides));

        let mut rate = 0;
        let mut reference = None;
        for (i, &sample) in self.history.iter().enumerate() {
            if timestamp - sample.0 >= self.window_ms {
                rate = Self::strides_per_minute(timestamp, cumulative_strides, sample);
                reference = Some(i);
                break;
            } else if i + 1 == self.history.len() {
                rate = Self::strides_per_minute(timestamp, cumulative_strides, sample);
            }
        }

        // Drop the reference sample and everything older.
        if let Some(i) = reference {
            self.history.truncate(i);
        }
        self.history.truncate(self.limit);

        rate
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    fn strides_per_minute(timestamp: i64, strides: u64, sample: (i64, u64)) -> u64 {
        let elapsed_ms = (timestamp - sample.0) as f64;
        if elapsed_ms <= 0.0 {
            return 0;
        }
        (strides.saturating_sub(sample.1) as f64 * (ONE_MINUTE_MS / elapsed_ms)) as u64
    }
}

/// Stride count sample queued for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideSample {
    pub device_number: DeviceId,
    pub est_timestamp: i64,
    pub cumulative_strides: u64,
}

/// Worker thread owning the stride histories of one connector.
///
/// Samples are processed strictly in submission order.
pub struct StrideWorker {
    tx: Option<Sender<StrideSample>>,
    thread: Option<JoinHandle<()>>,
}

impl StrideWorker {
    /// Start a worker; `on_rate` runs on the worker thread for every sample.
    pub fn spawn<F>(window_ms: i64, limit: usize, mut on_rate: F) -> std::io::Result<Self>
    where
        F: FnMut(StrideSample, u64) + Send + 'static,
    {
        let (tx, rx) = channel::unbounded::<StrideSample>();
        let thread = std::thread::Builder::new()
            .name("stride-cadence".to_string())
            .spawn(move || {
                let mut histories: HashMap<DeviceId, StrideCadence> = HashMap::new();
                for sample in rx.iter() {
                    let rate = histories
                        .entry(sample.device_number)
                        .or_insert_with(|| StrideCadence::new(window_ms, limit))
                        .push(sample.est_timestamp, sample.cumulative_strides);
                    on_rate(sample, rate);
                }
                tracing::trace!("Stride worker exiting");
            })?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue a sample. Returns false once the worker is shutting down.
    pub fn submit(&self, sample: StrideSample) -> bool {
        self.tx
            .as_ref()
            .map(|tx| tx.send(sample).is_ok())
            .unwrap_or(false)
    }

    /// Close the queue and wait for queued samples to drain.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("Stride worker panicked");
            }
        }
    }
}

impl Drop for StrideWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

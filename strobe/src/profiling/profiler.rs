//! Profiler façade
//!
//! Owns the backend handle and the collector thread, and hands consumers
//! the bounded samples channel. Start/stop are explicit; the channel closes
//! once the collector has exited after [`Profiler::stop`].

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::backend::ProfileBackend;
use super::collector;
use crate::domain::{Pid, ProfilerError, Sample};
use crate::symbolization::Symbolize;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Minimum collect interval; anything at or below this would have the
/// collector spinning on map snapshots.
const MIN_COLLECT_INTERVAL: Duration = Duration::from_millis(1);

pub struct Profiler {
    target: Option<Pid>,
    sample_period_ns: u64,
    collect_interval: Duration,
    backend: Arc<dyn ProfileBackend>,
    samples_rx: Receiver<Vec<Sample>>,
    state: Mutex<State>,
}

struct State {
    started: bool,
    /// Everything the collector thread takes ownership of on start.
    pending: Option<Pending>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

struct Pending {
    samples_tx: Sender<Vec<Sample>>,
    user_sym: Box<dyn Symbolize + Send>,
    kernel_sym: Box<dyn Symbolize + Send>,
}

impl Profiler {
    /// Create a profiler over the given backend and symbolizers.
    ///
    /// `target` of `None` samples system-wide. Fails when `sample_hz` is 0
    /// or `collect_interval` is not above 1 ms.
    pub fn new(
        target: Option<Pid>,
        sample_hz: u32,
        collect_interval: Duration,
        backend: Arc<dyn ProfileBackend>,
        user_sym: Box<dyn Symbolize + Send>,
        kernel_sym: Box<dyn Symbolize + Send>,
    ) -> Result<Self, ProfilerError> {
        if sample_hz == 0 {
            return Err(ProfilerError::InvalidSampleRate);
        }
        if collect_interval <= MIN_COLLECT_INTERVAL {
            return Err(ProfilerError::InvalidCollectInterval);
        }

        // Capacity 1: the collector never waits for the consumer, it drops
        // batches instead.
        let (samples_tx, samples_rx) = bounded(1);

        Ok(Self {
            target,
            sample_period_ns: NANOS_PER_SEC / u64::from(sample_hz),
            collect_interval,
            backend,
            samples_rx,
            state: Mutex::new(State {
                started: false,
                pending: Some(Pending { samples_tx, user_sym, kernel_sym }),
                stop_tx: None,
                handle: None,
            }),
        })
    }

    /// Receiver for published sample batches. May be cloned freely; it is
    /// disconnected once the profiler has been stopped.
    #[must_use]
    pub fn samples(&self) -> Receiver<Vec<Sample>> {
        self.samples_rx.clone()
    }

    /// Attach the backend and spawn the collector. Not idempotent.
    pub fn start(&self) -> Result<(), ProfilerError> {
        let pending = {
            let mut state = self.state.lock().unwrap();
            if state.started {
                return Err(ProfilerError::AlreadyStarted);
            }
            let Some(pending) = state.pending.take() else {
                // A stopped profiler cannot be restarted; its channel is gone.
                return Err(ProfilerError::AlreadyStarted);
            };
            state.started = true;
            pending
        };

        if let Err(e) = self.backend.start(self.target, self.sample_period_ns) {
            let mut state = self.state.lock().unwrap();
            state.started = false;
            state.pending = Some(pending);
            return Err(e.into());
        }

        let (stop_tx, stop_rx) = bounded(1);
        let backend = Arc::clone(&self.backend);
        let interval = self.collect_interval;
        let handle = std::thread::spawn(move || {
            collector::run(
                backend,
                pending.user_sym,
                pending.kernel_sym,
                interval,
                stop_rx,
                pending.samples_tx,
            );
        });

        let mut state = self.state.lock().unwrap();
        state.stop_tx = Some(stop_tx);
        state.handle = Some(handle);
        Ok(())
    }

    /// Cancel the collector, detach the backend and wait for the collector
    /// to exit. Returns the backend's stop error, if any. Idempotent after
    /// the first completed call.
    pub fn stop(&self) -> Result<(), ProfilerError> {
        let (stop_tx, handle) = {
            let mut state = self.state.lock().unwrap();
            state.started = false;
            (state.stop_tx.take(), state.handle.take())
        };

        // Dropping the stop sender is the cancellation signal.
        drop(stop_tx);

        let result = self.backend.stop();

        if let Some(handle) = handle {
            let _ = handle.join();
        }

        result.map_err(Into::into)
    }
}

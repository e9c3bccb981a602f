//! Coalesced progress reporting.
//!
//! A transfer reports `(phase, done, total)` through a single caller-supplied
//! callback. Completions arrive from many worker threads, so deltas funnel
//! through a mutex-guarded accumulator; emissions are coalesced to at most
//! one per 500 ms, with forced ticks at the start of a phase and whenever
//! `done == total`. Retry rollbacks feed negative deltas; `done` is clamped
//! to `[0, total]`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Transfer phase carried on every progress tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Hashing the local file or probing the remote one.
    Preparing,
    /// Moving bytes.
    Transferring,
    /// Concatenating downloaded parts into the destination file.
    Merging,
}

impl Phase {
    pub fn as_code(self) -> i32 {
        match self {
            Phase::Preparing => 1,
            Phase::Transferring => 2,
            Phase::Merging => 3,
        }
    }
}

/// Caller-facing progress callback.
pub type ProgressFn<'a> = dyn Fn(Phase, u64, u64) + Sync + 'a;

/// No-op handler for callers that don't care about progress.
pub fn noop_progress() -> &'static ProgressFn<'static> {
    &|_, _, _| {}
}

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(500);

struct SinkState {
    done: u64,
    last_tick: Instant,
}

/// One phase's worth of progress accumulation for a single transfer.
pub struct ProgressSink<'a> {
    handler: &'a ProgressFn<'a>,
    phase: Phase,
    total: u64,
    state: Mutex<SinkState>,
}

impl<'a> ProgressSink<'a> {
    pub fn new(handler: &'a ProgressFn<'a>, phase: Phase, total: u64, done: u64) -> Self {
        Self {
            handler,
            phase,
            total,
            state: Mutex::new(SinkState {
                done: done.min(total),
                last_tick: Instant::now(),
            }),
        }
    }

    /// Emits the phase's opening tick unconditionally.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        (self.handler)(self.phase, state.done, self.total);
        state.last_tick = Instant::now();
    }

    /// Applies a (possibly negative) byte delta and emits a tick when the
    /// coalescing window has elapsed or the phase just completed.
    pub fn add(&self, delta: i64) {
        let mut state = self.state.lock().unwrap();
        let done = state.done as i64 + delta;
        state.done = (done.max(0) as u64).min(self.total);
        if state.last_tick.elapsed() >= MIN_TICK_INTERVAL || state.done == self.total {
            (self.handler)(self.phase, state.done, self.total);
            state.last_tick = Instant::now();
        }
    }

    /// Current accumulated byte count.
    pub fn done(&self) -> u64 {
        self.state.lock().unwrap().done
    }
}

//! Shared helpers for the engine integration tests.
// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

pub mod disk_server;
pub mod range_server;

use bpan_core::progress::Phase;
use std::sync::Mutex;

/// Progress recorder: collects every tick for later assertions.
#[derive(Default)]
pub struct Ticks {
    ticks: Mutex<Vec<(Phase, u64, u64)>>,
}

impl Ticks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, phase: Phase, done: u64, total: u64) {
        self.ticks.lock().unwrap().push((phase, done, total));
    }

    pub fn all(&self) -> Vec<(Phase, u64, u64)> {
        self.ticks.lock().unwrap().clone()
    }

    /// Asserts `done` never decreases within any phase and the final tick of
    /// `phase` completes it.
    pub fn assert_monotonic_and_complete(&self, phase: Phase, total: u64) {
        let ticks = self.all();
        let of_phase: Vec<_> = ticks.iter().filter(|(p, _, _)| *p == phase).collect();
        assert!(!of_phase.is_empty(), "no ticks for {phase:?}");
        for pair in of_phase.windows(2) {
            assert!(pair[1].1 >= pair[0].1, "progress went backwards: {ticks:?}");
        }
        let last = of_phase.last().unwrap();
        assert_eq!(last.1, total, "last {phase:?} tick incomplete: {ticks:?}");
        assert_eq!(last.2, total);
    }
}

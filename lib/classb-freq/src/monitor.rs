// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime half of the frequency self-test.
//!
//! A [`FreqMonitor`] is driven by two interrupt handlers:
//!
//! - the monitored counter's overflow interrupt calls
//!   [`FreqMonitor::on_counter_overflow`], which extends the counter in
//!   software and trips if the counter keeps wrapping without a timebase
//!   tick;
//! - the independent timebase interrupt calls
//!   [`FreqMonitor::on_timebase_tick`], which measures how far the counter
//!   moved since the previous tick and trips if that's outside the reference
//!   plus or minus the tolerance.
//!
//! Each period is judged on its own: the baseline moves to the current count
//! on every tick, pass or fail, so drift never accumulates.
//!
//! Both handlers take `&self`, so the monitor can sit in a `static`. All of
//! the shared state is atomics that are only ever loaded and stored, and each
//! one has a single writer: `overflows` belongs to the overflow handler, the
//! rest to the tick handler (and to `arm`, which runs before either).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ringbuf::*;

use crate::config::{Config, ConfigError, DerivedLimits};
use crate::counter::{self, CounterSource, Snapshot};
use crate::fault::{FaultReason, FaultSink, Outcome};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Armed(Snapshot),
    SnapshotRetry(u32),
    Deviation { delta: u32, baseline: u32 },
    OverflowLimit { overflows: u32, deadline: u32 },
}

ringbuf!(Trace, 16, Trace::None);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Counter not started yet; overflows are counted but not judged.
    Idle,
    /// Baseline taken; every tick and overflow is checked.
    Armed,
}

/// Tracks the monitored counter and judges it on every timebase tick.
pub struct FreqMonitor<S: FaultSink> {
    limits: DerivedLimits,
    sink: S,
    armed: AtomicBool,
    /// Counter wraps since start, modulo 2^32.
    overflows: AtomicU32,
    /// Virtual count at the previous tick.
    baseline: AtomicU32,
    /// Last value of `overflows` that is still legitimate before the next
    /// tick.
    deadline: AtomicU32,
}

impl<S: FaultSink> FreqMonitor<S> {
    pub const fn new(limits: DerivedLimits, sink: S) -> Self {
        Self {
            limits,
            sink,
            armed: AtomicBool::new(false),
            overflows: AtomicU32::new(0),
            baseline: AtomicU32::new(0),
            deadline: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &Config, sink: S) -> Result<Self, ConfigError> {
        Ok(Self::new(config.derive()?, sink))
    }

    pub fn limits(&self) -> &DerivedLimits {
        &self.limits
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn state(&self) -> State {
        if self.armed.load(Ordering::Acquire) {
            State::Armed
        } else {
            State::Idle
        }
    }

    /// Overflows counted so far.
    pub fn overflow_count(&self) -> u32 {
        self.overflows.load(Ordering::Acquire)
    }

    /// Takes the first baseline. Call this right after starting the counter,
    /// before the timebase is enabled.
    pub fn arm<C: CounterSource + ?Sized>(&self, counter: &C) {
        let snap = self.snapshot(counter);
        self.rebase(snap);
        self.armed.store(true, Ordering::Release);
        ringbuf_entry!(Trace::Armed(snap));
    }

    /// Consistent view of the extended counter right now.
    pub fn snapshot<C: CounterSource + ?Sized>(&self, counter: &C) -> Snapshot {
        let (snap, retries) =
            counter::capture(&self.overflows, counter, self.limits.raw_mask());
        if retries != 0 {
            ringbuf_entry!(Trace::SnapshotRetry(retries));
        }
        snap
    }

    /// Overflow interrupt of the monitored counter.
    pub fn on_counter_overflow(&self) -> Outcome {
        let overflows = self.overflows.load(Ordering::Relaxed).wrapping_add(1);
        self.overflows.store(overflows, Ordering::Release);

        if !self.armed.load(Ordering::Acquire) {
            return Outcome::Pass;
        }

        let deadline = self.deadline.load(Ordering::Acquire);
        // Signed distance, so the comparison survives the counter wrapping.
        if (overflows.wrapping_sub(deadline) as i32) > 0 {
            ringbuf_entry!(Trace::OverflowLimit {
                overflows,
                deadline
            });
            return self.fail(FaultReason::OverflowLimitExceeded);
        }

        Outcome::Pass
    }

    /// Periodic interrupt of the independent timebase.
    ///
    /// If the monitor was never armed, this tick becomes the baseline and
    /// passes without a comparison.
    pub fn on_timebase_tick<C: CounterSource + ?Sized>(
        &self,
        counter: &C,
    ) -> Outcome {
        let snap = self.snapshot(counter);

        if !self.armed.load(Ordering::Acquire) {
            self.rebase(snap);
            self.armed.store(true, Ordering::Release);
            ringbuf_entry!(Trace::Armed(snap));
            return Outcome::Pass;
        }

        let now = snap.virtual_count(self.limits.counter_width());
        let baseline = self.baseline.load(Ordering::Acquire);
        let delta = now.wrapping_sub(baseline);

        let outcome = self.judge(delta);
        self.rebase(snap);

        if let Outcome::Fail(reason) = outcome {
            ringbuf_entry!(Trace::Deviation { delta, baseline });
            self.fail(reason);
        }
        outcome
    }

    /// Pass/fail for a counter delta over one timebase period.
    pub fn judge(&self, delta: u32) -> Outcome {
        let deviation = delta.abs_diff(self.limits.reference_count());
        if deviation > self.limits.max_abs_diff() {
            Outcome::Fail(FaultReason::DeviationExceeded)
        } else {
            Outcome::Pass
        }
    }

    fn rebase(&self, snap: Snapshot) {
        let deadline = snap
            .overflows
            .wrapping_add(self.limits.overflow_allowance(snap.raw));
        self.deadline.store(deadline, Ordering::Release);
        self.baseline.store(
            snap.virtual_count(self.limits.counter_width()),
            Ordering::Release,
        );
    }

    fn fail(&self, reason: FaultReason) -> Outcome {
        self.sink.report_fault(reason);
        Outcome::Fail(reason)
    }
}

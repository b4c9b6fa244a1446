// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Class B CPU frequency self-test.
//!
//! The test watches a timer/counter clocked from the CPU clock, using a
//! periodic interrupt from an independent oscillator (typically an RTC) as
//! the time reference. On every reference tick the counter should have
//! advanced by a known amount; if it's off by more than the configured
//! tolerance, the CPU clock is considered faulty. If instead the counter
//! keeps wrapping and no tick arrives, the reference is considered faulty.
//! Either way the fault goes to a [`FaultSink`].
//!
//! Hardware binding is left to the caller: set up the counter and the
//! timebase, give the monitor a [`CounterSource`], and call
//! [`FreqMonitor::on_counter_overflow`] and [`FreqMonitor::on_timebase_tick`]
//! from the two interrupt handlers.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod counter;
pub mod fault;
pub mod monitor;

pub use config::{
    Config, ConfigError, DerivedLimits, Prescaler, DEFAULT_COUNTER_WIDTH,
};
pub use counter::{CounterSource, Snapshot};
pub use fault::{FaultLatch, FaultReason, FaultSink, Outcome};
pub use monitor::{FreqMonitor, State};

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::sync::atomic::{AtomicU32, Ordering};

use num_derive::{FromPrimitive, ToPrimitive};

/// Why the frequency test failed. The discriminants are the codes handed to
/// whatever sits behind [`FaultSink`], so they must not change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum FaultReason {
    /// The monitored counter advanced too much or too little over one
    /// timebase period: the system clock is off.
    DeviationExceeded = 1,
    /// The monitored counter wrapped more often than one period allows: the
    /// timebase interrupt has gone missing.
    OverflowLimitExceeded = 2,
}

impl FaultReason {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Bit used for this reason in a latched error word.
    #[inline]
    pub const fn bit(self) -> u32 {
        1 << (self as u32 - 1)
    }
}

/// Result of one check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(FaultReason),
}

impl Outcome {
    #[inline]
    pub fn is_pass(self) -> bool {
        self == Outcome::Pass
    }
}

/// Receives faults from interrupt context.
///
/// This is where the system decides what a failed clock means (safe state,
/// reset, ...). It's called synchronously from the handler that detected the
/// fault, so it must not block; it may well never return.
pub trait FaultSink {
    fn report_fault(&self, reason: FaultReason);
}

impl<F: Fn(FaultReason)> FaultSink for F {
    fn report_fault(&self, reason: FaultReason) {
        self(reason)
    }
}

/// A sink that latches each reported reason into an error word, for the
/// application to poll from its main loop. Nothing clears it but `clear`.
#[derive(Debug, Default)]
pub struct FaultLatch {
    bits: AtomicU32,
}

impl FaultLatch {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn is_set(&self, reason: FaultReason) -> bool {
        self.bits() & reason.bit() != 0
    }

    pub fn any(&self) -> bool {
        self.bits() != 0
    }

    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

impl FaultSink for FaultLatch {
    fn report_fault(&self, reason: FaultReason) {
        // No fetch_or on cores without atomic read-modify-write.
        critical_section::with(|_| {
            let bits = self.bits.load(Ordering::Relaxed);
            self.bits.store(bits | reason.bit(), Ordering::Release);
        });
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The monitored counter, as far as the self-test is concerned.
//!
//! The hardware counter is only `counter_width` bits wide; the overflow
//! handler extends it in software. Reading the two halves is racy: read the
//! overflow count first and the register may wrap before we read it (the
//! result is a whole period too low); read the register first and the
//! overflow handler may run before we read the count (a whole period too
//! high). `capture` closes both windows by re-reading until nothing moved
//! underneath it, and by folding in a wrap the hardware has flagged but the
//! overflow handler hasn't serviced yet.

use core::sync::atomic::{AtomicU32, Ordering};

/// Read access to the free-running counter under test.
pub trait CounterSource {
    /// Current value of the count register. Bits above the counter width are
    /// ignored.
    fn raw_count(&self) -> u32;

    /// Whether the counter has wrapped without its overflow handler having
    /// run yet. Implementations whose overflow interrupt always preempts the
    /// timebase interrupt can leave this as `false`.
    fn overflow_pending(&self) -> bool {
        false
    }
}

impl<F: Fn() -> u32> CounterSource for F {
    fn raw_count(&self) -> u32 {
        self()
    }
}

/// A coherent `(overflow count, raw count)` pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub overflows: u32,
    pub raw: u32,
}

impl Snapshot {
    /// The counter extended to 32 bits. Wraps modulo 2^32, which is fine as
    /// long as deltas are taken with wrapping subtraction.
    #[inline]
    pub const fn virtual_count(&self, counter_width: u32) -> u32 {
        (self.overflows << counter_width) | self.raw
    }
}

/// Reads `overflows` and the counter as one consistent snapshot. Returns the
/// snapshot and how many times it had to start over.
///
/// Never waits on anything: a retry means an overflow was serviced or
/// flagged mid-read, and that can't happen again until the counter has made
/// a full trip, so in practice this loops at most twice.
pub fn capture<C: CounterSource + ?Sized>(
    overflows: &AtomicU32,
    counter: &C,
    raw_mask: u32,
) -> (Snapshot, u32) {
    let mut retries = 0;
    loop {
        let epoch = overflows.load(Ordering::Acquire);
        let pending = counter.overflow_pending();
        let raw = counter.raw_count() & raw_mask;

        if counter.overflow_pending() != pending
            || overflows.load(Ordering::Acquire) != epoch
        {
            retries += 1;
            continue;
        }

        // The flag was already up before we read the register, so the
        // register has wrapped and the wrap isn't counted yet.
        let overflows = if pending { epoch.wrapping_add(1) } else { epoch };
        return (Snapshot { overflows, raw }, retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    const MASK: u32 = 0xffff;

    #[test]
    fn virtual_count_composes_both_halves() {
        let snap = Snapshot {
            overflows: 3,
            raw: 0x1234,
        };
        assert_eq!(snap.virtual_count(16), 0x0003_1234);
        assert_eq!(snap.virtual_count(8), 0x0000_1234 | (3 << 8));
    }

    #[test]
    fn virtual_count_wraps_with_the_overflow_count() {
        let snap = Snapshot {
            overflows: 0x1_0001,
            raw: 5,
        };
        assert_eq!(snap.virtual_count(16), 0x0001_0005);
    }

    #[test]
    fn quiet_counter_needs_no_retry() {
        let overflows = AtomicU32::new(7);
        let (snap, retries) = capture(&overflows, &|| 0x8000_u32, MASK);
        assert_eq!(
            snap,
            Snapshot {
                overflows: 7,
                raw: 0x8000
            }
        );
        assert_eq!(retries, 0);
    }

    #[test]
    fn raw_count_is_masked_to_the_counter_width() {
        let overflows = AtomicU32::new(0);
        let (snap, _) = capture(&overflows, &|| 0xdead_beef_u32, MASK);
        assert_eq!(snap.raw, 0xbeef);
    }

    struct Preempted<'a> {
        overflows: &'a AtomicU32,
        fired: Cell<bool>,
    }

    impl CounterSource for Preempted<'_> {
        fn raw_count(&self) -> u32 {
            if !self.fired.replace(true) {
                // Overflow handler runs between our two loads.
                let n = self.overflows.load(Ordering::Relaxed);
                self.overflows.store(n + 1, Ordering::Relaxed);
            }
            3
        }
    }

    #[test]
    fn overflow_serviced_mid_read_is_retried() {
        let overflows = AtomicU32::new(4);
        let counter = Preempted {
            overflows: &overflows,
            fired: Cell::new(false),
        };
        let (snap, retries) = capture(&overflows, &counter, MASK);
        assert_eq!(snap, Snapshot { overflows: 5, raw: 3 });
        assert_eq!(retries, 1);
    }

    struct Flagged {
        pending: bool,
        raw: u32,
    }

    impl CounterSource for Flagged {
        fn raw_count(&self) -> u32 {
            self.raw
        }

        fn overflow_pending(&self) -> bool {
            self.pending
        }
    }

    #[test]
    fn pending_wrap_is_counted() {
        let overflows = AtomicU32::new(9);
        let counter = Flagged {
            pending: true,
            raw: 12,
        };
        let (snap, _) = capture(&overflows, &counter, MASK);
        assert_eq!(snap, Snapshot { overflows: 10, raw: 12 });
    }

    struct WrapsWhileReading {
        reads: Cell<u32>,
    }

    impl CounterSource for WrapsWhileReading {
        fn raw_count(&self) -> u32 {
            self.reads.set(self.reads.get() + 1);
            if self.reads.get() == 1 {
                0x0002
            } else {
                0x0005
            }
        }

        // The wrap gets flagged right after the first register read.
        fn overflow_pending(&self) -> bool {
            self.reads.get() >= 1
        }
    }

    #[test]
    fn wrap_flagged_mid_read_is_retried() {
        let overflows = AtomicU32::new(0);
        let counter = WrapsWhileReading {
            reads: Cell::new(0),
        };
        let (snap, retries) = capture(&overflows, &counter, MASK);
        assert_eq!(snap, Snapshot { overflows: 1, raw: 5 });
        assert_eq!(retries, 1);
    }
}

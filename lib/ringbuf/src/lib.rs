// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing interrupt handlers
//!
//! This contains a static ring buffer intended to instrument code that runs
//! in interrupt context, where formatting and allocation are off the table.
//! Declare one per module with `ringbuf!` and record into it with
//! `ringbuf_entry!`:
//!
//! ```ignore
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Tick(u32),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! fn on_tick(count: u32) {
//!     ringbuf_entry!(Trace::Tick(count));
//! }
//! ```
//!
//! Each entry records the source line it came from. A payload identical to
//! the previous one from the same line bumps that entry's count instead of
//! taking a new slot, so a hot loop doesn't wipe out the rest of the history.
//! The buffer lives behind a `critical_section::Mutex`, so handlers that
//! preempt one another can all write to the same buffer.
//!
//! Enabling the `disabled` feature leaves the macros in place but compiles
//! the buffers out.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u16,
    pub payload: T,
}

#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if N == 0 {
            return;
        }

        let ndx = match self.last {
            None => 0,
            Some(last) => {
                let ent = &mut self.buffer[last];

                if ent.line == line && ent.payload == payload {
                    if let Some(count) = ent.count.checked_add(1) {
                        ent.count = count;
                        return;
                    }
                }

                if last + 1 >= N {
                    0
                } else {
                    last + 1
                }
            }
        };

        let ent = &mut self.buffer[ndx];
        ent.line = line;
        ent.payload = payload;
        ent.count = 1;
        ent.generation = ent.generation.wrapping_add(1);

        self.last = Some(ndx);
    }

    /// Returns the most recently written entry, if any.
    pub fn latest(&self) -> Option<&RingbufEntry<T>> {
        self.last.map(|ndx| &self.buffer[ndx])
    }

    /// Iterates over the populated entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N])
            .filter(|ent| ent.generation != 0)
    }
}

/// A `Ringbuf` that can live in a `static` and be written from any context.
pub struct StaticRingbuf<T: Copy + PartialEq, const N: usize> {
    inner: critical_section::Mutex<RefCell<Ringbuf<T, N>>>,
}

impl<T: Copy + PartialEq, const N: usize> StaticRingbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: critical_section::Mutex::new(RefCell::new(Ringbuf::new(
                init,
            ))),
        }
    }

    #[inline]
    pub fn entry(&self, line: u16, payload: T) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).entry(line, payload)
        });
    }

    /// Runs `f` against the buffer contents, e.g. to dump them from a test
    /// or a debug command.
    pub fn inspect<R>(&self, f: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        critical_section::with(|cs| f(&self.inner.borrow_ref(cs)))
    }
}

/// Declares a ring buffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ring buffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ring buffer will be static, so `NAME` should be uppercase.
/// If you omit the name, it defaults to `__RINGBUF`, which is what
/// `ringbuf_entry!` with a single argument writes to.
///
/// `Type` must be `Copy + PartialEq`; the latter is what lets repeated
/// entries collapse into a count.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticRingbuf<$t, $n> =
            $crate::StaticRingbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {};
    ($t:ty, $n:expr, $init:expr) => {};
}

/// Inserts data into a named ring buffer (which should have been declared
/// with the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ring buffer
/// called `NAME`. With a single argument, the entry goes into the default
/// `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {
        $buf.entry(line!() as u16, $payload)
    };
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload)
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-test configuration and the limits derived from it.
//!
//! Everything here is `const fn`, so a configuration fixed at build time can
//! be checked by the compiler:
//!
//! ```
//! use classb_freq::{Config, DerivedLimits, Prescaler};
//!
//! const CONFIG: Config = Config {
//!     system_frequency_hz: 2_000_000,
//!     prescaler: Prescaler::Div64,
//!     tolerance_percent: 25,
//!     timebase_period: 32,
//!     timebase_frequency_hz: 1000,
//!     counter_width: 16,
//! };
//!
//! const LIMITS: DerivedLimits = match CONFIG.derive() {
//!     Ok(limits) => limits,
//!     Err(_) => panic!("bad frequency self-test configuration"),
//! };
//!
//! assert_eq!(LIMITS.reference_count(), 1000);
//! assert_eq!(LIMITS.max_abs_diff(), 250);
//! assert_eq!(LIMITS.max_overflow_count(), 0);
//! ```
//!
//! All divisions truncate. The intermediate products are carried in 64 bits,
//! which is exact for any pair of 32-bit operands, so the only rounding is
//! the final floor.

use num_derive::{FromPrimitive, ToPrimitive};

/// Width of the 16-bit timer/counters this test was first written for.
pub const DEFAULT_COUNTER_WIDTH: u32 = 16;

/// Divisor between the system clock and the monitored counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum Prescaler {
    Div1 = 1,
    Div2 = 2,
    Div4 = 4,
    Div8 = 8,
    Div64 = 64,
    Div256 = 256,
    Div1024 = 1024,
}

impl Prescaler {
    #[inline]
    pub const fn divisor(self) -> u32 {
        self as u32
    }
}

/// Frequency self-test settings, fixed for the life of the firmware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Expected system clock frequency. Only used to compute the reference;
    /// it does not set the clock, so a deliberately wrong value is a handy
    /// way to check that the test trips.
    pub system_frequency_hz: u32,
    pub prescaler: Prescaler,
    /// Allowed deviation between measured and expected count, in percent.
    pub tolerance_percent: u32,
    /// Timebase interrupt period, in ticks of `timebase_frequency_hz`.
    pub timebase_period: u32,
    pub timebase_frequency_hz: u32,
    /// Bit width of the monitored counter's count register.
    pub counter_width: u32,
}

/// Constants computed once from a [`Config`].
///
/// The only way to get one is [`Config::derive`], so a monitor never runs
/// on limits that failed validation:
///
/// ```compile_fail
/// use classb_freq::DerivedLimits;
///
/// let limits = DerivedLimits {
///     reference_count: 0,
///     max_abs_diff: 0,
///     max_overflow_count: 0,
///     counter_width: 32,
/// };
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DerivedLimits {
    reference_count: u32,
    max_abs_diff: u32,
    max_overflow_count: u32,
    counter_width: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Counter width is zero or leaves no room for an overflow count.
    CounterWidth,
    ZeroTimebaseFrequency,
    /// The timebase period is too short (or the counter too slow) to see a
    /// single count.
    ZeroReference,
    ReferenceOverflow,
    /// `reference_count + max_abs_diff` doesn't fit the 32-bit virtual count.
    LimitOverflow,
}

impl Config {
    /// Monitored counter frequency; truncates like the hardware divider.
    #[inline]
    pub const fn counter_frequency_hz(&self) -> u32 {
        self.system_frequency_hz / self.prescaler.divisor()
    }

    pub const fn derive(&self) -> Result<DerivedLimits, ConfigError> {
        if self.counter_width == 0 || self.counter_width >= u32::BITS {
            return Err(ConfigError::CounterWidth);
        }
        if self.timebase_frequency_hz == 0 {
            return Err(ConfigError::ZeroTimebaseFrequency);
        }

        let reference = self.counter_frequency_hz() as u64
            * self.timebase_period as u64
            / self.timebase_frequency_hz as u64;
        if reference == 0 {
            return Err(ConfigError::ZeroReference);
        }
        if reference > u32::MAX as u64 {
            return Err(ConfigError::ReferenceOverflow);
        }

        let max_abs_diff = reference * self.tolerance_percent as u64 / 100;
        let ceiling = reference + max_abs_diff;
        if ceiling > u32::MAX as u64 {
            return Err(ConfigError::LimitOverflow);
        }

        Ok(DerivedLimits {
            reference_count: reference as u32,
            max_abs_diff: max_abs_diff as u32,
            max_overflow_count: (ceiling >> self.counter_width) as u32,
            counter_width: self.counter_width,
        })
    }
}

impl DerivedLimits {
    /// Expected counter delta over one timebase period.
    #[inline]
    pub const fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Largest accepted `|delta - reference_count|`.
    #[inline]
    pub const fn max_abs_diff(&self) -> u32 {
        self.max_abs_diff
    }

    /// Counter wraps allowed within one period (starting from a zero count)
    /// before the timebase itself is suspected.
    #[inline]
    pub const fn max_overflow_count(&self) -> u32 {
        self.max_overflow_count
    }

    /// Bit width of the count register, between 1 and 31.
    #[inline]
    pub const fn counter_width(&self) -> u32 {
        self.counter_width
    }

    /// Mask selecting the raw count bits of a virtual count.
    #[inline]
    pub const fn raw_mask(&self) -> u32 {
        (1u32 << self.counter_width) - 1
    }

    /// Largest delta that still passes the deviation check.
    #[inline]
    pub const fn ceiling(&self) -> u32 {
        self.reference_count.saturating_add(self.max_abs_diff)
    }

    /// Overflows allowed in a period that starts with the counter at `raw`.
    ///
    /// From a zero count this is `max_overflow_count`. A period that starts
    /// part-way up the counter can legitimately straddle one more wrap.
    #[inline]
    pub const fn overflow_allowance(&self, raw: u32) -> u32 {
        let raw = (raw & self.raw_mask()) as u64;
        ((raw + self.ceiling() as u64) >> self.counter_width) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    fn scenario_a() -> Config {
        Config {
            system_frequency_hz: 2_000_000,
            prescaler: Prescaler::Div64,
            tolerance_percent: 25,
            timebase_period: 32,
            timebase_frequency_hz: 1000,
            counter_width: DEFAULT_COUNTER_WIDTH,
        }
    }

    #[test]
    fn scenario_a_limits() {
        let limits = scenario_a().derive().unwrap();
        assert_eq!(scenario_a().counter_frequency_hz(), 31_250);
        assert_eq!(limits.reference_count(), 1000);
        assert_eq!(limits.max_abs_diff(), 250);
        assert_eq!(limits.max_overflow_count(), 0);
        assert_eq!(limits.raw_mask(), 0xffff);
    }

    #[test]
    fn reference_is_floored() {
        // 31250 * 33 / 1000 = 1031.25
        let cfg = Config {
            timebase_period: 33,
            ..scenario_a()
        };
        let limits = cfg.derive().unwrap();
        assert_eq!(limits.reference_count(), 1031);
        // 1031 * 25 / 100 = 257.75
        assert_eq!(limits.max_abs_diff(), 257);
    }

    #[test]
    fn counter_frequency_truncates() {
        let cfg = Config {
            system_frequency_hz: 1_000_001,
            prescaler: Prescaler::Div2,
            ..scenario_a()
        };
        assert_eq!(cfg.counter_frequency_hz(), 500_000);
    }

    #[test]
    fn wide_intermediate_does_not_truncate() {
        // The product is well past 32 bits; the result isn't.
        let cfg = Config {
            system_frequency_hz: 48_000_000,
            prescaler: Prescaler::Div1,
            tolerance_percent: 10,
            timebase_period: 32_768,
            timebase_frequency_hz: 32_768,
            counter_width: 16,
        };
        let limits = cfg.derive().unwrap();
        assert_eq!(limits.reference_count(), 48_000_000);
        assert_eq!(limits.max_abs_diff(), 4_800_000);
        assert_eq!(limits.max_overflow_count(), 52_800_000 >> 16);
    }

    #[test]
    fn max_overflow_count_tracks_counter_width() {
        let cfg = Config {
            timebase_period: 3200,
            ..scenario_a()
        };
        let limits = cfg.derive().unwrap();
        assert_eq!(limits.reference_count(), 100_000);
        assert_eq!(limits.max_abs_diff(), 25_000);
        assert_eq!(limits.max_overflow_count(), 1);

        let narrow = Config {
            counter_width: 8,
            ..cfg
        };
        assert_eq!(narrow.derive().unwrap().max_overflow_count(), 125_000 >> 8);
    }

    #[test]
    fn zero_tolerance() {
        let cfg = Config {
            tolerance_percent: 0,
            ..scenario_a()
        };
        let limits = cfg.derive().unwrap();
        assert_eq!(limits.max_abs_diff(), 0);
        assert_eq!(limits.ceiling(), 1000);
    }

    #[test]
    fn rejects_zero_reference() {
        let cfg = Config {
            system_frequency_hz: 1000,
            prescaler: Prescaler::Div1024,
            ..scenario_a()
        };
        assert_eq!(cfg.derive(), Err(ConfigError::ZeroReference));

        let cfg = Config {
            timebase_period: 0,
            ..scenario_a()
        };
        assert_eq!(cfg.derive(), Err(ConfigError::ZeroReference));
    }

    #[test]
    fn rejects_zero_timebase_frequency() {
        let cfg = Config {
            timebase_frequency_hz: 0,
            ..scenario_a()
        };
        assert_eq!(cfg.derive(), Err(ConfigError::ZeroTimebaseFrequency));
    }

    #[test]
    fn rejects_bad_counter_width() {
        for width in [0, 32, 64] {
            let cfg = Config {
                counter_width: width,
                ..scenario_a()
            };
            assert_eq!(cfg.derive(), Err(ConfigError::CounterWidth));
        }
    }

    #[test]
    fn rejects_overflowing_reference() {
        let cfg = Config {
            system_frequency_hz: u32::MAX,
            prescaler: Prescaler::Div1,
            timebase_period: 2,
            timebase_frequency_hz: 1,
            ..scenario_a()
        };
        assert_eq!(cfg.derive(), Err(ConfigError::ReferenceOverflow));
    }

    #[test]
    fn rejects_overflowing_ceiling() {
        let cfg = Config {
            system_frequency_hz: 4_000_000_000,
            prescaler: Prescaler::Div1,
            tolerance_percent: 10,
            timebase_period: 1,
            timebase_frequency_hz: 1,
            ..scenario_a()
        };
        assert_eq!(cfg.derive(), Err(ConfigError::LimitOverflow));
    }

    #[test]
    fn prescaler_from_raw_divisor() {
        assert_eq!(Prescaler::from_u32(64), Some(Prescaler::Div64));
        assert_eq!(Prescaler::from_u32(1024), Some(Prescaler::Div1024));
        assert_eq!(Prescaler::from_u32(16), None);
        assert_eq!(Prescaler::from_u32(0), None);
    }

    #[test]
    fn overflow_allowance_accounts_for_start_position() {
        let limits = scenario_a().derive().unwrap();
        assert_eq!(limits.overflow_allowance(0), 0);
        assert_eq!(limits.overflow_allowance(64_000), 0);
        assert_eq!(limits.overflow_allowance(64_400), 1);
        assert_eq!(limits.overflow_allowance(0xffff), 1);
    }

    const CHECKED: DerivedLimits = match (Config {
        system_frequency_hz: 2_000_000,
        prescaler: Prescaler::Div64,
        tolerance_percent: 25,
        timebase_period: 32,
        timebase_frequency_hz: 1000,
        counter_width: 16,
    })
    .derive()
    {
        Ok(limits) => limits,
        Err(_) => panic!(),
    };

    #[test]
    fn derives_in_const_context() {
        assert_eq!(CHECKED, scenario_a().derive().unwrap());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// This is currently measured in an arbitrary "tick" unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<[u32; 2]> for Timestamp {
    fn from(v: [u32; 2]) -> Self {
        Self::from(u64::from(v[0]) | u64::from(v[1]) << 32)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

/// Converts a duration given in `from_hz`-denominated units (e.g.
/// microseconds, `from_hz == 1_000_000`) into kernel ticks, at the board's
/// configured tick rate (`arch::clock_freq_hz`). Send/recv IPC timeouts are
/// carried in messages as Hz-relative durations rather than raw tick
/// counts, so this is the one call site in the kernel that needs the
/// generic conversion in `kerncore::convert`.
pub fn ticks_from_hz(
    value: u64,
    from_hz: u32,
    rounding: kerncore::Rounding,
) -> u64 {
    kerncore::convert(
        u64::from(from_hz),
        u64::from(crate::arch::clock_freq_hz()),
        value,
        rounding,
    )
}

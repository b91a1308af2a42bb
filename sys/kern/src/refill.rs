// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin `Timestamp`-flavored wrapper around `kerncore::refill`, which does
//! the actual sporadic-server bookkeeping in plain `u64` ticks so it can be
//! unit tested on a host target. This module just re-exports the type and
//! constant under kernel-friendly names and adds `Timestamp` conversions at
//! the boundary.

use crate::time::Timestamp;

pub use kerncore::refill::MAX_REFILLS;

/// A task's scheduling-context state: its static reservation plus the
/// live circular buffer of refills. See `kerncore::refill::ScContext` for
/// the sporadic-server algorithm itself.
#[derive(Copy, Clone, Debug)]
pub struct ScContext(kerncore::refill::ScContext);

impl ScContext {
    pub fn new(budget: u32, period: u32, max_refills: usize, now: Timestamp) -> Self {
        ScContext(kerncore::refill::ScContext::new(
            budget,
            period,
            max_refills,
            u64::from(now),
        ))
    }

    pub fn is_round_robin(&self) -> bool {
        self.0.is_round_robin()
    }

    pub fn budget(&self) -> u32 {
        self.0.budget()
    }

    pub fn period(&self) -> u32 {
        self.0.period()
    }

    pub fn refill_sum(&self) -> u64 {
        self.0.refill_sum()
    }

    /// Whether this context currently has budget available to run.
    pub fn budget_check(&self, now: Timestamp) -> bool {
        self.0.budget_check(u64::from(now))
    }

    /// Budget immediately usable at `now` without blocking.
    pub fn noblock_check(&self, now: Timestamp) -> u32 {
        self.0.noblock_check(u64::from(now))
    }

    /// Accounts for `used` ticks of budget consumed ending at `now`.
    pub fn schedule_used(&mut self, used: u32, now: Timestamp) {
        self.0.schedule_used(used, u64::from(now))
    }

    /// Replaces this context's reservation, per the `Schedule` syscall.
    pub fn update(
        &mut self,
        budget: u32,
        period: u32,
        max_refills: usize,
        now: Timestamp,
    ) {
        self.0.update(budget, period, max_refills, u64::from(now))
    }

    /// Ticks until the next refill matures, or `None` if one already has.
    pub fn ticks_until_ready(&self, now: Timestamp) -> Option<u64> {
        self.0.ticks_until_ready(u64::from(now))
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sporadic-server scheduling context budgets.
//!
//! A scheduling context (SC) reserves `budget` ticks of CPU time out of
//! every `period` ticks. Rather than simply refilling the whole budget at
//! the start of each period (which lets a task that saved up idle time
//! burst for much longer than its reservation implies), we track the
//! history of what was actually consumed as a small list of "refills":
//! each chunk of budget that was spent becomes a refill that matures
//! (`ready_at`) exactly one period after it started being spent. This is
//! the standard sporadic-server technique for bounding worst-case
//! interference while still allowing a context to spend its whole budget
//! in one burst if it likes.
//!
//! `period == 0` designates a round-robin context: it has no fixed budget
//! and is always considered ready. Time is plain `u64` ticks here rather
//! than any kernel-specific timestamp type, so this logic can be exercised
//! on a host without pulling in the rest of the kernel.

/// Maximum number of outstanding refills a scheduling context can track.
/// Bounded so the whole structure can live inline without allocation;
/// `max_refills` (configured per task, at most this) further restricts how
/// many of these slots are actually used.
pub const MAX_REFILLS: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Refill {
    amount: u32,
    ready_at: u64,
}

/// A task's scheduling-context state: its static reservation plus the
/// live circular buffer of refills.
#[derive(Copy, Clone, Debug)]
pub struct ScContext {
    budget: u32,
    period: u32,
    max_refills: usize,
    refills: [Refill; MAX_REFILLS],
    /// Index of the oldest (next-to-mature) refill.
    head: usize,
    /// Number of refills currently queued, starting at `head`.
    count: usize,
}

impl ScContext {
    /// Creates a new context with its entire budget available starting at
    /// `now`. A `period` of zero makes this a round-robin context.
    pub fn new(budget: u32, period: u32, max_refills: usize, now: u64) -> Self {
        let max_refills = if max_refills == 0 || max_refills > MAX_REFILLS {
            MAX_REFILLS
        } else {
            max_refills
        };
        let mut refills = [Refill { amount: 0, ready_at: 0 }; MAX_REFILLS];
        refills[0] = Refill {
            amount: budget,
            ready_at: now,
        };
        ScContext {
            budget,
            period,
            max_refills,
            refills,
            head: 0,
            count: 1,
        }
    }

    pub fn is_round_robin(&self) -> bool {
        self.period == 0
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % MAX_REFILLS
    }

    /// Total budget represented by all queued refills. For a well-formed
    /// context this always equals `budget` (every tick consumed is
    /// eventually refilled exactly once), which is checked by
    /// `assert_refill_sum` in debug builds.
    pub fn refill_sum(&self) -> u64 {
        (0..self.count)
            .map(|i| u64::from(self.refills[self.slot(i)].amount))
            .sum()
    }

    /// Debug-only invariant: the refill list always accounts for exactly
    /// `budget` ticks (round-robin contexts are exempt, since they have no
    /// fixed budget to conserve).
    fn assert_refill_sum(&self) {
        debug_assert!(
            self.is_round_robin() || self.refill_sum() == u64::from(self.budget)
        );
    }

    /// Debug-only invariant: refills mature in non-decreasing order,
    /// oldest first.
    fn assert_refill_ordered(&self) {
        for i in 1..self.count {
            let prev = self.refills[self.slot(i - 1)].ready_at;
            let cur = self.refills[self.slot(i)].ready_at;
            debug_assert!(prev <= cur);
        }
    }

    /// Whether this context currently has budget available to run,
    /// i.e. whether its oldest refill has matured by `now`.
    ///
    /// This is `budget_check` from the sporadic-server literature: a
    /// round-robin context always passes.
    pub fn budget_check(&self, now: u64) -> bool {
        if self.is_round_robin() {
            return true;
        }
        self.refills[self.head].ready_at <= now
    }

    /// Returns the amount of budget immediately usable at `now` without
    /// blocking (the `noblock_check`): the sum of all refills that have
    /// already matured.
    pub fn noblock_check(&self, now: u64) -> u32 {
        if self.is_round_robin() {
            return self.budget;
        }
        let mut sum = 0u32;
        for i in 0..self.count {
            let r = self.refills[self.slot(i)];
            if r.ready_at > now {
                break;
            }
            sum = sum.saturating_add(r.amount);
        }
        sum
    }

    /// If the head refill has more budget than we're about to use, splits
    /// it into a `used`-sized refill (left in place, since it's already
    /// matured) and a remainder that keeps the old `ready_at`. This is
    /// `split_check`: it's what lets a context consume part of a refill
    /// and return the rest to the pool unconsumed, rather than having to
    /// account for all-or-nothing refill granules.
    fn split_check(&mut self, used: u32) {
        let head = self.refills[self.head];
        if used < head.amount && self.count < self.max_refills {
            let remainder = head.amount - used;
            self.refills[self.head].amount = used;
            let new_slot = self.slot(self.count);
            self.refills[new_slot] = Refill {
                amount: remainder,
                ready_at: head.ready_at,
            };
            self.count += 1;
        }
    }

    /// Accounts for `used` ticks of budget consumed ending at `now`:
    /// splits off any unused remainder of the head refill, then retires
    /// the (now fully spent) head refill by rescheduling it to mature one
    /// period after *the retired refill's own maturity*, not one period
    /// after `now` -- `schedule_used`. Round-robin contexts track nothing;
    /// this is a no-op for them.
    pub fn schedule_used(&mut self, used: u32, now: u64) {
        if self.is_round_robin() || used == 0 {
            return;
        }
        self.assert_refill_ordered();
        debug_assert!(now >= self.refills[self.head].ready_at);

        let head_ready_at = self.refills[self.head].ready_at;
        self.split_check(used);

        // Pop the (now used-up) head and re-enqueue it at the tail,
        // matured one period after the retired refill's own maturity, not
        // one period after `now` -- otherwise budget consumed partway
        // through a refill's matured lifetime would push replenishment out
        // further than the reservation promises.
        let used_amount = self.refills[self.head].amount;
        let ready_at = head_ready_at + u64::from(self.period);
        self.head = self.slot(1);
        self.count -= 1;
        let tail = self.slot(self.count);
        self.refills[tail] = Refill {
            amount: used_amount,
            ready_at,
        };
        self.count += 1;

        // Merge trailing refills that share a maturity time, to keep the
        // list from filling up with slivers under heavy use.
        while self.count > 1 {
            let last = self.slot(self.count - 1);
            let prev = self.slot(self.count - 2);
            if self.refills[prev].ready_at == self.refills[last].ready_at {
                self.refills[prev].amount += self.refills[last].amount;
                self.count -= 1;
            } else {
                break;
            }
        }

        self.assert_refill_sum();
        self.assert_refill_ordered();
    }

    /// Replaces this context's reservation with a new budget/period/
    /// max_refills triple, discarding any outstanding refills and granting
    /// the full new budget starting at `now`. Used by `Schedule` to let a
    /// task with sufficient privilege re-parent another task's scheduling
    /// context.
    pub fn update(
        &mut self,
        new_budget: u32,
        new_period: u32,
        new_max_refills: usize,
        now: u64,
    ) {
        *self = Self::new(new_budget, new_period, new_max_refills, now);
    }

    /// Ticks until the next refill matures, or `None` if one has already
    /// matured (or this is a round-robin context).
    pub fn ticks_until_ready(&self, now: u64) -> Option<u64> {
        if self.is_round_robin() {
            return None;
        }
        let ready_at = self.refills[self.head].ready_at;
        if ready_at <= now {
            None
        } else {
            Some(ready_at - now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_always_ready() {
        let sc = ScContext::new(0, 0, 4, 0);
        assert!(sc.is_round_robin());
        assert!(sc.budget_check(1_000_000));
        assert_eq!(sc.noblock_check(0), 0);
    }

    #[test]
    fn fresh_context_is_ready_with_full_budget() {
        let sc = ScContext::new(100, 1000, 4, 0);
        assert!(sc.budget_check(0));
        assert_eq!(sc.noblock_check(0), 100);
        assert_eq!(sc.refill_sum(), 100);
    }

    #[test]
    fn schedule_used_splits_and_conserves_budget() {
        let mut sc = ScContext::new(100, 1000, 4, 0);
        sc.schedule_used(40, 40);
        // Remainder of 60 should be immediately usable.
        assert_eq!(sc.noblock_check(40), 60);
        // Total budget is conserved across the refill list.
        assert_eq!(sc.refill_sum(), 100);
    }

    #[test]
    fn retired_refill_matures_one_period_after_its_own_ready_at() {
        // A context created at 0, fully matured, partially consumed (300 of
        // 1000) at tick 300: the consumed chunk must come back at
        // (0 + period) = 5000, not (300 + period) = 5300. The untouched
        // remainder (700) stays immediately usable.
        let mut sc = ScContext::new(1000, 5000, 4, 0);
        sc.schedule_used(300, 300);
        assert_eq!(sc.noblock_check(300), 700);
        assert_eq!(sc.refills_for_test(), [(700, 0), (300, 5000)].as_slice());
        assert_eq!(sc.refill_sum(), 1000);
    }

    #[test]
    fn exhausting_budget_blocks_until_next_period() {
        let mut sc = ScContext::new(50, 200, 4, 0);
        sc.schedule_used(50, 10);
        assert!(!sc.budget_check(10));
        assert!(sc.budget_check(210));
        assert_eq!(sc.refill_sum(), 50);
    }

    #[test]
    fn repeated_partial_use_does_not_exceed_max_refills() {
        let mut sc = ScContext::new(100, 50, 2, 0);
        // Use small chunks repeatedly; the refill count must never exceed
        // max_refills, so the merge-on-overflow path has to kick in.
        let mut now = 0u64;
        for _ in 0..20 {
            sc.schedule_used(5, now);
            now += 5;
            assert!(sc.count_for_test() <= 2);
            assert_eq!(sc.refill_sum(), 100);
        }
    }

    impl ScContext {
        fn count_for_test(&self) -> usize {
            self.count
        }

        /// Snapshot of the live refill list, oldest (head) first, as plain
        /// `(amount, ready_at)` pairs for assertions.
        fn refills_for_test(&self) -> RefillSnapshot {
            let mut buf = [(0u32, 0u64); MAX_REFILLS];
            for i in 0..self.count {
                let r = self.refills[self.slot(i)];
                buf[i] = (r.amount, r.ready_at);
            }
            RefillSnapshot { buf, len: self.count }
        }
    }

    #[derive(Debug)]
    struct RefillSnapshot {
        buf: [(u32, u64); MAX_REFILLS],
        len: usize,
    }

    impl PartialEq<&[(u32, u64)]> for RefillSnapshot {
        fn eq(&self, other: &&[(u32, u64)]) -> bool {
            &self.buf[..self.len] == *other
        }
    }

    #[test]
    fn update_discards_old_refills_and_grants_full_new_budget() {
        let mut sc = ScContext::new(50, 200, 4, 0);
        sc.schedule_used(50, 10);
        assert!(!sc.budget_check(10));
        sc.update(30, 90, 4, 10);
        assert_eq!(sc.budget(), 30);
        assert_eq!(sc.period(), 90);
        assert!(sc.budget_check(10));
        assert_eq!(sc.refill_sum(), 30);
    }

    #[test]
    fn ticks_until_ready_reflects_head_refill() {
        let mut sc = ScContext::new(10, 100, 4, 0);
        assert_eq!(sc.ticks_until_ready(0), None);
        // Retired at now=5, but matures one period after the refill's own
        // ready_at (0), i.e. at 100 -- not one period after `now` (105).
        sc.schedule_used(10, 5);
        assert_eq!(sc.ticks_until_ready(5), Some(95));
        assert_eq!(sc.ticks_until_ready(100), None);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delta-encoded timer list.
//!
//! Each armed timer is a node in a singly-linked, time-ordered list, but
//! instead of storing its absolute deadline, a node stores the number of
//! ticks between it and the node before it (`delta`). Advancing the clock
//! by `n` ticks is then just "subtract `n` from the head node's delta, and
//! fire every node whose delta reaches zero, in order" -- an O(1)-ish walk
//! bounded by how many timers actually matured, rather than a scan of every
//! armed timer to find out which ones did. Inserting a new timer walks the
//! list summing deltas until it finds where the new timer's absolute
//! deadline falls, then splits the delta at that point the same way
//! `kerncore::refill` splits a budget refill. A timer whose fire callback
//! asks for a nonzero reload period is re-added right away, so the same
//! node serves as a one-shot or periodic timer depending on what the
//! caller does in the callback.
//!
//! This sits alongside (not in place of) each task's own one-shot
//! `SET_TIMER`/`GET_TIMER` deadline (`task::TimerState`): that mechanism is
//! simple and sufficient for a task waiting on its own wakeup, while this
//! wheel backs timeouts that are armed by the kernel on a thread's behalf,
//! chiefly the send/receive timeouts described for synchronous IPC.
//!
//! Like `refill` in this crate, this operates in plain `u64` ticks so it can
//! be exercised on a host; `kern::time` wraps it with `Timestamp` at the
//! boundary.

/// Upper bound on simultaneously armed wheel timers. Generous relative to
/// the expected number of threads blocked with a pending IPC timeout at
/// any one instant.
pub const MAX_TIMERS: usize = 32;

#[derive(Copy, Clone, Debug)]
struct Node {
    /// Ticks after the previous node (or after "now", for the head) until
    /// this node fires.
    delta: u64,
    /// Opaque payload identifying what to do when this timer fires --
    /// typically a task index. Interpreted entirely by the caller.
    data: u32,
    next: Option<usize>,
    in_use: bool,
}

const EMPTY_NODE: Node = Node {
    delta: 0,
    data: 0,
    next: None,
    in_use: false,
};

/// A handle to an armed timer, for later cancellation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerId(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerError {
    /// No free slot to hold another armed timer.
    Full,
}

pub struct TimerWheel {
    nodes: [Node; MAX_TIMERS],
    head: Option<usize>,
}

impl TimerWheel {
    pub const fn new() -> Self {
        TimerWheel {
            nodes: [EMPTY_NODE; MAX_TIMERS],
            head: None,
        }
    }

    fn find_free(&self) -> Option<usize> {
        self.nodes.iter().position(|n| !n.in_use)
    }

    /// Arms a new timer to fire after `ticks` ticks from now, carrying
    /// `data`. Walks the existing list to insert in deadline order,
    /// splitting the delta of whatever node it lands in front of.
    pub fn add(&mut self, ticks: u64, data: u32) -> Result<TimerId, TimerError> {
        let idx = self.find_free().ok_or(TimerError::Full)?;

        let mut remaining = ticks;
        let mut prev: Option<usize> = None;
        let mut cur = self.head;

        while let Some(c) = cur {
            if self.nodes[c].delta > remaining {
                self.nodes[c].delta -= remaining;
                break;
            }
            remaining -= self.nodes[c].delta;
            prev = cur;
            cur = self.nodes[c].next;
        }

        self.nodes[idx] = Node {
            delta: remaining,
            data,
            next: cur,
            in_use: true,
        };

        match prev {
            Some(p) => self.nodes[p].next = Some(idx),
            None => self.head = Some(idx),
        }

        Ok(TimerId(idx))
    }

    /// Cancels a previously armed timer. Restores its delta onto whatever
    /// node follows it, so later timers' absolute deadlines are unaffected.
    pub fn remove(&mut self, id: TimerId) {
        let idx = id.0;
        if !self.nodes[idx].in_use {
            return;
        }
        let removed_delta = self.nodes[idx].delta;
        let next = self.nodes[idx].next;

        if let Some(n) = next {
            self.nodes[n].delta += removed_delta;
        }

        if self.head == Some(idx) {
            self.head = next;
        } else {
            // Find the predecessor and relink around `idx`.
            let mut cur = self.head;
            while let Some(c) = cur {
                if self.nodes[c].next == Some(idx) {
                    self.nodes[c].next = next;
                    break;
                }
                cur = self.nodes[c].next;
            }
        }

        self.nodes[idx] = EMPTY_NODE;
    }

    /// Advances the wheel by `elapsed` ticks, calling `fire(data)` for
    /// every timer that matures at or before the new time, oldest first,
    /// and removing them from the list. If `fire` returns `Some(period)`
    /// with a nonzero period, the timer is immediately re-added to fire
    /// again `period` ticks after this firing -- the periodic half of the
    /// wheel, for callers that need to reload rather than one-shot. A
    /// reload that finds the wheel full is silently dropped; the caller
    /// can always tell by noticing the timer never fires again.
    pub fn advance(&mut self, elapsed: u64, mut fire: impl FnMut(u32) -> Option<u64>) {
        let mut remaining = elapsed;
        while let Some(h) = self.head {
            if self.nodes[h].delta > remaining {
                self.nodes[h].delta -= remaining;
                return;
            }
            remaining -= self.nodes[h].delta;
            let data = self.nodes[h].data;
            self.head = self.nodes[h].next;
            self.nodes[h] = EMPTY_NODE;
            if let Some(period) = fire(data) {
                if period > 0 {
                    let _ = self.add(period, data);
                }
            }
        }
    }

    /// Ticks until the next timer fires, if any are armed.
    pub fn ticks_until_next(&self) -> Option<u64> {
        self.head.map(|h| self.nodes[h].delta)
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_timer_fires_after_its_delta() {
        let mut w = TimerWheel::new();
        w.add(10, 42).unwrap();
        let mut fired = None;
        w.advance(9, |d| { fired = Some(d); None });
        assert_eq!(fired, None);
        w.advance(1, |d| { fired = Some(d); None });
        assert_eq!(fired, Some(42));
        assert_eq!(w.ticks_until_next(), None);
    }

    #[test]
    fn timers_fire_in_deadline_order_regardless_of_insertion_order() {
        let mut w = TimerWheel::new();
        w.add(30, 3).unwrap();
        w.add(10, 1).unwrap();
        w.add(20, 2).unwrap();

        let mut order = alloc_order();
        w.advance(30, |d| { order.push(d); None });
        assert_eq!(order.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn removing_a_timer_preserves_others_absolute_deadlines() {
        let mut w = TimerWheel::new();
        let a = w.add(10, 1).unwrap();
        w.add(20, 2).unwrap();
        w.remove(a);

        let mut order = alloc_order();
        w.advance(20, |d| { order.push(d); None });
        assert_eq!(order.as_slice(), &[2]);
    }

    #[test]
    fn nonzero_reload_rearms_the_timer() {
        let mut w = TimerWheel::new();
        w.add(10, 7).unwrap();

        let mut order = alloc_order();
        // First firing reloads for another 10 ticks; second does not.
        w.advance(10, |d| {
            order.push(d);
            if order.len() == 1 { Some(10) } else { None }
        });
        assert_eq!(order.as_slice(), &[7]);
        assert_eq!(w.ticks_until_next(), Some(10));

        w.advance(10, |d| { order.push(d); None });
        assert_eq!(order.as_slice(), &[7, 7]);
        assert_eq!(w.ticks_until_next(), None);
    }

    #[test]
    fn zero_reload_behaves_as_one_shot() {
        let mut w = TimerWheel::new();
        w.add(5, 1).unwrap();
        let mut fired = 0;
        w.advance(5, |_| { fired += 1; Some(0) });
        assert_eq!(fired, 1);
        assert_eq!(w.ticks_until_next(), None);
    }

    #[test]
    fn ticks_until_next_reflects_the_nearest_deadline() {
        let mut w = TimerWheel::new();
        assert_eq!(w.ticks_until_next(), None);
        w.add(15, 1).unwrap();
        w.add(5, 2).unwrap();
        assert_eq!(w.ticks_until_next(), Some(5));
    }

    #[test]
    fn table_full_is_reported_rather_than_panicking() {
        let mut w = TimerWheel::new();
        for i in 0..MAX_TIMERS {
            w.add(1, i as u32).unwrap();
        }
        assert_eq!(w.add(1, 0), Err(TimerError::Full));
    }

    // Minimal no_std-friendly fixed-capacity buffer for assembling the
    // firing order in tests, avoiding a dependency on `alloc`.
    fn alloc_order() -> FixedVec {
        FixedVec { buf: [0; MAX_TIMERS], len: 0 }
    }

    struct FixedVec {
        buf: [u32; MAX_TIMERS],
        len: usize,
    }

    impl FixedVec {
        fn push(&mut self, v: u32) {
            self.buf[self.len] = v;
            self.len += 1;
        }

        fn as_slice(&self) -> &[u32] {
            &self.buf[..self.len]
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Asynchronous notification engine.
//!
//! A notification is a one-bit, non-blocking-to-signal event source. It
//! moves through three states:
//!
//! - `Idle`: not signaled, nobody waiting.
//! - `Waiting`: not signaled, at least one thread blocked on it.
//! - `Active`: signaled, waiting to be observed.
//!
//! Most notifications in practice are bound to a single thread (an
//! interrupt's owner, a timeout's target) and use the fast path: `signal`
//! delivers straight into that thread's notification word via
//! `task::Task::post`, which already knows how to unblock a thread parked
//! in `RECV` with a matching mask (see `Task::post`/`Task::take_notifications`).
//! That machinery predates this module and is reused here rather than
//! duplicated.
//!
//! The slower, general path -- nobody bound, or more than one thread
//! wanting to observe the same event -- is what this module actually adds:
//! an explicit FIFO of waiters and an `Active` flag, so a signal arriving
//! with no one (yet) waiting is not lost.

use crate::task::{NotificationSet, Task};

/// Bound so the waiter queue can live inline without allocation. Several
/// threads waiting on the same unbound notification is an unusual
/// configuration; this is generous headroom for it.
const MAX_WAITERS: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NotifyState {
    Idle,
    Waiting,
    Active,
}

/// One notification object's runtime state. The bits it signals on a bound
/// thread, and the object's position in the capability graph, live outside
/// this struct (in `kobj::ObjectTable`); this is purely the state machine
/// and waiter bookkeeping.
#[derive(Copy, Clone, Debug)]
pub struct Notification {
    state: NotifyState,
    /// Task index this notification delivers to via the fast path, if any.
    bound_thread: Option<usize>,
    /// Notification bits posted to the bound thread on `signal`. Ignored
    /// when `bound_thread` is `None`.
    bound_bits: NotificationSet,
    waiters: [Option<usize>; MAX_WAITERS],
    waiter_count: usize,
}

impl Notification {
    pub const fn new() -> Self {
        Notification {
            state: NotifyState::Idle,
            bound_thread: None,
            bound_bits: NotificationSet(0),
            waiters: [None; MAX_WAITERS],
            waiter_count: 0,
        }
    }

    pub fn state(&self) -> NotifyState {
        self.state
    }

    /// Binds this notification to `thread`, delivering `bits` to it on
    /// every future `signal`. A notification can have at most one bound
    /// thread at a time; rebinding replaces the previous binding.
    pub fn bind(&mut self, thread: usize, bits: NotificationSet) {
        self.bound_thread = Some(thread);
        self.bound_bits = bits;
    }

    pub fn unbind(&mut self) {
        self.bound_thread = None;
        self.bound_bits = NotificationSet(0);
    }

    fn enqueue_waiter(&mut self, thread: usize) {
        if self.waiter_count < MAX_WAITERS {
            self.waiters[self.waiter_count] = Some(thread);
            self.waiter_count += 1;
        }
        self.state = NotifyState::Waiting;
    }

    fn dequeue_waiter(&mut self) -> Option<usize> {
        if self.waiter_count == 0 {
            return None;
        }
        let first = self.waiters[0];
        for i in 1..self.waiter_count {
            self.waiters[i - 1] = self.waiters[i];
        }
        self.waiter_count -= 1;
        self.waiters[self.waiter_count] = None;
        first
    }

    /// Registers `thread` as waiting on this notification. If it is
    /// already `Active`, clears the flag and returns immediately (the
    /// thread should proceed without blocking). Otherwise the thread is
    /// queued and the caller is responsible for actually blocking it.
    #[must_use]
    pub fn wait(&mut self, thread: usize) -> bool {
        match self.state {
            NotifyState::Active => {
                self.state = if self.waiter_count == 0 {
                    NotifyState::Idle
                } else {
                    NotifyState::Waiting
                };
                true
            }
            NotifyState::Idle | NotifyState::Waiting => {
                self.enqueue_waiter(thread);
                false
            }
        }
    }

    /// Removes `thread` from the waiter queue without delivering anything,
    /// e.g. because its `RECV` was cancelled by `ExchangeRegisters`.
    pub fn cancel_wait(&mut self, thread: usize) {
        if let Some(pos) = self.waiters[..self.waiter_count]
            .iter()
            .position(|w| *w == Some(thread))
        {
            for i in pos..self.waiter_count - 1 {
                self.waiters[i] = self.waiters[i + 1];
            }
            self.waiter_count -= 1;
            self.waiters[self.waiter_count] = None;
            if self.waiter_count == 0 && self.state == NotifyState::Waiting {
                self.state = NotifyState::Idle;
            }
        }
    }

    /// Signals this notification. If a thread is bound, delivers through
    /// the fast path (`Task::post`) and returns whether that woke it. If
    /// no thread is bound, wakes the oldest queued waiter (if any) or,
    /// failing that, latches `Active` for the next `wait` to observe.
    ///
    /// Returns the task index that was unblocked, if any -- the caller
    /// uses this to decide whether a reschedule is warranted.
    pub fn signal(&mut self, tasks: &mut [Task]) -> Option<usize> {
        if let Some(bound) = self.bound_thread {
            if tasks[bound].post(self.bound_bits) {
                return Some(bound);
            }
            return None;
        }

        if let Some(waiter) = self.dequeue_waiter() {
            if self.waiter_count == 0 {
                self.state = NotifyState::Idle;
            }
            return Some(waiter);
        }

        self.state = NotifyState::Active;
        None
    }
}

impl Default for Notification {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_notification_signaled_with_no_waiters_goes_active() {
        let mut n = Notification::new();
        let mut tasks: [Task; 0] = [];
        assert_eq!(n.signal(&mut tasks), None);
        assert_eq!(n.state(), NotifyState::Active);
    }

    #[test]
    fn wait_on_active_notification_returns_immediately() {
        let mut n = Notification::new();
        let mut tasks: [Task; 0] = [];
        n.signal(&mut tasks);
        assert!(n.wait(0));
        assert_eq!(n.state(), NotifyState::Idle);
    }

    #[test]
    fn wait_then_signal_wakes_the_waiter_in_fifo_order() {
        let mut n = Notification::new();
        let mut tasks: [Task; 0] = [];
        assert!(!n.wait(3));
        assert!(!n.wait(5));
        assert_eq!(n.state(), NotifyState::Waiting);

        assert_eq!(n.signal(&mut tasks), Some(3));
        assert_eq!(n.state(), NotifyState::Waiting);
        assert_eq!(n.signal(&mut tasks), Some(5));
        assert_eq!(n.state(), NotifyState::Idle);
    }

    #[test]
    fn cancel_wait_removes_only_the_named_waiter() {
        let mut n = Notification::new();
        n.wait(1);
        n.wait(2);
        n.cancel_wait(1);
        let mut tasks: [Task; 0] = [];
        assert_eq!(n.signal(&mut tasks), Some(2));
    }
}

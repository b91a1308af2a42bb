// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Domain scheduling and the ready-task bitmap.
//!
//! On top of `task::priority_scan`'s linear search, this module adds two
//! things a plain priority-ordered scheduler doesn't need: scheduling *domains*
//! (time partitions -- only tasks in the currently active domain are
//! eligible to run, regardless of priority) and a bitmap summarizing which
//! priorities currently have a runnable task, so a scan can be skipped
//! entirely when nothing is ready at all.
//!
//! The domain schedule itself is a short, static, cyclic list of
//! `(domain, slice_ticks)` pairs (`abi::DomainScheduleEntry`), installed
//! once at boot by `init_domains` and advanced one entry every
//! `slice_ticks` ticks by `tick_domain`.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use abi::{Domain, DomainScheduleEntry};
use kerncore::ready_bitmap::ReadyBitmap;

use crate::task::Task;
use crate::time::Timestamp;

/// Rebuilds `bitmap` from scratch by scanning `tasks`. Called after bulk
/// state changes (domain switch, startup) where incremental set/clear
/// tracking would be more trouble than it's worth.
pub fn rebuild_ready_bitmap(
    bitmap: &mut ReadyBitmap,
    tasks: &[Task],
    domain: Domain,
    now: Timestamp,
) {
    *bitmap = ReadyBitmap::new();
    for task in tasks {
        if task.is_runnable() && task.domain() == domain && task.has_budget(now)
        {
            bitmap.set(task.priority().0);
        }
    }
}

static SCHEDULE_PTR: AtomicUsize = AtomicUsize::new(0);
static SCHEDULE_LEN: AtomicUsize = AtomicUsize::new(0);
static CURRENT_INDEX: AtomicUsize = AtomicUsize::new(0);
static TICKS_REMAINING: AtomicU32 = AtomicU32::new(0);

/// Installs the static domain schedule. Called exactly once, during
/// startup, before any task runs.
pub fn init_domains(schedule: &'static [DomainScheduleEntry]) {
    SCHEDULE_PTR.store(schedule.as_ptr() as usize, Ordering::Relaxed);
    SCHEDULE_LEN.store(schedule.len(), Ordering::Relaxed);
    CURRENT_INDEX.store(0, Ordering::Relaxed);
    TICKS_REMAINING.store(
        schedule.first().map_or(0, |e| e.slice_ticks.max(1)),
        Ordering::Relaxed,
    );
}

fn schedule() -> &'static [DomainScheduleEntry] {
    let ptr = SCHEDULE_PTR.load(Ordering::Relaxed) as *const DomainScheduleEntry;
    let len = SCHEDULE_LEN.load(Ordering::Relaxed);
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // Safety: `ptr`/`len` were derived from a `'static` slice in
        // `init_domains` and never change after that.
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}

/// The domain currently active, i.e. the only domain whose tasks are
/// eligible to run. If no schedule was installed, domain 0 is always
/// active (every task defaults to domain 0).
pub fn current_domain() -> Domain {
    let sched = schedule();
    match sched.get(CURRENT_INDEX.load(Ordering::Relaxed)) {
        Some(entry) => Domain(entry.domain as u8),
        None => Domain(0),
    }
}

/// Advances the domain schedule by one tick. Returns `true` if the active
/// domain just changed (the caller should force a reschedule).
pub fn tick_domain() -> bool {
    let sched = schedule();
    if sched.is_empty() {
        return false;
    }
    let prev = TICKS_REMAINING.fetch_sub(1, Ordering::Relaxed);
    if prev > 1 {
        return false;
    }
    let len = sched.len();
    let next = (CURRENT_INDEX.load(Ordering::Relaxed) + 1) % len;
    CURRENT_INDEX.store(next, Ordering::Relaxed);
    TICKS_REMAINING.store(sched[next].slice_ticks.max(1), Ordering::Relaxed);
    true
}

/// Selects the next task to run after `previous`, restricted to the
/// currently active domain and to tasks whose scheduling context has
/// budget available at `now`. This is `task::select` generalized with
/// domains and sporadic budgets (components C2 and C5).
pub fn select(previous: usize, tasks: &[Task], now: Timestamp) -> Option<usize> {
    let domain = current_domain();

    let mut bitmap = ReadyBitmap::new();
    rebuild_ready_bitmap(&mut bitmap, tasks, domain, now);
    if bitmap.is_empty() {
        return None;
    }

    crate::task::priority_scan(previous, tasks, |t| {
        t.is_runnable() && t.domain() == domain && t.has_budget(now)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_schedule_advances_and_wraps() {
        static SCHED: [DomainScheduleEntry; 2] = [
            DomainScheduleEntry { domain: 0, slice_ticks: 2 },
            DomainScheduleEntry { domain: 1, slice_ticks: 1 },
        ];
        init_domains(&SCHED);
        assert_eq!(current_domain(), Domain(0));
        assert!(!tick_domain());
        assert!(tick_domain());
        assert_eq!(current_domain(), Domain(1));
        assert!(tick_domain());
        assert_eq!(current_domain(), Domain(0));
    }

    #[test]
    fn no_schedule_means_domain_zero_forever() {
        init_domains(&[]);
        assert_eq!(current_domain(), Domain(0));
        assert!(!tick_domain());
    }
}

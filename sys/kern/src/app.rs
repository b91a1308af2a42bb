// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application description and startup.
//!
//! An "application" here is the entire collection of tasks and configuration
//! that customize the generic kernel.
//!
//! Most of the interesting types in this module are sourced from the `abi`
//! crate, where they can be shared with app code.

// Re-export ABI types.
pub use abi::*;

/// Adds kernel-specific operations to `abi::RegionDesc`. Not intended to be
/// implemented by other types.
pub trait RegionDescExt {
    /// Tests whether `slice` is fully enclosed by this region.
    fn covers<T>(&self, slice: &crate::umem::USlice<T>) -> bool;
}

impl RegionDescExt for abi::RegionDesc {
    /// Tests whether `slice` is fully enclosed by this region.
    fn covers<T>(&self, slice: &crate::umem::USlice<T>) -> bool {
        // We don't allow regions to butt up against the end of the address
        // space, so we can compute our off-by-one end address as follows:
        let self_end = self.base.wrapping_add(self.size) as usize;

        (self.base as usize) <= slice.base_addr()
            && slice.end_addr() <= self_end
    }
}

/// Static description of a task's scheduling context: the sporadic
/// budget/period reservation plus the domain and health-monitor level it
/// starts with.
///
/// This is kept separate from `abi::TaskDesc` (rather than folded into it)
/// because it is consumed only by `kern::refill`/`kern::sched` at startup,
/// not by the architecture-specific trap-frame setup that reads the rest of
/// `TaskDesc`.
#[derive(Copy, Clone, Debug)]
pub struct TaskScheduleDesc {
    /// Budget ticks per period. `0` means a round-robin context (no fixed
    /// period; see `kern::refill`).
    pub budget: u32,
    /// Period ticks. Ignored (and must be `0`) for round-robin contexts.
    pub period: u32,
    /// Maximum controlled priority: the highest priority (numerically
    /// lowest) this task may assign to another task via `Schedule`.
    pub mcp: abi::Priority,
    /// Scheduling domain this task starts in.
    pub domain: abi::Domain,
    /// Hard (Health-Monitor fault) or Soft (silent re-queue) budget
    /// overrun handling.
    pub level: abi::SchedLevel,
}

impl Default for TaskScheduleDesc {
    /// A task with no explicit schedule gets a round-robin context with
    /// unlimited effective budget (i.e. it is never budget-limited) at
    /// domain 0, soft level -- matching a task with no explicit schedule,
    /// which can always run when it's the highest-priority candidate.
    fn default() -> Self {
        TaskScheduleDesc {
            budget: 0,
            period: 0,
            mcp: abi::Priority(0),
            domain: abi::Domain(0),
            level: abi::SchedLevel::Soft,
        }
    }
}

/// The complete, statically-known description of one application: tasks,
/// regions, interrupt ownership, the domain schedule, and the fault
/// notification mask.
///
/// This supplies `kern::startup::start_kernel` with everything it needs to
/// stand up the task table. This workspace replaces a code-generation
/// pipeline (which would depend on hardware-specific TOML board
/// descriptions, out of scope for the core) with plain data built by the
/// caller, either by hand or by whatever build step the caller's own board
/// support crate provides.
pub struct App {
    pub tasks: &'static [TaskDesc],
    pub task_schedules: &'static [TaskScheduleDesc],
    pub regions: &'static [RegionDesc],
    pub irqs: &'static [Interrupt],
    pub domain_schedule: &'static [DomainScheduleEntry],
    pub fault_notification: u32,
    /// Opaque build identifier, reported to tasks via the `ReadImageId`
    /// kernel IPC operation. Whatever produced this `App` picks the value;
    /// the kernel only stores and echoes it back.
    pub image_id: u64,
}

static IMAGE_ID: core::sync::atomic::AtomicU64 =
    core::sync::atomic::AtomicU64::new(0);

/// Records `App::image_id` for later retrieval by `kipc::read_image_id`.
/// Called once during startup.
pub fn set_image_id(id: u64) {
    IMAGE_ID.store(id, core::sync::atomic::Ordering::Relaxed);
}

/// Returns the image id recorded by `set_image_id`.
pub fn image_id() -> u64 {
    IMAGE_ID.load(core::sync::atomic::Ordering::Relaxed)
}

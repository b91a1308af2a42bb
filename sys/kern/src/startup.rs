// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.

use crate::app::{self, App};
use crate::task::Task;
use core::mem::MaybeUninit;

/// The main kernel entry point.
///
/// We currently expect an application to provide its own `main`-equivalent
/// function, which does basic hardware setup and then calls this function.
///
/// Unlike the build-time-generated table this kernel once used, the
/// application now hands us its `App` description and the `static` storage
/// for the task/region tables directly; `N` is simply `app.tasks.len()`,
/// spelled out so the caller can size its statics. A mismatch between `N`
/// and `app.tasks.len()` is a programming error and is checked with a
/// debug assertion rather than threaded through as a `Result`, since it can
/// only ever be wrong at build time, never at runtime.
///
/// Parameters:
///
/// - `app`: the static application description (tasks, regions, irqs,
///   domain schedule).
/// - `task_table_storage`/`region_table_storage`: caller-owned `'static`
///   backing storage, sized to the number of tasks in `app`.
///
/// # Safety
///
/// This can be called exactly once per boot.
pub unsafe fn start_kernel<const N: usize>(
    app: &'static App,
    task_table_storage: &'static mut MaybeUninit<[Task; N]>,
    region_table_storage: &'static mut MaybeUninit<
        [[&'static app::RegionDesc; app::REGIONS_PER_TASK]; N],
    >,
) -> ! {
    klog!("starting: laziness");

    safe_start_kernel(app, task_table_storage, region_table_storage)
}

fn safe_start_kernel<const N: usize>(
    app: &'static App,
    task_table: &'static mut MaybeUninit<[Task; N]>,
    region_tables: &'static mut MaybeUninit<
        [[&'static app::RegionDesc; app::REGIONS_PER_TASK]; N],
    >,
) -> ! {
    klog!("starting: impatience");

    uassert!(app.tasks.len() == N);
    uassert!(app.task_schedules.len() == N);

    // We currently just refer to the RegionDescs in Flash. No additional
    // preparation of those structures is required here. This will almost
    // certainly need to change in the future: we can save many cycles by (1)
    // storing them in an architecture-optimized format for this particular MPU,
    // and (2) moving them into RAM where random accesses don't imply wait
    // states.

    // As a small optimization, we equip each task with an array of references
    // to RegionDescs, instead of looking them up by index each time. Generate
    // these.

    // Safety: MaybeUninit<[T]> -> [MaybeUninit<T>] is defined as safe.
    let region_tables: &mut [[MaybeUninit<&'static app::RegionDesc>; app::REGIONS_PER_TASK]; N] =
        unsafe { &mut *(region_tables as *mut _ as *mut _) };

    for (i, table) in region_tables.iter_mut().enumerate() {
        for (slot, &index) in table.iter_mut().zip(&app.tasks[i].regions) {
            *slot = MaybeUninit::new(&app.regions[index as usize]);
        }
    }

    // Safety: we have fully initialized this and can shed the uninit part.
    // We're also dropping &mut.
    let region_tables: &[[&'static app::RegionDesc; app::REGIONS_PER_TASK]; N] =
        unsafe { &*(region_tables as *mut _ as *mut _) };

    // Now, generate the task table.
    // Safety: MaybeUninit<[T]> -> [MaybeUninit<T>] is defined as safe.
    let task_table: &mut [MaybeUninit<Task>; N] =
        unsafe { &mut *(task_table as *mut _ as *mut _) };
    for (i, task) in task_table.iter_mut().enumerate() {
        *task = MaybeUninit::new(Task::from_descriptor(
            &app.tasks[i],
            &region_tables[i],
        ));
    }

    // Safety: we have fully initialized this and can shed the uninit part.
    let task_table: &mut [Task; N] = unsafe { &mut *(task_table as *mut _ as *mut _) };

    // With that done, set up initial register state etc, and install each
    // task's scheduling context (sporadic reservation or round-robin).
    for (i, task) in task_table.iter_mut().enumerate() {
        crate::arch::reinitialize(task);
        task.set_schedule(&app.task_schedules[i]);
    }

    crate::sched::init_domains(app.domain_schedule);
    crate::task::set_fault_notification(app.fault_notification);
    crate::app::set_image_id(app.image_id);

    // Stash the table extents somewhere that we can get it later, cheaply,
    // without recomputing stuff. This is treated as architecture specific
    // largely as a nod to simulators that might want to use a thread local
    // rather than a global static, but some future pleasant architecture might
    // let us store this in secret registers...
    //
    // Safety: as long as we don't call `with_task_table` or `with_irq_table`
    // after this point before switching to user, we can't alias, and we'll be
    // okay.
    unsafe {
        crate::arch::set_task_table(task_table);
        crate::arch::set_irq_table(app.irqs);
    }

    // Great! Pick our first task. We'll act like we're scheduling after the
    // last task, which will cause a scan from 0 on.
    let first_task_index = crate::task::select(task_table.len() - 1, task_table);

    crate::arch::apply_memory_protection(&task_table[first_task_index]);
    klog!("starting: impudence");
    crate::arch::start_first_task(&task_table[first_task_index])
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and applications.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Number of region slots in a `TaskDesc` record. Needs to be less or equal to
/// than the number of regions in the MPU; may be less to improve context switch
/// performance. (Though note that changing this alters the ABI.)
pub const REGIONS_PER_TASK: usize = 8;

pub const TASK_ID_INDEX_BITS: usize = 10;

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index (which can be predicted at
/// compile time) and a task generation number. The generation number begins
/// counting at zero and wraps on overflow. Critically, the generation number of
/// a task is incremented when it is restarted. Attempts to correspond with a
/// task using an outdated generation number will return `DEAD`. This helps
/// provide assurance that your peer has not lost its memory between steps of a
/// multi-step IPC sequence.
///
/// If the IPC can be retried against a fresh instance of the peer, it's
/// reasonable to simply increment the generation number and try again, using
/// `TaskId::next_generation`.
///
/// The task index is in the lower `TaskId::INDEX_BITS` bits, while the
/// generation is in the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskId(pub u16);

impl TaskId {
    /// The all-ones `TaskId` is reserved to represent the "virtual kernel
    /// task."
    pub const KERNEL: Self = Self(!0);

    /// Reserved TaskId for an unbound userlib::task_slot!()
    pub const UNBOUND: Self = Self(Self::INDEX_MASK - 1);

    /// Number of bits in a `TaskId` used to represent task index, rather than
    /// generation number. This must currently be 15 or smaller.
    pub const INDEX_BITS: u32 = 10;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }

    pub fn next_generation(self) -> Self {
        Self::for_index_and_gen(self.index(), self.generation().next())
    }
}

/// Type used to track generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u16 = 0xFFFF << TaskId::INDEX_BITS >> TaskId::INDEX_BITS;
        Generation(self.0.wrapping_add(1) & MASK as u8)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth. (This keeps our logic simpler given
/// that the number of priorities can be reconfigured.)
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater /
/// less important, or more important / numerically smaller.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, AsBytes, Unaligned, Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Record describing a single task.
#[derive(Clone, Debug, FromBytes, Serialize, Deserialize)]
#[repr(C)]
pub struct TaskDesc {
    /// Identifies memory regions this task has access to, by index in the
    /// `RegionDesc` table. If the task needs fewer than `REGIONS_PER_TASK`
    /// regions, it should use remaining entries to name a region that confers
    /// no access; by convention, this region is usually entry 0 in the table.
    ///
    /// Note: because these region indices are 8 bits, this is going to get
    /// restrictive in applications that approach 128 tasks.
    pub regions: [u8; REGIONS_PER_TASK],
    /// Address of the task's entry point. This is the first instruction that
    /// will be executed whenever the task is (re)started. It must be within one
    /// of the task's memory regions (the kernel *will* check this).
    pub entry_point: u32,
    /// Address of the task's initial stack pointer, to be loaded at (re)start.
    /// It must be pointing into or *just past* one of the task's memory
    /// regions (the kernel *will* check this).
    pub initial_stack: u32,
    /// Initial priority of this task.
    pub priority: u32,
    /// Collection of boolean flags controlling task behavior.
    pub flags: TaskFlags,
}

bitflags::bitflags! {
    #[derive(FromBytes, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct TaskFlags: u32 {
        const START_AT_BOOT = 1 << 0;
        const RESERVED = !1;
    }
}

/// Description of one memory region.
///
/// A memory region can be used by multiple tasks. This is mostly used to have
/// tasks share a no-access region (often index 0) in unused region slots, but
/// you could also use it for shared peripheral or RAM access.
///
/// Note that regions can overlap. This can be useful: for example, you can have
/// two regions pointing to the same area of the address space, but one
/// read-only and the other read-write.
#[derive(Clone, Debug, FromBytes, Serialize, Deserialize)]
#[repr(C)]
pub struct RegionDesc {
    /// Address of start of region. The platform likely has alignment
    /// requirements for this; it must meet them. (For example, on ARMv7-M, it
    /// must be naturally aligned for the size.)
    pub base: u32,
    /// Size of region, in bytes. The platform likely has alignment requirements
    /// for this; it must meet them. (For example, on ARMv7-M, it must be a
    /// power of two greater than 16.)
    pub size: u32,
    /// Flags describing what can be done with this region.
    pub attributes: RegionAttributes,
    /// Reserved word, must be zero.
    pub reserved_zero: u32,
}

bitflags::bitflags! {
    #[derive(FromBytes, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        /// Region can be read by tasks that include it.
        const READ = 1 << 0;
        /// Region can be written by tasks that include it.
        const WRITE = 1 << 1;
        /// Region can contain executable code for tasks that include it.
        const EXECUTE = 1 << 2;
        /// Region contains memory mapped registers. This affects cache behavior
        /// on devices that include it, and discourages the kernel from using
        /// `memcpy` in the region.
        const DEVICE = 1 << 3;
        /// Region can be used for DMA or communication with other processors.
        /// This heavily restricts how this memory can be cached and will hurt
        /// performance if overused.
        ///
        /// This is ignored for `DEVICE` memory, which is already not cached.
        const DMA = 1 << 4;

        const RESERVED = !((1 << 5) - 1);
    }
}

/// Newtype wrapper for an interrupt index
#[derive(
    Copy,
    Clone,
    Debug,
    FromBytes,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
#[repr(transparent)]
pub struct InterruptNum(pub u32);

/// Struct containing the task which waits for an interrupt, and the expected
/// notification mask associated with the IRQ.
#[derive(
    Copy,
    Clone,
    Debug,
    FromBytes,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
pub struct InterruptOwner {
    /// Which task to notify, by index.
    pub task: u32,
    /// Which notification bits to set.
    pub notification: u32,
}

/// Description of one interrupt response.
#[derive(Clone, Debug, FromBytes, Serialize, Deserialize)]
pub struct Interrupt {
    /// Which interrupt number is being hooked.
    pub irq: InterruptNum,
    /// The owner of this interrupt.
    pub owner: InterruptOwner,
}

/// Structure describing a lease in task memory.
///
/// At SEND, the task gives us the base and length of a section of memory that
/// it *claims* contains structs of this type.
#[derive(Copy, Clone, Debug, FromBytes)]
#[repr(C)]
pub struct ULease {
    /// Lease attributes.
    pub attributes: LeaseAttributes,
    /// Base address of leased memory. This is equivalent to the base address
    /// field in `USlice`, but isn't represented as a `USlice` because we leave
    /// the internal memory representation of `USlice` out of the ABI.
    pub base_address: u32,
    /// Length of leased memory, in bytes.
    pub length: u32,
}

bitflags::bitflags! {
    #[derive(FromBytes)]
    #[repr(transparent)]
    pub struct LeaseAttributes: u32 {
        /// Allow the borrower to read this memory.
        const READ = 1 << 0;
        /// Allow the borrower to write this memory.
        const WRITE = 1 << 1;
    }
}

pub const FIRST_DEAD_CODE: u32 = 0xffff_ff00;

/// Response code returned by the kernel if the peer died or was restarted.
///
/// This always has the top 24 bits set to 1, with the `generation` in the
/// bottom 8 bits.
pub const fn dead_response_code(new_generation: Generation) -> u32 {
    FIRST_DEAD_CODE | new_generation.0 as u32
}

/// Utility for checking whether a code indicates that the peer was restarted
/// and extracting the generation if it is.
pub const fn extract_new_generation(code: u32) -> Option<Generation> {
    if (code & FIRST_DEAD_CODE) == FIRST_DEAD_CODE {
        Some(Generation(code as u8))
    } else {
        None
    }
}

/// Response code returned by the kernel if a lender has defected.
pub const DEFECT: u32 = 1;

/// State used to make scheduling decisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum TaskState {
    /// Task is healthy and can be scheduled subject to the `SchedState`
    /// requirements.
    Healthy(SchedState),
    /// Task has been stopped by a fault and must not be scheduled without
    /// intervention.
    Faulted {
        /// Information about the fault.
        fault: FaultInfo,
        /// Record of the previous healthy state at the time the fault was
        /// taken.
        original_state: SchedState,
    },
}

impl TaskState {
    /// Checks if a task in this state is ready to accept a message sent by
    /// `caller`. This will return `true` if the state is an open receive, or a
    /// closed receive naming the caller specifically; otherwise, it will return
    /// `false`.
    pub fn can_accept_message_from(&self, caller: TaskId) -> bool {
        if let TaskState::Healthy(SchedState::InRecv(peer)) = self {
            peer.is_none() || peer == &Some(caller)
        } else {
            false
        }
    }

    /// Checks if a task in this state is trying to deliver a message to
    /// `target`.
    pub fn is_sending_to(&self, target: TaskId) -> bool {
        self == &TaskState::Healthy(SchedState::InSend(target))
    }

    /// Checks if a task in this state can be unblocked with a notification.
    pub fn can_accept_notification(&self) -> bool {
        if let TaskState::Healthy(SchedState::InRecv(p)) = self {
            p.is_none() || p == &Some(TaskId::KERNEL)
        } else {
            false
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Healthy(SchedState::Stopped)
    }
}

/// Scheduler parameters for a healthy task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SchedState {
    /// This task is ignored for scheduling purposes.
    Stopped,
    /// This task could be scheduled on the CPU.
    Runnable,
    /// This task is blocked waiting to deliver a message to the given task.
    InSend(TaskId),
    /// This task is blocked waiting for a reply from the given task.
    InReply(TaskId),
    /// This task is blocked waiting for messages, either from any source
    /// (`None`) or from a particular sender only.
    InRecv(Option<TaskId>),
    /// This task is blocked waiting on the named notification object.
    InNotify(u32),
}

impl From<SchedState> for TaskState {
    fn from(s: SchedState) -> Self {
        Self::Healthy(s)
    }
}

/// A record describing a fault taken by a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultInfo {
    /// The task has violated memory access rules. This may have come from a
    /// memory protection fault while executing the task (in the case of
    /// `source` `User`), from overflowing a stack, or from checks on kernel
    /// syscall arguments (`source` `Kernel`).
    MemoryAccess {
        /// Problematic address that the task accessed, or asked the kernel to
        /// access. This is `Option` because there are cases of processor
        /// protection faults that don't provide a precise address.
        address: Option<u32>,
        /// Origin of the fault.
        source: FaultSource,
    },
    /// A task has overflowed its stack. We can always determine the bad
    /// stack address, but we can't determine the PC
    StackOverflow { address: u32 },
    /// A task has induced a bus error
    BusError {
        address: Option<u32>,
        source: FaultSource,
    },
    /// Divide-by-zero
    DivideByZero,
    /// Attempt to execute non-executable memory
    IllegalText,
    /// Execution of an illegal instruction
    IllegalInstruction,
    /// Other invalid operation, with 32-bit code. We use this for faults that
    /// aren't general across architectures or may not have enough diagnosis
    /// information. The code is architecture-specific.
    ///
    /// - ARMv7/8-M: used for faults not otherwise enumerated in this type; the
    ///   code is the bits of the Configurable Fault Status Register.
    /// - ARMv6-M: used for all faults, as v6 doesn't distinguish faults. The
    ///   code is always 0.
    InvalidOperation(u32),
    /// Arguments passed to a syscall were invalid. TODO: this should become
    /// more descriptive, it's a placeholder.
    SyscallUsage(UsageError),
    /// A task has explicitly aborted itself with a panic.
    Panic,
    /// A fault has been injected into this task by another task
    Injected(TaskId),
    /// A fault has been delivered by a server task.
    FromServer(TaskId, ReplyFaultReason),
    /// A `HARD`-level task's scheduling context ran out of budget. Raised by
    /// the syscall dispatch envelope's budget check; a `SOFT`-level task is
    /// silently re-queued instead of faulted for the same condition.
    BudgetExhausted,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on `num-traits`
/// and this seems okay.
impl core::convert::TryFrom<u32> for ReplyFaultReason {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::UndefinedOperation),
            1 => Ok(Self::BadMessageSize),
            2 => Ok(Self::BadMessageContents),
            3 => Ok(Self::BadLeases),
            4 => Ok(Self::ReplyBufferTooSmall),
            5 => Ok(Self::AccessViolation),
            _ => Err(()),
        }
    }
}

impl From<UsageError> for FaultInfo {
    fn from(e: UsageError) -> Self {
        Self::SyscallUsage(e)
    }
}

/// A kernel-defined fault, arising from how a user task behaved.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum UsageError {
    /// A program used an undefined syscall number.
    BadSyscallNumber,
    /// A program specified a slice as a syscall argument, but the slice is
    /// patently invalid: it is either unaligned for its type, or it is
    /// expressed such that it would wrap around the end of the address space.
    /// Neither of these conditions is ever legal, so this represents a
    /// malfunction in the caller.
    InvalidSlice,
    /// A program named a task ID that will never be valid, as it's out of
    /// range.
    TaskOutOfRange,
    /// A program named a valid task ID, but attempted to perform an operation
    /// on it that is illegal or otherwise forbidden.
    IllegalTask,
    LeaseOutOfRange,
    OffsetOutOfRange,
    NoIrq,
    BadKernelMessage,
    BadReplyFaultReason,
    /// A program named a notification object index that will never be
    /// valid, as it's out of range.
    NotifyOutOfRange,
}

/// Origin of a fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultSource {
    /// User code did something that was intercepted by the processor.
    User,
    /// User code asked the kernel to do something bad on its behalf.
    Kernel,
}

/// Reasons a server might cite when using the `REPLY_FAULT` syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ReplyFaultReason {
    /// The message indicated some operation number that is unknown to the
    /// server -- which almost certainly indicates that the client intended the
    /// message for a different kind of server.
    UndefinedOperation = 0,
    /// The message sent by the client had the wrong size to even attempt
    /// parsing by the server -- either too short or too long. (Because most
    /// messages are fixed size, it currently doesn't seem useful to distinguish
    /// between too-short and too-long.)
    BadMessageSize = 1,
    /// The server attempted to parse the message, and couldn't. This may
    /// indicate an enum with an illegal value, or a more nuanced error on
    /// operations that use serde encoding.
    BadMessageContents = 2,
    /// The client did not provide the leases required for the operation, or
    /// provided them with the wrong attributes.
    BadLeases = 3,
    /// The client did not provide a reply buffer large enough to receive the
    /// server's reply, despite this information being implied by the IPC
    /// protocol.
    ReplyBufferTooSmall = 4,

    /// Application-defined: The client attempted to operate on a resource that
    /// is not available to them due to mandatory access control or other type
    /// of access validation.
    AccessViolation = 5,
}

/// Enumeration of syscall numbers.
///
/// `Send`/`Recv`/`Reply`/`SetTimer`/`GetTimer`/`Post` are the decomposed,
/// single-phase primitives the syscall dispatcher actually executes; they
/// correspond to `send_ipc`/`receive_ipc` and to the timer half of
/// `ExchangeIpc`. `ExchangeIpc` itself is the user-visible combined
/// send-then-receive call and is implemented in terms of the two; see
/// `kern::syscalls::exchange_ipc`.
#[repr(u32)]
pub enum Sysnum {
    Send = 0,
    Recv = 1,
    Reply = 2,
    SetTimer = 3,
    BorrowRead = 4,
    BorrowWrite = 5,
    BorrowInfo = 6,
    IrqControl = 7,
    Panic = 8,
    GetTimer = 9,
    RefreshTaskId = 10,
    Post = 11,
    ReplyFault = 12,
    /// `ThreadControl`: create/modify/delete a thread.
    ThreadControl = 13,
    /// `Schedule`: apply priority, MCP, level, domain, budget, period, and
    /// max-refills to a thread's scheduling context.
    Schedule = 14,
    /// `SwitchThread`: voluntary yield, optionally donating the remaining
    /// time slice to a specific thread.
    SwitchThread = 15,
    /// `ExchangeRegisters`: read/overwrite a subset of a thread's
    /// registers and optionally cancel in-flight send/recv phases.
    ExchangeRegisters = 16,
    /// `ExchangeIpc`: combined send-then-receive.
    ExchangeIpc = 17,
    /// `SystemClock`: report the hardware cycle rate.
    SystemClock = 18,
    /// `SpaceControl`: privileged no-op stub in this core.
    SpaceControl = 19,
    /// `ProcessorControl`: privileged no-op stub in this core.
    ProcessorControl = 20,
    /// `UnmapPage`: release the caller's partitions.
    UnmapPage = 21,
    /// `NotifySignal`: raise a notification object by index.
    NotifySignal = 22,
    /// `NotifyRecv`: wait on a notification object by index.
    NotifyRecv = 23,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on `num-traits`
/// and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Send),
            1 => Ok(Self::Recv),
            2 => Ok(Self::Reply),
            3 => Ok(Self::SetTimer),
            4 => Ok(Self::BorrowRead),
            5 => Ok(Self::BorrowWrite),
            6 => Ok(Self::BorrowInfo),
            7 => Ok(Self::IrqControl),
            8 => Ok(Self::Panic),
            9 => Ok(Self::GetTimer),
            10 => Ok(Self::RefreshTaskId),
            11 => Ok(Self::Post),
            12 => Ok(Self::ReplyFault),
            13 => Ok(Self::ThreadControl),
            14 => Ok(Self::Schedule),
            15 => Ok(Self::SwitchThread),
            16 => Ok(Self::ExchangeRegisters),
            17 => Ok(Self::ExchangeIpc),
            18 => Ok(Self::SystemClock),
            19 => Ok(Self::SpaceControl),
            20 => Ok(Self::ProcessorControl),
            21 => Ok(Self::UnmapPage),
            22 => Ok(Self::NotifySignal),
            23 => Ok(Self::NotifyRecv),
            _ => Err(()),
        }
    }
}

#[repr(C)]
#[derive(Default, Copy, Clone, Debug, FromBytes, AsBytes)]
pub struct SAUEntry {
    pub rbar: u32,
    pub rlar: u32,
}

pub const HEADER_MAGIC: u32 = 0x1535_6637;

#[repr(C)]
#[derive(Default, AsBytes, FromBytes)]
pub struct ImageHeader {
    pub magic: u32,
    pub total_image_len: u32,
    pub sau_entries: [SAUEntry; 8],
}

// Corresponds to the ARM vector table, limited to what we need
// see ARMv8m B3.30 and B1.5.3 ARMv7m for the full description
#[repr(C)]
#[derive(Default, AsBytes)]
pub struct ImageVectors {
    pub sp: u32,
    pub entry: u32,
}

//
// Sporadic scheduling / domains / kernel objects.
//
// The types below extend the task model above with the reservation-based
// scheduler, domain time-slicing, and the typed-item IPC vocabulary. They are
// additively layered on top of the task/region/IPC ABI rather than replacing
// it, the same way a single new `RegionAttributes` bit is layered onto an
// existing bitflags set.
//

/// Upper bound on the number of scheduling domains any application may
/// configure. Kept small and `const` so the ready-queue bitmap (one `u32`
/// word of L1 bits per domain) stays cheap to store per-domain.
pub const NUM_DOMAINS: usize = 16;

/// Identifies one scheduling domain. Domains partition the schedule in time:
/// at any instant exactly one domain is active, and only tasks in the active
/// domain are visible to the scheduler.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, AsBytes, Unaligned, Default,
)]
#[repr(transparent)]
pub struct Domain(pub u8);

impl Domain {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// One entry of the static, build-time `domain_schedule`: "run domain `id`
/// for `slice_ticks` ticks, then advance to the next entry, wrapping."
#[derive(Copy, Clone, Debug, FromBytes, Serialize, Deserialize)]
#[repr(C)]
pub struct DomainScheduleEntry {
    pub domain: u32,
    pub slice_ticks: u32,
}

/// Whether budget exhaustion on a task's scheduling context is a fatal
/// Health-Monitor event (`Hard`) or a silent re-queue once budget replenishes
/// (`Soft`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SchedLevel {
    Hard,
    Soft,
}

impl Default for SchedLevel {
    fn default() -> Self {
        SchedLevel::Soft
    }
}

/// Minimum number of ticks a refill must carry for it to be usable. A
/// scheduling context whose head refill would drop below this amount is
/// considered to have no budget, even if its raw `amount` is nonzero.
pub const MIN_BUDGET_TICKS: u64 = 1;

/// Per-type identifier for a kernel object, as tracked by the object table.
/// This is a narrower vocabulary than `abi::Sysnum`/task descriptors because
/// it only needs to distinguish *storage* kinds, not every operation that
/// can be performed on them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ObjectType {
    Null,
    Untyped,
    Thread,
    SchedContext,
    Message,
    Notification,
    IrqControl,
    IrqHandler,
    Domain,
    Time,
    Device,
    Pager,
    Frame,
}

bitflags::bitflags! {
    /// Per-object operation-permission bits, analogous to `RegionAttributes`
    /// but for kernel-object capabilities rather than memory regions.
    #[derive(Serialize, Deserialize)]
    pub struct ObjectRights: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const GRANT = 1 << 2;
        const REVOKE = 1 << 3;
    }
}

/// A typed IPC message item, as carried in the typed-word region of a message
/// following `MR[0]`'s untyped words. Each variant encodes to exactly two
/// message-register-sized words.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageItem {
    /// Install an MPU region on the receiver for the lifetime of the holding
    /// resource; revocable.
    Map {
        base: u32,
        page_size: u32,
        rights: ObjectRights,
    },
    /// Like `Map`, but the region is removed from the sender and installed on
    /// the receiver permanently.
    Grant {
        base: u32,
        page_size: u32,
        rights: ObjectRights,
    },
    /// Map `len` bytes at `addr` into the receiver's page table (used for
    /// string/bulk-data transfer).
    String { addr: u32, len: u32 },
    /// Deposit architectural register values into the receiver's trap frame;
    /// `mask` has one bit per register named by `reg_ids`.
    CtrlXfer { id: u32, mask: u32 },
}

/// Discriminant values for `MessageItem`, stored in the high bits of the
/// item's first word.
#[repr(u32)]
enum MessageItemTag {
    Map = 0,
    Grant = 1,
    String = 2,
    CtrlXfer = 3,
}

impl MessageItem {
    /// Encodes this item as the two-word on-the-wire representation used in a
    /// message's typed-item region.
    pub fn encode(self) -> [u32; 2] {
        match self {
            MessageItem::Map {
                base,
                page_size,
                rights,
            } => [
                (MessageItemTag::Map as u32) | (page_size << 4),
                base | rights.bits(),
            ],
            MessageItem::Grant {
                base,
                page_size,
                rights,
            } => [
                (MessageItemTag::Grant as u32) | (page_size << 4),
                base | rights.bits(),
            ],
            MessageItem::String { addr, len } => {
                [(MessageItemTag::String as u32) | (len << 4), addr]
            }
            MessageItem::CtrlXfer { id, mask } => {
                [(MessageItemTag::CtrlXfer as u32) | (id << 4), mask]
            }
        }
    }

    /// Decodes a two-word typed item. Returns `None` if the tag is not one of
    /// the four recognized kinds; callers should treat that as grounds for
    /// `IPC_MSG_OVERFLOW` rather than silently skipping the item.
    pub fn decode(words: [u32; 2]) -> Option<Self> {
        let tag = words[0] & 0xf;
        let payload = words[0] >> 4;
        Some(match tag {
            x if x == MessageItemTag::Map as u32 => MessageItem::Map {
                base: words[1] & !0xf,
                page_size: payload,
                rights: ObjectRights::from_bits_truncate(words[1] & 0xf),
            },
            x if x == MessageItemTag::Grant as u32 => MessageItem::Grant {
                base: words[1] & !0xf,
                page_size: payload,
                rights: ObjectRights::from_bits_truncate(words[1] & 0xf),
            },
            x if x == MessageItemTag::String as u32 => MessageItem::String {
                addr: words[1],
                len: payload,
            },
            x if x == MessageItemTag::CtrlXfer as u32 => {
                MessageItem::CtrlXfer {
                    id: payload,
                    mask: words[1],
                }
            }
            _ => return None,
        })
    }
}

/// TCR (Thread Control Register) error codes, the per-thread error-reporting
/// channel. `SEND_PHASE`/`RECV_PHASE` are OR-ed onto the IPC-related codes to
/// indicate which half of a two-phase operation failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum TcrError {
    Ok = 0,
    NoPrivilege = 1,
    InvalThread = 2,
    InvalSpace = 3,
    InvalSched = 4,
    InvalPara = 5,
    UtcbArea = 6,
    KipArea = 7,
    NoMem = 8,
    IpcTimeout = 9,
    IpcNotExist = 10,
    IpcCanceled = 11,
    IpcMsgOverflow = 12,
    IpcXferTimeout = 13,
    IpcAborted = 14,
}

/// OR-ed onto an IPC `TcrError` to indicate the send phase of a two-phase
/// operation was where the error occurred.
pub const SEND_PHASE: u32 = 1 << 16;
/// OR-ed onto an IPC `TcrError` to indicate the receive phase of a two-phase
/// operation was where the error occurred.
pub const RECV_PHASE: u32 = 1 << 17;

impl TcrError {
    pub const fn with_send_phase(self) -> u32 {
        self as u32 | SEND_PHASE
    }

    pub const fn with_recv_phase(self) -> u32 {
        self as u32 | RECV_PHASE
    }
}

#[cfg(test)]
mod sched_abi_tests {
    use super::*;

    #[test]
    fn message_item_round_trips_through_encode_decode() {
        let items = [
            MessageItem::Map {
                base: 0x2000_0000,
                page_size: 12,
                rights: ObjectRights::READ,
            },
            MessageItem::Grant {
                base: 0x2000_1000,
                page_size: 8,
                rights: ObjectRights::READ | ObjectRights::WRITE,
            },
            MessageItem::String {
                addr: 0x2000_2000,
                len: 64,
            },
            MessageItem::CtrlXfer { id: 3, mask: 0xff },
        ];
        for item in items {
            let encoded = item.encode();
            assert_eq!(MessageItem::decode(encoded), Some(item));
        }
    }

    #[test]
    fn message_item_rejects_unknown_tag() {
        // Tag nibble 0xf is not assigned to any item kind.
        assert_eq!(MessageItem::decode([0xf, 0]), None);
    }

    #[test]
    fn tcr_error_phase_bits_are_disjoint_from_code() {
        let send = TcrError::IpcTimeout.with_send_phase();
        let recv = TcrError::IpcTimeout.with_recv_phase();
        assert_ne!(send, recv);
        assert_eq!(send & 0xffff, TcrError::IpcTimeout as u32);
        assert_eq!(recv & 0xffff, TcrError::IpcTimeout as u32);
    }
}

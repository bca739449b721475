use super::table::Slot;
use crate::memory::StackBuffer;

/// Unique process identifier, handed out by the kernel's monotonic
/// counter. Never reused while the process table still references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

/// Process state machine.
///
/// `New -> Ready -> Running -> {Ready, Blocked, Zombie}`; `Blocked`
/// processes return to `Ready` when woken, `Zombie` is terminal until the
/// parent reaps the PCB. At most one process is `Running` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    New,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Opaque page-table root. The scheduling core copies it across `fork`
/// and otherwise never looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(pub u64);

impl AddressSpace {
    /// Processes sharing the kernel's own address space.
    pub const KERNEL: AddressSpace = AddressSpace(0);
}

/// Process Control Block: one per logical process.
///
/// There is no separate register-save area. A suspended process is fully
/// described by its user stack contents plus `user_sp_offset`; resuming
/// means pointing the stack pointer back there and returning, which is
/// why suspension only ever happens at explicit syscall sites.
pub struct Pcb {
    pub pid: Pid,
    pub state: ProcState,

    /// Scheduling key: lower value runs first.
    pub priority: i32,
    /// Completion deadline, the key for the EDF queue order.
    pub deadline: i32,
    /// Expected run length, the key for the SJF queue order.
    pub time_to_run: i32,

    /// The creating process, `None` for the root. A lookup-only link: it
    /// resolves to nothing once the parent has been reaped.
    pub parent: Option<Slot>,
    /// Set exactly once by `exit`; meaningful only for a `Zombie`.
    pub exit_status: Option<i32>,

    /// The process's execution stack.
    pub user_stack: StackBuffer,
    /// Byte offset from the user stack base at which execution stopped.
    pub user_sp_offset: usize,
    /// Stack used while the process executes kernel-side code.
    pub kernel_stack: StackBuffer,
    /// Raw stack pointer saved on the way out of `schedule`.
    pub kernel_sp: usize,

    pub address_space: AddressSpace,
    /// One-shot flag: a freshly forked child whose first dispatch must
    /// observe the fork return value `0`.
    pub is_new_child: bool,

    /// Ready-queue link, valid only while enqueued.
    pub ready_next: Option<Slot>,
    /// Process-table link, valid for the PCB's entire lifetime.
    pub table_next: Option<Slot>,
}

impl Pcb {
    /// Absolute address of the suspended stack frame, the value the
    /// context-switch layer loads into the stack pointer on resume.
    pub fn resume_stack_ptr(&self) -> usize {
        self.user_stack.base() + self.user_sp_offset
    }
}

#[cfg(test)]
pub(crate) fn test_pcb(pid: u32, priority: i32) -> Pcb {
    use crate::memory::{alloc_stack, KERNEL_STACK_SIZE, USER_STACK_SIZE};

    let user_stack = alloc_stack(USER_STACK_SIZE).unwrap();
    let kernel_stack = alloc_stack(KERNEL_STACK_SIZE).unwrap();
    let kernel_sp = kernel_stack.top();
    let user_sp_offset = user_stack.len();
    Pcb {
        pid: Pid(pid),
        state: ProcState::Ready,
        priority,
        deadline: 0,
        time_to_run: 0,
        parent: None,
        exit_status: None,
        user_stack,
        user_sp_offset,
        kernel_stack,
        kernel_sp,
        address_space: AddressSpace::KERNEL,
        is_new_child: false,
        ready_next: None,
        table_next: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_pointer_tracks_the_saved_offset() {
        let mut pcb = test_pcb(1, 0);
        pcb.user_sp_offset = 128;
        assert_eq!(pcb.resume_stack_ptr(), pcb.user_stack.base() + 128);
    }
}

//! Process management: the PCB table, the priority ready queue and the
//! cooperative scheduler.
//!
//! All scheduling state lives in a [`Kernel`] value so tests can run
//! independent instances; the exported free functions operate on the one
//! global instance behind [`struct@KERNEL`]. Scheduling is strictly
//! cooperative: a process keeps the CPU until it calls `yield`, blocks in
//! `wait` or exits, which is what makes the single shared instance sound
//! on one hardware thread without further locking.

pub mod context;
pub mod pcb;
pub mod queue;
pub mod table;

use context::{ContextSwitch, SavedContext};
use lazy_static::lazy_static;
use spin::{Mutex, Once};

pub use pcb::{AddressSpace, Pcb, Pid, ProcState};
pub use queue::ReadyQueue;
pub use table::{ProcTable, Slot};

use crate::memory::{self, KERNEL_STACK_SIZE, USER_STACK_SIZE, WORD_SIZE};

/// Errors surfaced to the syscall layer. The C-like wrappers flatten
/// every variant to the `-1` sentinel the calling process checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// A syscall arrived with no process installed as current.
    NoCurrentProcess,
    /// The allocator could not provide a PCB slot or a stack.
    AllocationFailed,
    /// `wait` found nothing to reap.
    NoChildren,
}

/// What the context-switch layer must do after a scheduling decision.
///
/// An empty ready queue is not an error: the scheduler reports
/// [`Dispatch::Idle`] and its caller hands control to the collaborator
/// shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Transfer control into `next` at `resume`. `first_run` marks a
    /// freshly forked child whose resume must inject the fork return
    /// value `0`.
    Run {
        next: Slot,
        resume: SavedContext,
        first_run: bool,
    },
    /// Nothing to run.
    Idle,
}

/// The process core: PCB storage, the ready queue, the current-process
/// pointer and the pid counter.
pub struct Kernel {
    pub table: ProcTable,
    pub ready: ReadyQueue,
    /// The process presently `Running`, empty before the first schedule.
    pub current: Option<Slot>,
    next_pid: u32,
}

impl Kernel {
    pub const fn new() -> Self {
        Kernel {
            table: ProcTable::new(),
            ready: ReadyQueue::new(),
            current: None,
            next_pid: 1,
        }
    }

    /// Hand out the next pid. Monotonic; never reused.
    pub fn get_new_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
            .and_then(|slot| self.table.get(slot))
            .map(|pcb| pcb.pid)
    }

    /// Saved kernel stack pointer of the current process, the stack
    /// `yield` hops onto before entering the scheduler.
    pub fn current_kernel_sp(&self) -> Option<usize> {
        self.current
            .and_then(|slot| self.table.get(slot))
            .map(|pcb| pcb.kernel_sp)
    }

    /// Create a process around `entry_point` and make it schedulable.
    ///
    /// The fresh user stack gets a synthesized first frame (the entry
    /// point as a return address over a zero frame pointer) so the
    /// resume protocol treats brand-new and previously suspended
    /// processes identically. Returns `None` if any allocation fails;
    /// nothing is registered in that case.
    pub fn create_process(&mut self, pid: Pid, entry_point: usize, priority: i32) -> Option<Slot> {
        let mut user_stack = memory::alloc_stack(USER_STACK_SIZE)?;
        let kernel_stack = memory::alloc_stack(KERNEL_STACK_SIZE)?;

        let mut sp = user_stack.len();
        sp -= WORD_SIZE;
        user_stack.write_word(sp, entry_point);
        sp -= WORD_SIZE;
        user_stack.write_word(sp, 0);

        let kernel_sp = kernel_stack.top();
        let slot = self.table.insert(Pcb {
            pid,
            state: ProcState::New,
            priority,
            deadline: 0,
            time_to_run: 0,
            parent: None,
            exit_status: None,
            user_stack,
            user_sp_offset: sp,
            kernel_stack,
            kernel_sp,
            address_space: AddressSpace::KERNEL,
            is_new_child: false,
            ready_next: None,
            table_next: None,
        })?;

        let pcb = self.table.get_mut(slot).expect("freshly inserted slot is live");
        pcb.state = ProcState::Ready;
        self.ready.enqueue(&mut self.table, slot);
        crate::log_info!("process {} created with priority {}", pid.0, priority);
        Some(slot)
    }

    /// Remember where the current process stopped. Called on the way
    /// into every suspending syscall, before anything else touches the
    /// PCB.
    pub fn record_current_suspend(&mut self, ctx: SavedContext) {
        if let Some(slot) = self.current {
            if let Some(pcb) = self.table.get_mut(slot) {
                let offset = ctx.stack_ptr.wrapping_sub(pcb.user_stack.base());
                debug_assert!(
                    offset <= pcb.user_stack.len(),
                    "suspended stack pointer outside the user stack"
                );
                pcb.user_sp_offset = offset;
            }
        }
    }

    /// One scheduling decision.
    ///
    /// A current process still marked `Running` is demoted to `Ready`
    /// and re-enqueued; one the syscall layer already moved to `Blocked`
    /// or `Zombie` is left where it is. The head of the ready queue
    /// becomes the new current process. `outgoing_kernel_sp` is recorded
    /// on the outgoing PCB, except when the incoming process is a forked
    /// child taking its first turn, which switches away before any
    /// saving happens.
    pub fn schedule(&mut self, outgoing_kernel_sp: Option<usize>) -> Dispatch {
        if let Some(slot) = self.current {
            if let Some(pcb) = self.table.get_mut(slot) {
                if pcb.state == ProcState::Running {
                    pcb.state = ProcState::Ready;
                    self.ready.enqueue(&mut self.table, slot);
                }
            }
        }

        let next = match self.ready.dequeue(&mut self.table) {
            Some(next) => next,
            None => {
                crate::log_info!("scheduler: no ready process");
                return Dispatch::Idle;
            }
        };

        let (resume, first_run, next_pid) = {
            let pcb = self
                .table
                .get_mut(next)
                .expect("ready queue returned a dead slot");
            pcb.state = ProcState::Running;
            let first_run = core::mem::take(&mut pcb.is_new_child);
            (
                SavedContext {
                    stack_ptr: pcb.resume_stack_ptr(),
                },
                first_run,
                pcb.pid,
            )
        };

        if !first_run {
            if let (Some(prev), Some(kernel_sp)) = (self.current, outgoing_kernel_sp) {
                if let Some(pcb) = self.table.get_mut(prev) {
                    pcb.kernel_sp = kernel_sp;
                }
            }
        }

        self.current = Some(next);
        crate::log_info!("scheduler: switching to pid {}", next_pid.0);
        Dispatch::Run {
            next,
            resume,
            first_run,
        }
    }

    /// Duplicate the current process.
    ///
    /// The child gets its own stacks, a verbatim copy of the parent's
    /// user stack at the same depth, the parent's priority and a
    /// pass-through copy of the opaque address-space handle. It is
    /// enqueued `Ready` with `is_new_child` set so its first dispatch
    /// observes a fork return value of `0`; the parent receives the
    /// child's pid as an ordinary return. Any failure leaves no partial
    /// registration behind.
    pub fn fork(&mut self) -> Result<Pid, SysError> {
        let parent = self.current.ok_or(SysError::NoCurrentProcess)?;
        let (parent_pid, priority, deadline, time_to_run, user_sp_offset, address_space) = {
            let pcb = self.table.get(parent).ok_or(SysError::NoCurrentProcess)?;
            (
                pcb.pid,
                pcb.priority,
                pcb.deadline,
                pcb.time_to_run,
                pcb.user_sp_offset,
                pcb.address_space,
            )
        };

        let mut user_stack =
            memory::alloc_stack(USER_STACK_SIZE).ok_or(SysError::AllocationFailed)?;
        let kernel_stack =
            memory::alloc_stack(KERNEL_STACK_SIZE).ok_or(SysError::AllocationFailed)?;

        {
            let pcb = self.table.get(parent).expect("current process vanished");
            user_stack
                .as_mut_slice()
                .copy_from_slice(pcb.user_stack.as_slice());
        }

        let pid = self.get_new_pid();
        let kernel_sp = kernel_stack.top();
        let slot = self
            .table
            .insert(Pcb {
                pid,
                state: ProcState::Ready,
                priority,
                deadline,
                time_to_run,
                parent: Some(parent),
                exit_status: None,
                user_stack,
                user_sp_offset,
                kernel_stack,
                kernel_sp,
                address_space,
                is_new_child: true,
                ready_next: None,
                table_next: None,
            })
            .ok_or(SysError::AllocationFailed)?;
        self.ready.enqueue(&mut self.table, slot);

        crate::log_info!("fork: pid {} created child pid {}", parent_pid.0, pid.0);
        Ok(pid)
    }

    /// One reap attempt on behalf of the current process: find a zombie
    /// child, collect its exit status and release its PCB and stacks.
    pub fn reap_zombie_child(&mut self) -> Result<(Pid, i32), SysError> {
        let parent = self.current.ok_or(SysError::NoCurrentProcess)?;
        match self.table.remove_zombie_child(parent) {
            Some(pcb) => {
                crate::log_info!("wait: reaped zombie child pid {}", pcb.pid.0);
                // Dropping the PCB is what frees its stacks.
                Ok((pcb.pid, pcb.exit_status.unwrap_or(0)))
            }
            None => Err(SysError::NoChildren),
        }
    }

    /// Move the current process to `Blocked`. It stays off the ready
    /// queue until an exiting child wakes it.
    pub fn block_current(&mut self) -> Result<(), SysError> {
        let slot = self.current.ok_or(SysError::NoCurrentProcess)?;
        let pcb = self.table.get_mut(slot).ok_or(SysError::NoCurrentProcess)?;
        pcb.state = ProcState::Blocked;
        Ok(())
    }

    /// Terminate the current process: record the exit status, mark it
    /// `Zombie` and wake its parent if the parent is blocked in `wait`.
    /// This is the only wake-up path in the system. The PCB itself stays
    /// in the table until the parent reaps it.
    pub fn exit_current(&mut self, status: i32) -> Result<(), SysError> {
        let slot = self.current.ok_or(SysError::NoCurrentProcess)?;
        let parent = {
            let pcb = self.table.get_mut(slot).ok_or(SysError::NoCurrentProcess)?;
            crate::log_info!("exit: pid {} with status {}", pcb.pid.0, status);
            pcb.exit_status = Some(status);
            pcb.state = ProcState::Zombie;
            pcb.parent
        };

        if let Some(parent) = parent {
            if let Some(pcb) = self.table.get_mut(parent) {
                if pcb.state == ProcState::Blocked {
                    pcb.state = ProcState::Ready;
                    self.ready.enqueue(&mut self.table, parent);
                }
            }
        }
        Ok(())
    }
}

// ── The global instance and its C-like interface ────────────────────────

lazy_static! {
    /// The one kernel instance behind the exported interface. Safe to
    /// share without further coordination only because execution is
    /// single-threaded and non-preemptive.
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

static IDLE_HANDLER: Once<fn() -> !> = Once::new();

pub fn init() {
    let _ = KERNEL.lock();
    crate::log_info!("process management initialized");
}

/// Register the collaborator that takes over when the ready queue
/// drains, normally the command shell's input loop.
pub fn set_idle_handler(handler: fn() -> !) {
    IDLE_HANDLER.call_once(|| handler);
}

pub fn get_new_pid() -> Pid {
    KERNEL.lock().get_new_pid()
}

/// Create a process on the global kernel. Returns the pid it now runs
/// under, or `None` if allocation failed.
pub fn create_process(pid: Pid, entry: extern "C" fn() -> !, priority: i32) -> Option<Pid> {
    KERNEL
        .lock()
        .create_process(pid, entry as usize, priority)
        .map(|_| pid)
}

/// Run one scheduling decision against the global kernel and transfer
/// control accordingly. Never returns: either some process is resumed or
/// the idle handler takes over for good.
pub fn schedule_with<C: ContextSwitch>(switch: &C) -> ! {
    let dispatch = {
        let mut kernel = KERNEL.lock();
        let kernel_sp = switch.current_stack_ptr();
        kernel.schedule(Some(kernel_sp))
    };
    // The lock is dropped before control leaves this stack.
    match dispatch {
        Dispatch::Run {
            resume, first_run, ..
        } => {
            let inject = if first_run { Some(0) } else { None };
            switch.resume(resume, inject)
        }
        Dispatch::Idle => idle(),
    }
}

#[cfg(target_arch = "x86_64")]
pub fn schedule() -> ! {
    schedule_with(&context::HardwareSwitch)
}

fn idle() -> ! {
    match IDLE_HANDLER.get() {
        Some(handler) => handler(),
        None => loop {
            #[cfg(target_arch = "x86_64")]
            x86_64::instructions::hlt();
        },
    }
}

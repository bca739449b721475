//! The syscall layer: `fork`, `wait`, `exit` and `yield` built from the
//! scheduler primitives.
//!
//! Every failure is flattened to the `-1` sentinel before it reaches the
//! calling process; there is no error propagation across the syscall
//! boundary. The wait protocol itself is architecture-neutral
//! ([`wait_with`]); the thin wrappers at the bottom bind it and the other
//! syscalls to the global kernel and the real context-switch routines.

use crate::scheduler::{Kernel, SysError};
use spin::Mutex;

/// Syscall numbers, the value a process loads before trapping in.
pub const SYS_FORK: usize = 1;
pub const SYS_WAIT: usize = 2;
pub const SYS_EXIT: usize = 3;
pub const SYS_YIELD: usize = 4;
pub const SYS_GETPID: usize = 5;

/// Sentinel returned to the calling process on any syscall failure.
pub const SYSCALL_ERROR: i32 = -1;

pub fn init() {
    crate::log_info!("syscalls: fork/wait/exit/yield ready");
}

/// The wait protocol, shared by the bare-metal wrapper and the host test
/// harness.
///
/// One reap attempt; if nothing was reapable, mark the caller `Blocked`
/// and suspend through `block`; on resumption, exactly one more attempt.
/// A second failure returns the sentinel even when live children still
/// exist; a parent waiting on several children must call wait once per
/// child.
pub fn wait_with<B: FnOnce()>(kernel: &Mutex<Kernel>, status_out: &mut i32, block: B) -> i32 {
    {
        let mut kernel = kernel.lock();
        match kernel.reap_zombie_child() {
            Ok((pid, status)) => {
                *status_out = status;
                return pid.0 as i32;
            }
            Err(SysError::NoCurrentProcess) => return SYSCALL_ERROR,
            Err(_) => {}
        }
        if let Some(pid) = kernel.current_pid() {
            crate::log_info!("wait: pid {} blocking until a child exits", pid.0);
        }
        if kernel.block_current().is_err() {
            return SYSCALL_ERROR;
        }
    }

    block();

    let mut kernel = kernel.lock();
    match kernel.reap_zombie_child() {
        Ok((pid, status)) => {
            *status_out = status;
            pid.0 as i32
        }
        Err(_) => SYSCALL_ERROR,
    }
}

#[cfg(target_arch = "x86_64")]
mod wrappers {
    use super::{wait_with, SYSCALL_ERROR, SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_WAIT, SYS_YIELD};
    use crate::scheduler::context::{suspend_to, ContextSwitch, HardwareSwitch, SavedContext};
    use crate::scheduler::{self, KERNEL};

    /// fork(): the parent receives the child's pid; the child observes
    /// `0` from the same call site when first scheduled. No switch is
    /// forced here; the child simply joins the ready queue.
    pub fn sys_fork() -> i32 {
        suspend_to(fork_inner)
    }

    extern "C" fn fork_inner(stack_ptr: usize) -> i32 {
        let mut kernel = KERNEL.lock();
        kernel.record_current_suspend(SavedContext { stack_ptr });
        match kernel.fork() {
            Ok(pid) => pid.0 as i32,
            Err(err) => {
                crate::log_warn!("fork failed: {:?}", err);
                SYSCALL_ERROR
            }
        }
    }

    /// yield(): give up the CPU. Control returns here once the
    /// scheduler picks this process again.
    pub fn sys_yield() {
        suspend_to(yield_inner);
    }

    extern "C" fn yield_inner(stack_ptr: usize) -> i32 {
        let kernel_sp = {
            let mut kernel = KERNEL.lock();
            kernel.record_current_suspend(SavedContext { stack_ptr });
            match kernel.current_kernel_sp() {
                Some(sp) => sp,
                None => {
                    crate::log_warn!("yield with no current process");
                    return SYSCALL_ERROR;
                }
            }
        };
        // The user stack is frozen now; the rest of the switch runs on
        // this process's kernel stack.
        HardwareSwitch.enter_kernel_stack(kernel_sp, schedule_on_kernel_stack)
    }

    extern "C" fn schedule_on_kernel_stack() -> ! {
        scheduler::schedule()
    }

    /// wait(&status): reap one zombie child, blocking at most once.
    pub fn sys_wait(status_out: &mut i32) -> i32 {
        wait_with(&KERNEL, status_out, sys_yield)
    }

    /// exit(status): never returns for a live process. A stray call
    /// with no current process is ignored.
    pub fn sys_exit(status: i32) {
        {
            let mut kernel = KERNEL.lock();
            if kernel.exit_current(status).is_err() {
                crate::log_warn!("exit with no current process");
                return;
            }
        }
        // The zombie can never be picked again; this transfers control
        // away for good.
        scheduler::schedule()
    }

    pub fn sys_getpid() -> i32 {
        KERNEL
            .lock()
            .current_pid()
            .map_or(SYSCALL_ERROR, |pid| pid.0 as i32)
    }

    /// Central dispatcher, the target of the software-interrupt stub.
    ///
    /// # Safety
    /// For `SYS_WAIT`, `arg0` must be null or a valid pointer to an
    /// `i32` the calling process owns.
    pub unsafe fn dispatch(number: usize, arg0: usize) -> i32 {
        match number {
            SYS_FORK => sys_fork(),
            SYS_WAIT => {
                let status_ptr = arg0 as *mut i32;
                let mut scratch = 0;
                let status_out = if status_ptr.is_null() {
                    &mut scratch
                } else {
                    &mut *status_ptr
                };
                sys_wait(status_out)
            }
            SYS_EXIT => {
                sys_exit(arg0 as i32);
                SYSCALL_ERROR // only reached with no current process
            }
            SYS_YIELD => {
                sys_yield();
                0
            }
            SYS_GETPID => sys_getpid(),
            _ => {
                crate::log_warn!("syscall: unknown number {}", number);
                SYSCALL_ERROR
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
pub use wrappers::{dispatch, sys_exit, sys_fork, sys_getpid, sys_wait, sys_yield};

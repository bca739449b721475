//! The context-switch protocol.
//!
//! A suspended process is described entirely by the stack pointer it
//! stopped on: the word there is its saved frame pointer, the word above
//! that the return address of the syscall it suspended in. Resuming is
//! loading that pointer, popping the frame pointer and returning. This
//! only works because processes suspend exclusively at explicit syscall
//! sites, never at arbitrary instructions.
//!
//! Everything that actually touches registers lives in the `x86_64`
//! section at the bottom; the scheduler above this seam is
//! architecture-neutral.

/// A suspended process's execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    /// Stack pointer at the moment of suspension.
    pub stack_ptr: usize,
}

/// The seam between the architecture-neutral scheduler and the machine.
pub trait ContextSwitch {
    /// Stack pointer at the call site, recorded as the outgoing kernel
    /// stack position during a switch.
    fn current_stack_ptr(&self) -> usize;

    /// Abandon the current stack and continue in `f` on `kernel_sp`.
    fn enter_kernel_stack(&self, kernel_sp: usize, f: extern "C" fn() -> !) -> !;

    /// Transfer control into `ctx`. `inject`, if given, is the value the
    /// resumed code observes as its syscall return; a forked child gets
    /// `0` this way on its first dispatch.
    fn resume(&self, ctx: SavedContext, inject: Option<usize>) -> !;
}

#[cfg(target_arch = "x86_64")]
pub use x86_64_impl::{suspend_to, HardwareSwitch};

#[cfg(target_arch = "x86_64")]
mod x86_64_impl {
    use super::{ContextSwitch, SavedContext};
    use core::arch::{asm, naked_asm};

    /// The real switch routines. Only the stack pointer is saved and
    /// restored; the System V call convention reloads every other
    /// register from the stack on the way back out.
    pub struct HardwareSwitch;

    impl ContextSwitch for HardwareSwitch {
        fn current_stack_ptr(&self) -> usize {
            let sp: usize;
            unsafe {
                asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack));
            }
            sp
        }

        fn enter_kernel_stack(&self, kernel_sp: usize, f: extern "C" fn() -> !) -> ! {
            unsafe { call_on_stack(kernel_sp, f) }
        }

        fn resume(&self, ctx: SavedContext, inject: Option<usize>) -> ! {
            unsafe {
                match inject {
                    Some(value) => resume_with_value(ctx.stack_ptr, value),
                    None => resume_at(ctx.stack_ptr),
                }
            }
        }
    }

    /// Suspension point for syscalls that may be switched away from.
    ///
    /// Pushes the frame pointer so the captured stack top matches the
    /// resume protocol, then hands the captured stack pointer to `f`.
    /// If `f` returns (the fork-parent path), its value goes back to the
    /// caller; a context later resumed from the captured pointer
    /// re-enters the caller at the same return site with the injected
    /// value instead.
    #[unsafe(naked)]
    pub extern "C" fn suspend_to(f: extern "C" fn(usize) -> i32) -> i32 {
        naked_asm!(
            "mov rax, rdi",
            "push rbp",
            "mov rdi, rsp",
            "call rax",
            "pop rbp",
            "ret",
        )
    }

    /// Load `stack_ptr`, pop the saved frame pointer, return to the
    /// address stored on the suspended stack.
    ///
    /// # Safety
    /// `stack_ptr` must point at a frame laid out by [`suspend_to`] or by
    /// process creation: saved RBP first, a return address above it.
    #[unsafe(naked)]
    pub unsafe extern "C" fn resume_at(stack_ptr: usize) -> ! {
        naked_asm!(
            "mov rsp, rdi",
            "pop rbp",
            "ret",
        )
    }

    /// [`resume_at`] with `value` placed in the return-value register,
    /// the path a forked child first runs on.
    ///
    /// # Safety
    /// Same contract as [`resume_at`].
    #[unsafe(naked)]
    pub unsafe extern "C" fn resume_with_value(stack_ptr: usize, value: usize) -> ! {
        naked_asm!(
            "mov rax, rsi",
            "mov rsp, rdi",
            "pop rbp",
            "ret",
        )
    }

    /// Switch to `stack_ptr` and call `f` there.
    ///
    /// # Safety
    /// `stack_ptr` must be the usable top of a live kernel stack and `f`
    /// must never return.
    #[unsafe(naked)]
    pub unsafe extern "C" fn call_on_stack(stack_ptr: usize, f: extern "C" fn() -> !) -> ! {
        naked_asm!(
            "mov rsp, rdi",
            "call rsi",
            "ud2",
        )
    }
}

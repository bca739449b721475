//! NucleusOS process core: the PCB model, the priority ready queue, the
//! cooperative context-switch protocol and the fork/wait/exit/yield
//! syscalls built on top of it.
//!
//! The crate is freestanding (`no_std` + `alloc`) so it links straight
//! into a kernel image, but everything above the narrow unsafe switch
//! routines in `scheduler::context` is architecture-neutral and runs under
//! the host test harness as well.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod debug;
pub mod memory;
pub mod scheduler;
pub mod syscalls;

pub use scheduler::{Kernel, Pid};

#[cfg(not(test))]
use core::panic::PanicInfo;

/// Bring the process core up. The boot stage must have handed the heap to
/// `memory::init_heap` before any process is created.
pub fn init() {
    #[cfg(target_arch = "x86_64")]
    debug::init_serial();
    memory::init();
    scheduler::init();
    syscalls::init();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log_error!("{}", info);
    loop {
        #[cfg(target_arch = "x86_64")]
        x86_64::instructions::hlt();
    }
}

//! osmos - preemptive real-time kernel for single-core microcontrollers
//!
//! A real-time operating system kernel providing:
//! - Priority-based preemptive scheduling with round-robin within a level
//! - Synchronization primitives (mutexes with priority inheritance and
//!   ceiling, semaphores, condition variables, event flags)
//! - Time services (64-bit tick clock, sleeps, one-shot/periodic timers)
//! - Bounded producer/consumer plumbing (priority message queues,
//!   fixed-block memory pools)
//! - Context switching for ARM Cortex-M

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod ipc;
pub mod port;
pub mod sync;

// ============ Re-exports ============

pub use core::clock;
pub use core::clock::os_clock_now;
pub use core::config;
pub use core::config::*;
pub use core::critical;
pub use core::error;
pub use core::error::{OsError, OsResult};
pub use core::kernel;
pub use core::kernel::{os_init, os_int_enter, os_int_exit, os_sched_lock, os_sched_unlock,
    os_start};
pub use core::prio;
pub use core::sched;
pub use core::sched::os_yield;
pub use core::thread;
pub use core::thread::{os_thread_create, OsTcb};
pub use core::time;
pub use core::time::{os_sleep, os_sleep_ms, os_sleep_until, timer};
pub use core::types;
pub use core::types::*;

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "condvar")]
pub use sync::condvar;
#[cfg(feature = "flags")]
pub use sync::flags;
pub use sync::wait;

#[cfg(feature = "queue")]
pub use ipc::queue;
#[cfg(feature = "pool")]
pub use ipc::pool;

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;

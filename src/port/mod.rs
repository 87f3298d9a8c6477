//! Port layer - CPU-specific implementations
//!
//! Hardware abstraction for context switching, the tick source, stack
//! seeding, the idle action, and the fatal-condition hook.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (host unit tests)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::thread::OsThreadFn;
    use crate::types::OsStkElement;

    pub fn os_start_high_rdy() -> ! {
        panic!("os_start_high_rdy not available on this platform");
    }

    pub fn os_ctx_sw() {
        // No-op for testing
    }

    pub fn os_int_ctx_sw() {
        // No-op for testing
    }

    pub unsafe fn os_thread_stk_init(
        _entry: OsThreadFn,
        _arg: *mut (),
        stk_base: *mut OsStkElement,
        stk_size: usize,
    ) -> *mut OsStkElement {
        // Return top of stack for testing
        unsafe { stk_base.add(stk_size - 1) }
    }

    pub fn os_cpu_systick_init(_reload: u32) {
        // No-op for testing
    }

    pub fn os_cpu_idle() {
        // No-op for testing
    }

    pub fn os_fatal(msg: &'static str) -> ! {
        panic!("{}", msg);
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;

//! Critical section handling
//!
//! Provides safe critical section primitives for protecting kernel
//! structures. The guard carries the previous interrupt state, so
//! critical sections nest: the inner exit restores "still disabled" and
//! only the outermost exit re-enables interrupts.

/// RAII guard for an interrupt-disabled region.
///
/// Interrupts are disabled when the guard is created and restored to
/// their previous state when it is dropped.
pub struct CriticalSection {
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    was_active: bool,
}

impl CriticalSection {
    /// Enter a critical section by masking interrupts.
    #[inline(always)]
    pub fn enter() -> Self {
        #[cfg(target_arch = "arm")]
        {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            CriticalSection { was_active }
        }

        #[cfg(not(target_arch = "arm"))]
        CriticalSection { was_active: false }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        #[cfg(target_arch = "arm")]
        if self.was_active {
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

/// Execute a closure with interrupts masked.
///
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`CsCell`](crate::core::cs_cell::CsCell)
/// protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}

//! Time management module
//!
//! Sleeps, timeout dispatch, and the tick handler.

pub mod timer;

use core::ptr::NonNull;

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::wait;
use crate::thread::OsTcb;
use crate::types::{OsPendOn, OsPendStatus, OsTick};

/// Sleep for a number of ticks.
///
/// A zero-tick sleep does not block; it only offers the CPU to a more
/// urgent ready thread.
///
/// # Returns
/// * `Ok(())` - Sleep elapsed (or was cut short by `os_sleep_resume`)
/// * `Err(OsError::Canceled)` - Thread was canceled
pub fn os_sleep(ticks: OsTick) -> OsResult<()> {
    if ticks == 0 {
        sched::os_sched();
        return Ok(());
    }

    os_sleep_until(clock::deadline_after(ticks))
}

/// Sleep until an absolute tick deadline.
pub fn os_sleep_until(deadline: OsTick) -> OsResult<()> {
    let blocked = critical_section(|_cs| {
        if deadline <= clock::os_clock_now() {
            return Ok(None);
        }

        let cur = wait::blocking_checks()?;

        unsafe {
            wait::block_current(cur, None, OsPendOn::Sleep, core::ptr::null(), deadline);
        }
        sched::os_sched();
        Ok(Some(cur))
    })?;

    let Some(cur) = blocked else {
        return Ok(());
    };

    critical_section(|_cs| match unsafe { wait::pend_result(cur) } {
        // expiry is the normal way out of a sleep
        Err(OsError::Timeout) | Ok(()) => Ok(()),
        Err(e) => Err(e),
    })
}

/// Sleep for a number of milliseconds (rounded up to whole ticks).
#[inline]
pub fn os_sleep_ms(ms: u64) -> OsResult<()> {
    os_sleep(clock::ticks_from_millis(ms))
}

/// Cut a sleeping thread's delay short.
///
/// The target wakes immediately with success; threads blocked on a
/// wait object are not eligible.
pub fn os_sleep_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let t = unsafe { tcb.as_ref() };

        if !t.is_blocked() || t.pend_on != OsPendOn::Sleep {
            return Err(OsError::NotPermitted);
        }

        unsafe { wait::unblock(tcb, OsPendStatus::Ok) };
        sched::os_sched();

        Ok(())
    })
}

/// Tick handler
///
/// Call from the tick interrupt: advances the clock, releases every
/// expired timed wait in deadline order, kicks the timer-service
/// thread when a software timer is due, and performs round-robin
/// accounting.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::KERNEL.int_enter();

    critical_section(|_cs| {
        let now = kernel::KERNEL.tick_increment();

        process_expired_deadlines(now);
        timer::os_tmr_tick_notify(now);
        sched::os_sched_round_robin();
    });

    kernel::os_int_exit();
}

/// Release every thread whose deadline has passed.
///
/// Entries are popped from the head of the deadline-ordered list, so
/// dispatch order is deadline order, insertion order within a tick.
fn process_expired_deadlines(now: OsTick) {
    unsafe {
        while let Some(head) = kernel::tick_list_head() {
            if head.as_ref().deadline > now {
                break;
            }
            wait::unblock(head, OsPendStatus::Timeout);
        }
    }
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}

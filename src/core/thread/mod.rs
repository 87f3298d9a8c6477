//! Thread management module
//!
//! Thread creation, lifecycle (exit/join/detach/cancel), suspension,
//! priority changes, and per-thread signal flags.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_PRIO_LEVELS, CFG_PRIO_TIMER, CFG_STK_SIZE_MIN,
    CFG_TIME_QUANTA_DEFAULT};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::prio::{idx_to_prio, prio_to_idx};
use crate::sched;
use crate::sync::wait;
use crate::types::{
    FlagMode, OsFlags, OsPendOn, OsPendStatus, OsPrio, OsStkElement, OsThreadPrio, OsThreadState,
    OsTick, FOREVER, SIG_WAKEUP,
};

/// Thread entry point function type
pub type OsThreadFn = fn(*mut ()) -> !;

/// Create a new thread from caller-provided storage
///
/// The TCB and stack live in the application; the kernel only links
/// them in. The thread becomes ready immediately and preempts the
/// caller if it is more urgent.
///
/// # Arguments
/// * `tcb` - Static mutable reference to the Thread Control Block
/// * `stack` - Static mutable reference to the stack array
/// * `name` - Thread name for debugging
/// * `entry` - Thread entry point function
/// * `prio` - Application priority, `-30..=+30` (higher = more urgent)
///
/// # Example
/// ```ignore
/// static mut WORKER_TCB: OsTcb = OsTcb::new();
/// static mut WORKER_STK: [OsStkElement; 256] = [0; 256];
///
/// fn worker(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// // In main:
/// os_thread_create(
///     unsafe { &mut WORKER_TCB },
///     unsafe { &mut WORKER_STK },
///     "worker",
///     worker,
///     0,
/// ).expect("thread creation failed");
/// ```
pub fn os_thread_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    entry: OsThreadFn,
    prio: OsThreadPrio,
) -> OsResult<()> {
    let idx = prio_to_idx(prio)?;

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    unsafe {
        os_thread_create_raw(
            tcb as *mut OsTcb,
            name,
            entry,
            core::ptr::null_mut(),
            idx,
            stack.as_mut_ptr(),
            stack.len(),
            CFG_TIME_QUANTA_DEFAULT,
        )
    }
}

/// Internal thread creation taking an internal priority slot.
///
/// Used by `os_init` for the idle and timer-service threads.
///
/// # Safety
/// `tcb` and `stk_base` must point to storage that outlives the thread
/// and is not used for anything else.
pub(crate) unsafe fn os_thread_create_raw(
    tcb: *mut OsTcb,
    name: &'static str,
    entry: OsThreadFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: u32,
) -> OsResult<()> {
    if tcb.is_null() || stk_base.is_null() {
        return Err(OsError::InvalidArgument);
    }

    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::InvalidArgument);
    }

    if prio as usize >= CFG_PRIO_LEVELS {
        return Err(OsError::InvalidArgument);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb };
        tcb_ref.init();

        tcb_ref.name = name;
        tcb_ref.prio = prio;
        tcb_ref.base_prio = prio;
        tcb_ref.time_quanta = time_quanta;
        tcb_ref.time_quanta_ctr = time_quanta;
        tcb_ref.state = OsThreadState::Ready;

        let stk_ptr = unsafe { crate::port::os_thread_stk_init(entry, arg, stk_base, stk_size) };
        tcb_ref.stk_ptr = stk_ptr;
        tcb_ref.stk_base = stk_base;
        tcb_ref.stk_size = stk_size;
        tcb_ref.stk_limit = unsafe { stk_base.add(stk_size / 10) }; // 10% watermark

        tcb_ref.entry = entry as usize;
        tcb_ref.entry_arg = arg;

        let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
        unsafe { sched::os_rdy_list_insert(tcb_nonnull) };

        if kernel::KERNEL.is_running() {
            sched::os_sched();
        }

        Ok(())
    })
}

/// The calling thread's own TCB
#[inline]
pub fn os_thread_self() -> Option<NonNull<OsTcb>> {
    unsafe { kernel::tcb_cur_ptr() }
}

/// Terminate the calling thread.
///
/// Held robust mutexes are released with owner-death marking; a joiner,
/// if one is parked, is handed `value`. A detached thread's runtime
/// state is fully unlinked here and its storage may be reused by the
/// creator.
pub fn os_thread_exit(value: *mut ()) -> ! {
    if is_isr_context() || !kernel::KERNEL.is_running() {
        crate::port::os_fatal("os_thread_exit outside thread context");
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        crate::port::os_fatal("os_thread_exit with scheduler locked");
    }

    critical_section(|_cs| {
        let cur_ptr = match unsafe { kernel::tcb_cur_ptr() } {
            Some(p) => p,
            None => crate::port::os_fatal("os_thread_exit with no current thread"),
        };

        unsafe {
            sched::os_rdy_list_remove(cur_ptr);

            let cur = &mut *cur_ptr.as_ptr();
            cur.state = OsThreadState::Terminated;
            cur.exit_val = value;
            cur.cancel_pending = false;

            #[cfg(feature = "mutex")]
            crate::sync::mutex::release_all_on_exit(cur_ptr);

            if let Some(joiner) = cur.joiner.take() {
                wait::unblock(joiner, OsPendStatus::Ok);
            }
        }
    });

    sched::os_sched();

    // never reached: the context switch requested above takes effect as
    // soon as interrupts are unmasked
    loop {
        crate::port::os_cpu_idle();
    }
}

/// Wait for a thread to terminate and collect its exit value.
///
/// At most one thread may join a given thread. Join is unbounded; the
/// supported teardown pattern for a blocked thread is
/// `os_thread_cancel` followed by `os_thread_join`.
pub fn os_thread_join(target: NonNull<OsTcb>) -> OsResult<*mut ()> {
    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    if Some(target) == unsafe { kernel::tcb_cur_ptr() } {
        return Err(OsError::Deadlock);
    }

    let already = critical_section(|_cs| {
        let t = unsafe { &mut *target.as_ptr() };

        if t.state == OsThreadState::Terminated {
            return Ok(Some(t.exit_val));
        }

        if t.detached || t.joiner.is_some() {
            return Err(OsError::NotPermitted);
        }

        let cur = wait::blocking_checks()?;

        t.joiner = Some(cur);
        unsafe {
            wait::block_current(
                cur,
                None,
                OsPendOn::Join,
                target.as_ptr() as *const (),
                FOREVER,
            );
        }
        sched::os_sched();
        Ok(None)
    })?;

    if let Some(val) = already {
        return Ok(val);
    }

    critical_section(|_cs| {
        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
        unsafe { wait::pend_result(cur)? };
        Ok(unsafe { target.as_ref().exit_val })
    })
}

/// Detach a thread: nobody will join it, and on termination it releases
/// its runtime state by itself.
pub fn os_thread_detach(target: NonNull<OsTcb>) -> OsResult<()> {
    critical_section(|_cs| {
        let t = unsafe { &mut *target.as_ptr() };

        if t.joiner.is_some() {
            return Err(OsError::NotPermitted);
        }

        t.detached = true;
        Ok(())
    })
}

/// Cancel a thread.
///
/// A blocked thread is released immediately with `Canceled`; a ready or
/// running thread observes the cancellation at its next suspension
/// point. The thread is expected to exit in response.
pub fn os_thread_cancel(target: NonNull<OsTcb>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let t = unsafe { &mut *target.as_ptr() };

        match t.state {
            OsThreadState::Terminated => Err(OsError::InvalidArgument),
            OsThreadState::Blocked | OsThreadState::BlockedSuspended => {
                if t.pend_on == OsPendOn::Join {
                    // unhook from the thread being joined
                    let joined = t.pend_obj as *mut OsTcb;
                    unsafe { (*joined).joiner = None };
                }
                unsafe { wait::unblock(target, OsPendStatus::Canceled) };
                sched::os_sched();
                Ok(())
            }
            _ => {
                t.cancel_pending = true;
                Ok(())
            }
        }
    })
}

/// Suspend a thread (nesting)
pub fn os_thread_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?,
        };

        let t = unsafe { &mut *tcb_ptr.as_ptr() };

        if t.base_prio == CFG_PRIO_IDLE || t.base_prio == CFG_PRIO_TIMER {
            return Err(OsError::NotPermitted);
        }

        t.suspend_ctr = t.suspend_ctr.saturating_add(1);

        match t.state {
            OsThreadState::Ready | OsThreadState::Running => {
                t.state = OsThreadState::Suspended;
                unsafe { sched::os_rdy_list_remove(tcb_ptr) };
            }
            OsThreadState::Blocked => {
                t.state = OsThreadState::BlockedSuspended;
            }
            OsThreadState::Terminated => {
                return Err(OsError::InvalidArgument);
            }
            _ => {} // already suspended
        }

        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            sched::os_sched();
        }

        Ok(())
    })
}

/// Resume a suspended thread
pub fn os_thread_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let t = unsafe { &mut *tcb.as_ptr() };

        if t.suspend_ctr == 0 {
            return Err(OsError::NotPermitted);
        }

        t.suspend_ctr -= 1;

        if t.suspend_ctr == 0 {
            match t.state {
                OsThreadState::Suspended => {
                    t.state = OsThreadState::Ready;
                    unsafe { sched::os_rdy_list_insert(tcb) };
                }
                OsThreadState::BlockedSuspended => {
                    t.state = OsThreadState::Blocked;
                }
                _ => {}
            }

            sched::os_sched();
        }

        Ok(())
    })
}

/// Change a thread's stable priority.
///
/// The effective priority keeps any boost still demanded by held
/// mutexes; a thread blocked on an inheritance mutex re-propagates its
/// new urgency down the ownership chain.
pub fn os_thread_set_prio(target: NonNull<OsTcb>, prio: OsThreadPrio) -> OsResult<()> {
    let idx = prio_to_idx(prio)?;

    critical_section(|_cs| {
        let t = unsafe { &mut *target.as_ptr() };

        if t.state == OsThreadState::Terminated {
            return Err(OsError::InvalidArgument);
        }

        t.base_prio = idx;

        #[cfg(feature = "mutex")]
        let eff = match unsafe { crate::sync::mutex::held_boost(target) } {
            Some(boost) => idx.min(boost),
            None => idx,
        };
        #[cfg(not(feature = "mutex"))]
        let eff = idx;

        unsafe { sched::set_effective_prio(target, eff) };

        #[cfg(feature = "mutex")]
        if t.is_blocked() && t.pend_on == OsPendOn::Mutex {
            unsafe { crate::sync::mutex::on_waiter_prio_change(target) };
        }

        Ok(())
    })?;

    sched::os_sched();
    Ok(())
}

/// A thread's stable (application-assigned) priority
pub fn os_thread_get_prio(target: NonNull<OsTcb>) -> OsThreadPrio {
    idx_to_prio(unsafe { target.as_ref().base_prio })
}

/// A thread's effective priority, including any inheritance or ceiling
/// boost currently applied
pub fn os_thread_effective_prio(target: NonNull<OsTcb>) -> OsThreadPrio {
    idx_to_prio(unsafe { target.as_ref().prio })
}

// ============ Per-thread signal flags ============

/// Raise signal bits on a thread. ISR-safe.
///
/// If the thread is blocked in a signal wait whose predicate the new
/// bits satisfy, it is released.
pub fn os_thread_sig_set(target: NonNull<OsTcb>, bits: OsFlags) -> OsResult<()> {
    if bits == 0 {
        return Err(OsError::InvalidArgument);
    }

    critical_section(|_cs| {
        let t = unsafe { &mut *target.as_ptr() };

        t.sig_flags |= bits;

        if t.is_blocked() && t.pend_on == OsPendOn::Sig {
            if let Some(matched) = t.flags_mode.matched(t.sig_flags, t.flags_pend) {
                t.flags_rdy = matched;
                if t.flags_consume {
                    t.sig_flags &= !matched;
                }
                unsafe { wait::unblock(target, OsPendStatus::Ok) };

                if !is_isr_context() {
                    sched::os_sched();
                }
            }
        }

        Ok(())
    })
}

/// Wake a thread blocked in a signal wait.
///
/// Raises the reserved wakeup bit. A thread blocked on any other kind
/// of object is not disturbed.
#[inline]
pub fn os_thread_wakeup(target: NonNull<OsTcb>) -> OsResult<()> {
    os_thread_sig_set(target, SIG_WAKEUP)
}

/// Wait for signal bits on the calling thread (unbounded)
pub fn os_thread_sig_wait(mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
    sig_pend(mask, mode, consume, FOREVER, true)
}

/// Non-blocking signal check
pub fn os_thread_sig_try_wait(mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
    sig_pend(mask, mode, consume, FOREVER, false)
}

/// Signal wait with a deadline, in ticks from now
pub fn os_thread_sig_timed_wait(
    mask: OsFlags,
    mode: FlagMode,
    consume: bool,
    ticks: OsTick,
) -> OsResult<OsFlags> {
    sig_pend(mask, mode, consume, crate::clock::deadline_after(ticks), true)
}

fn sig_pend(
    mask: OsFlags,
    mode: FlagMode,
    consume: bool,
    deadline: OsTick,
    blocking: bool,
) -> OsResult<OsFlags> {
    if mask == 0 {
        return Err(OsError::InvalidArgument);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    let immediate = critical_section(|_cs| {
        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
        let t = unsafe { &mut *cur.as_ptr() };

        if let Some(matched) = mode.matched(t.sig_flags, mask) {
            if consume {
                t.sig_flags &= !matched;
            }
            return Ok(Some(matched));
        }

        if !blocking {
            return Err(OsError::ResourceUnavailable);
        }

        let cur = wait::blocking_checks()?;
        let t = unsafe { &mut *cur.as_ptr() };

        t.flags_pend = mask;
        t.flags_mode = mode;
        t.flags_consume = consume;
        t.flags_rdy = 0;

        unsafe {
            wait::block_current(cur, None, OsPendOn::Sig, core::ptr::null(), deadline);
        }
        sched::os_sched();
        Ok(None)
    })?;

    if let Some(matched) = immediate {
        return Ok(matched);
    }

    critical_section(|_cs| {
        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
        unsafe { wait::pend_result(cur)? };
        Ok(unsafe { cur.as_ref().flags_rdy })
    })
}

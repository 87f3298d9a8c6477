//! Scheduler module
//!
//! Priority-based preemptive scheduler with round-robin for
//! same-priority threads.

mod rdy_list;

pub use rdy_list::ReadyList;

use core::ptr::NonNull;

use crate::config::CFG_SCHED_ROUND_ROBIN_EN;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::thread::OsTcb;
use crate::types::{OsPrio, OsThreadState};

/// Main scheduling point
///
/// Determines the highest-priority ready thread and requests a context
/// switch if it differs from the current one. Called after any
/// operation that may change thread readiness. The switch itself is a
/// deferred exception, so it takes effect once the caller leaves its
/// critical section.
pub fn os_sched() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    if is_isr_context() {
        return;
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return;
    }

    let _cs = CriticalSection::enter();

    let high_prio = unsafe { kernel::prio_table().get_highest() };

    unsafe {
        if let Some(high_rdy) = kernel::rdy_list(high_prio).head() {
            let prev_high = kernel::tcb_high_rdy_ptr();
            kernel::set_prio_high_rdy(high_prio);
            kernel::set_tcb_high_rdy_ptr(Some(high_rdy));

            if Some(high_rdy) != kernel::tcb_cur_ptr() {
                demote_if_superseded(kernel::tcb_cur_ptr(), high_rdy);
                // a winner picked earlier in the same critical section
                // may have been displaced before the switch happened
                demote_if_superseded(prev_high, high_rdy);

                (*high_rdy.as_ptr()).state = OsThreadState::Running;

                crate::port::os_ctx_sw();
            }
        }
    }
}

/// Mark a previously selected thread `Ready` again when another thread
/// wins the switch that is still pending. Caller holds the interrupt
/// lock.
unsafe fn demote_if_superseded(tcb: Option<NonNull<OsTcb>>, winner: NonNull<OsTcb>) {
    if let Some(t) = tcb {
        if t != winner {
            let t_ref = unsafe { &mut *t.as_ptr() };
            if t_ref.state == OsThreadState::Running {
                t_ref.state = OsThreadState::Ready;
            }
        }
    }
}

/// Round-robin accounting, called from the tick handler
pub fn os_sched_round_robin() {
    if !CFG_SCHED_ROUND_ROBIN_EN {
        return;
    }

    if !kernel::KERNEL.is_running() {
        return;
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return;
    }

    critical_section(|_cs| {
        unsafe {
            if let Some(cur_ptr) = kernel::tcb_cur_ptr() {
                let cur = &mut *cur_ptr.as_ptr();

                if cur.time_quanta_ctr > 0 {
                    cur.time_quanta_ctr -= 1;
                }

                if cur.time_quanta_ctr == 0 {
                    cur.time_quanta_ctr = cur.time_quanta;
                    rotate_band(cur_ptr);
                }
            }
        }
    });
}

/// Give up the CPU to the next thread of the same priority.
///
/// The calling thread moves to the tail of its priority band; if it is
/// alone in the band, the call is a no-op. This is a suspension point:
/// a pending cancellation is observed here.
pub fn os_yield() -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let cur_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;

        let cur = unsafe { &mut *cur_ptr.as_ptr() };
        if cur.cancel_pending {
            cur.cancel_pending = false;
            return Err(OsError::Canceled);
        }

        unsafe { rotate_band(cur_ptr) };
        Ok(())
    })
}

/// Move `tcb` to the tail of its band and request a switch if that
/// changed the band's head. Caller holds the interrupt lock.
unsafe fn rotate_band(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref().prio };
    let rdy_list = unsafe { kernel::rdy_list(prio) };

    if rdy_list.head() != rdy_list.tail() {
        rdy_list.remove(tcb);
        rdy_list.insert_tail(tcb);

        if let Some(new_head) = rdy_list.head() {
            unsafe {
                let t = &mut *tcb.as_ptr();
                if t.state == OsThreadState::Running {
                    t.state = OsThreadState::Ready;
                }
                (*new_head.as_ptr()).state = OsThreadState::Running;

                kernel::set_tcb_high_rdy_ptr(Some(new_head));
            }
            crate::port::os_ctx_sw();
        }
    }
}

/// Make a thread ready
pub(crate) unsafe fn os_rdy_list_insert(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref().prio };

    unsafe {
        kernel::rdy_list(prio).insert_tail(tcb);
        kernel::prio_table().insert(prio);
    }
}

/// Remove a thread from the ready set
pub(crate) unsafe fn os_rdy_list_remove(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref().prio };

    unsafe {
        let rdy_list = kernel::rdy_list(prio);
        rdy_list.remove(tcb);

        if rdy_list.is_empty() {
            kernel::prio_table().remove(prio);
        }
    }
}

/// Move a ready thread to a different priority slot
pub(crate) unsafe fn os_rdy_list_change_prio(tcb: NonNull<OsTcb>, new_prio: OsPrio) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    let old_prio = tcb_ref.prio;

    if old_prio == new_prio {
        return;
    }

    unsafe {
        let old_rdy_list = kernel::rdy_list(old_prio);
        old_rdy_list.remove(tcb);
        if old_rdy_list.is_empty() {
            kernel::prio_table().remove(old_prio);
        }
    }

    tcb_ref.prio = new_prio;

    unsafe {
        kernel::rdy_list(new_prio).insert_tail(tcb);
        kernel::prio_table().insert(new_prio);
    }
}

/// Change a thread's effective priority, wherever it currently lives.
///
/// Ready threads move between ready lists; blocked threads are
/// re-sorted within their wait queue. Caller holds the interrupt lock.
pub(crate) unsafe fn set_effective_prio(tcb: NonNull<OsTcb>, new_prio: OsPrio) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    if tcb_ref.prio == new_prio {
        return;
    }

    match tcb_ref.state {
        OsThreadState::Ready | OsThreadState::Running => unsafe {
            os_rdy_list_change_prio(tcb, new_prio);
        },
        OsThreadState::Blocked | OsThreadState::BlockedSuspended => {
            tcb_ref.prio = new_prio;
            if !tcb_ref.pend_q.is_null() {
                unsafe { (*tcb_ref.pend_q).reorder(tcb) };
            }
        }
        _ => {
            tcb_ref.prio = new_prio;
        }
    }
}

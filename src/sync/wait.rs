//! Wait queue and the shared block/wake protocol
//!
//! Every wait object (mutex, semaphore, condition variable, event
//! flags, message queue, memory pool) embeds a [`WaitQueue`] and drives
//! it through the helpers here: [`block_current`] parks the running
//! thread, [`unblock`] releases a parked thread with an outcome, and
//! [`pend_result`] maps that outcome back to an `OsResult` once the
//! thread runs again.
//!
//! All mutation happens under the interrupt lock. The post-side
//! operations are ISR-safe; rescheduling from an ISR is deferred to
//! `os_int_exit`.

use core::ptr::NonNull;

use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::thread::OsTcb;
use crate::types::{OsPendOn, OsPendStatus, OsThreadState, OsTick, FOREVER};

/// Priority-ordered queue of blocked threads
///
/// Ordered by descending effective priority (ascending internal index),
/// FIFO within a band. Wakeups always take the head.
#[derive(Debug)]
pub struct WaitQueue {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl WaitQueue {
    /// Create a new empty wait queue
    pub const fn new() -> Self {
        WaitQueue {
            head: None,
            tail: None,
        }
    }

    /// Initialize the wait queue
    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    /// Check if the queue is empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Most urgent waiter, if any
    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Number of waiters (walks the list)
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            n += 1;
            cursor = unsafe { cur.as_ref().pend_next };
        }
        n
    }

    /// Insert in priority order: before the first entry that is less
    /// urgent, after all entries of equal urgency.
    pub fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref().prio };

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = current;
            current = cur_ref.pend_next;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev = prev;
        tcb_mut.pend_next = current;

        match prev {
            Some(p) => {
                unsafe { (*p.as_ptr()).pend_next = Some(tcb) };
            }
            None => {
                self.head = Some(tcb);
            }
        }

        match current {
            Some(c) => {
                unsafe { (*c.as_ptr()).pend_prev = Some(tcb) };
            }
            None => {
                self.tail = Some(tcb);
            }
        }
    }

    /// Remove a specific TCB from the queue
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev {
            Some(prev) => {
                unsafe { (*prev.as_ptr()).pend_next = tcb_ref.pend_next };
            }
            None => {
                self.head = tcb_ref.pend_next;
            }
        }

        match tcb_ref.pend_next {
            Some(next) => {
                unsafe { (*next.as_ptr()).pend_prev = tcb_ref.pend_prev };
            }
            None => {
                self.tail = tcb_ref.pend_prev;
            }
        }

        tcb_ref.pend_prev = None;
        tcb_ref.pend_next = None;
    }

    /// Re-sort one entry after its effective priority changed
    pub fn reorder(&mut self, tcb: NonNull<OsTcb>) {
        self.remove(tcb);
        self.insert_by_prio(tcb);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for WaitQueue {}
unsafe impl Sync for WaitQueue {}

// ============ Block/wake protocol ============

/// Park the running thread on a wait object.
///
/// Removes it from the ready set, records what it waits on, arms the
/// deadline when one is given, and enqueues it by priority. The caller
/// follows up with `os_sched()` and, after the eventual wakeup, reads
/// the outcome with [`pend_result`]. Caller holds the interrupt lock.
pub(crate) unsafe fn block_current(
    cur: NonNull<OsTcb>,
    wq: Option<&mut WaitQueue>,
    pend_on: OsPendOn,
    obj: *const (),
    deadline: OsTick,
) {
    unsafe {
        sched::os_rdy_list_remove(cur);

        let tcb = &mut *cur.as_ptr();
        tcb.pend_on = pend_on;
        tcb.pend_obj = obj;
        tcb.pend_status = OsPendStatus::Ok;
        tcb.state = OsThreadState::Blocked;

        if deadline != FOREVER {
            kernel::tick_list_insert(cur, deadline);
        }

        match wq {
            Some(q) => {
                tcb.pend_q = q as *mut WaitQueue;
                q.insert_by_prio(cur);
            }
            None => {
                tcb.pend_q = core::ptr::null_mut();
            }
        }
    }
}

/// Release a blocked thread with the given outcome.
///
/// Dequeues it from its wait queue and the deadline list, clears the
/// wait bookkeeping, and makes it ready again (or leaves it suspended
/// if it was suspended while blocked). Caller holds the interrupt lock.
pub(crate) unsafe fn unblock(tcb: NonNull<OsTcb>, status: OsPendStatus) {
    unsafe {
        let tcb_ref = &mut *tcb.as_ptr();

        #[cfg(feature = "mutex")]
        let abandoned_mutex = if tcb_ref.pend_on == OsPendOn::Mutex
            && !matches!(status, OsPendStatus::Ok | OsPendStatus::OwnerDead)
        {
            Some(tcb_ref.pend_obj)
        } else {
            None
        };

        if !tcb_ref.pend_q.is_null() {
            (*tcb_ref.pend_q).remove(tcb);
            tcb_ref.pend_q = core::ptr::null_mut();
        }

        if tcb_ref.in_tick_list {
            kernel::tick_list_remove(tcb);
        }

        tcb_ref.pend_on = OsPendOn::Nothing;
        tcb_ref.pend_obj = core::ptr::null();
        tcb_ref.pend_status = status;
        tcb_ref.deadline = 0;

        if tcb_ref.state == OsThreadState::BlockedSuspended {
            tcb_ref.state = OsThreadState::Suspended;
        } else {
            tcb_ref.state = OsThreadState::Ready;
            sched::os_rdy_list_insert(tcb);
        }

        // a waiter that gave up may have been the reason the owner was
        // boosted; let the mutex recompute the owner's priority
        #[cfg(feature = "mutex")]
        if let Some(obj) = abandoned_mutex {
            crate::sync::mutex::on_waiter_abandoned(obj);
        }
    }
}

/// Wake the most urgent waiter, if any
pub(crate) unsafe fn wake_one(wq: &mut WaitQueue, status: OsPendStatus) -> Option<NonNull<OsTcb>> {
    let head = wq.head()?;
    unsafe { unblock(head, status) };
    Some(head)
}

/// Wake every waiter; returns how many were released
pub(crate) unsafe fn wake_all(wq: &mut WaitQueue, status: OsPendStatus) -> usize {
    let mut n = 0;
    while unsafe { wake_one(wq, status) }.is_some() {
        n += 1;
    }
    n
}

/// Map the wake outcome recorded in `tcb` to a result.
///
/// Called by the blocked thread itself, once it runs again.
pub(crate) unsafe fn pend_result(tcb: NonNull<OsTcb>) -> OsResult<()> {
    match unsafe { tcb.as_ref().pend_status } {
        OsPendStatus::Ok => Ok(()),
        OsPendStatus::Timeout => Err(OsError::Timeout),
        OsPendStatus::Canceled => Err(OsError::Canceled),
        OsPendStatus::OwnerDead => Err(OsError::OwnerDead),
        OsPendStatus::Reset => Err(OsError::ResourceUnavailable),
    }
}

/// Common entry checks for a blocking wait from thread context.
///
/// Returns the current TCB, or the error that forbids blocking here:
/// ISR context, kernel not running, scheduler locked, or a pending
/// cancellation (which is consumed).
pub(crate) fn blocking_checks() -> OsResult<NonNull<OsTcb>> {
    if crate::critical::is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    if !kernel::KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::NotPermitted);
    }

    let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;

    let tcb = unsafe { &mut *cur.as_ptr() };
    if tcb.cancel_pending {
        tcb.cancel_pending = false;
        return Err(OsError::Canceled);
    }

    Ok(cur)
}

//! Mutex implementation
//!
//! Mutual exclusion with three locking disciplines (normal, error-check,
//! recursive), three priority protocols (none, inheritance, ceiling) and
//! optional robustness against owner death.
//!
//! Inheritance bookkeeping: every thread keeps a list of the mutexes it
//! owns, threaded through the mutexes themselves. On release the
//! owner's effective priority is recomputed from its stable priority
//! and the most urgent remaining demand across all still-held mutexes.
//! A boost propagates transitively along owner-of/blocked-on chains;
//! the walk stops as soon as an owner is already urgent enough, which
//! also terminates on cyclic chains, and is hard-bounded by
//! `CFG_MUTEX_CHAIN_MAX`.

use core::ptr::NonNull;

use crate::clock;
use crate::config::CFG_MUTEX_CHAIN_MAX;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::prio::prio_to_idx;
use crate::sched;
use crate::sync::wait::{self, WaitQueue};
use crate::thread::OsTcb;
use crate::types::{
    MutexProtocol, MutexType, OsNestingCtr, OsObjType, OsPendOn, OsPendStatus, OsPrio,
    OsThreadPrio, OsTick, FOREVER, THREAD_PRIO_MAX,
};

/// Robust-mutex recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RobustState {
    /// Normal operation
    Consistent,
    /// Owner terminated while holding; next acquirer is told
    OwnerDied,
    /// Acquired after owner death, protected state not yet recovered
    Inconsistent,
}

/// Mutex construction attributes
#[derive(Debug, Clone, Copy)]
pub struct MutexAttr {
    pub mtype: MutexType,
    pub protocol: MutexProtocol,
    pub robust: bool,
    /// Priority ceiling, used by the `Protect` protocol only
    pub ceiling: OsThreadPrio,
}

impl Default for MutexAttr {
    fn default() -> Self {
        MutexAttr {
            mtype: MutexType::Normal,
            protocol: MutexProtocol::None,
            robust: false,
            ceiling: THREAD_PRIO_MAX,
        }
    }
}

/// Mutex
pub struct OsMutex {
    /// Object type marker
    obj_type: OsObjType,
    /// Threads waiting to acquire
    waiters: WaitQueue,
    /// Owning thread
    owner: Option<NonNull<OsTcb>>,
    /// Recursion depth (1 when held non-recursively)
    nesting: OsNestingCtr,
    mtype: MutexType,
    protocol: MutexProtocol,
    robust: bool,
    /// Ceiling as an internal priority slot
    ceiling: OsPrio,
    robust_state: RobustState,
    /// Next mutex in the owner's held list
    grp_next: *mut OsMutex,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

impl OsMutex {
    /// Create a new mutex with default attributes
    pub const fn new() -> Self {
        OsMutex {
            obj_type: OsObjType::Mutex,
            waiters: WaitQueue::new(),
            owner: None,
            nesting: 0,
            mtype: MutexType::Normal,
            protocol: MutexProtocol::None,
            robust: false,
            ceiling: 1,
            robust_state: RobustState::Consistent,
            grp_next: core::ptr::null_mut(),
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the mutex
    pub fn create(&mut self, attr: MutexAttr, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let ceiling = prio_to_idx(attr.ceiling)?;

        critical_section(|_cs| {
            self.obj_type = OsObjType::Mutex;
            self.waiters.init();
            self.owner = None;
            self.nesting = 0;
            self.mtype = attr.mtype;
            self.protocol = attr.protocol;
            self.robust = attr.robust;
            self.ceiling = ceiling;
            self.robust_state = RobustState::Consistent;
            self.grp_next = core::ptr::null_mut();
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Acquire the mutex, blocking until it is free.
    ///
    /// An `Err(OwnerDead)` return still grants ownership: the previous
    /// owner died holding the mutex and the protected state should be
    /// repaired, then `mark_consistent` called.
    pub fn lock(&mut self) -> OsResult<()> {
        self.pend(FOREVER, true)
    }

    /// Acquire without blocking
    ///
    /// Fails with `ResourceUnavailable` if another thread holds it.
    pub fn try_lock(&mut self) -> OsResult<()> {
        self.pend(FOREVER, false)
    }

    /// Acquire with a deadline, in ticks from now
    pub fn timed_lock(&mut self, ticks: OsTick) -> OsResult<()> {
        self.pend(clock::deadline_after(ticks), true)
    }

    fn pend(&mut self, deadline: OsTick, blocking: bool) -> OsResult<()> {
        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::NotPermitted);
        }

        let blocked = critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;

            if self.owner == Some(cur) {
                return match self.mtype {
                    MutexType::Recursive => {
                        if self.nesting == OsNestingCtr::MAX {
                            return Err(OsError::InvalidArgument);
                        }
                        self.nesting += 1;
                        Ok(None)
                    }
                    // a relock of a non-recursive mutex can never
                    // succeed; detect instead of hanging
                    MutexType::Normal | MutexType::ErrorCheck => Err(OsError::Deadlock),
                };
            }

            if self.robust_state == RobustState::Inconsistent {
                return Err(OsError::NotRecoverable);
            }

            if self.protocol == MutexProtocol::Protect
                && unsafe { cur.as_ref().base_prio } < self.ceiling
            {
                // caller is more urgent than the ceiling allows
                return Err(OsError::InvalidArgument);
            }

            if self.owner.is_none() {
                unsafe { self.acquire(cur) };

                if self.robust_state == RobustState::OwnerDied {
                    self.robust_state = RobustState::Inconsistent;
                    return Err(OsError::OwnerDead);
                }
                return Ok(None);
            }

            if !blocking {
                return Err(OsError::ResourceUnavailable);
            }

            let cur = wait::blocking_checks()?;

            if self.protocol == MutexProtocol::Inherit {
                unsafe { boost_chain(self, cur.as_ref().prio) };
            }

            unsafe {
                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.waiters),
                    OsPendOn::Mutex,
                    token,
                    deadline,
                );
            }
            sched::os_sched();
            Ok(Some(cur))
        })?;

        match blocked {
            None => Ok(()),
            Some(cur) => critical_section(|_cs| unsafe { wait::pend_result(cur) }),
        }
    }

    /// Release the mutex.
    ///
    /// Only the owner may unlock; recursive mutexes release when the
    /// depth returns to zero. Ownership passes to the most urgent
    /// waiter, with inheritance and ceiling bookkeeping applied before
    /// the hand-off becomes visible.
    pub fn unlock(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::NotPermitted);
        }

        critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;

            if self.owner != Some(cur) {
                return Err(OsError::NotPermitted);
            }

            if self.nesting > 1 {
                self.nesting -= 1;
                return Ok(());
            }

            self.nesting = 0;

            unsafe {
                held_remove(cur, self);
                recompute_owner_prio(cur);
                self.pass_to_next_waiter();
            }

            sched::os_sched();
            Ok(())
        })
    }

    /// Declare the state protected by a robust mutex repaired.
    ///
    /// Callable by the owner after acquiring with `OwnerDead`.
    pub fn mark_consistent(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;

            if self.owner != Some(cur) {
                return Err(OsError::NotPermitted);
            }

            if !self.robust || self.robust_state != RobustState::Inconsistent {
                return Err(OsError::InvalidArgument);
            }

            self.robust_state = RobustState::Consistent;
            Ok(())
        })
    }

    /// Tear the mutex down.
    ///
    /// Destroying an owned mutex or one with waiters is a programming
    /// error and is fatal. Idempotent on an idle mutex.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::None {
                return Ok(());
            }

            if self.owner.is_some() || !self.waiters.is_empty() {
                crate::port::os_fatal("mutex destroyed while in use");
            }

            self.obj_type = OsObjType::None;
            Ok(())
        })
    }

    /// Check if the mutex is held
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Owning thread, if any
    #[inline]
    pub fn owner(&self) -> Option<NonNull<OsTcb>> {
        self.owner
    }

    /// Current recursion depth
    #[inline]
    pub(crate) fn depth(&self) -> OsNestingCtr {
        self.nesting
    }

    /// Take ownership: bookkeeping shared by the fast path and the
    /// release hand-off. Caller holds the interrupt lock.
    unsafe fn acquire(&mut self, thr: NonNull<OsTcb>) {
        self.owner = Some(thr);
        self.nesting = 1;
        unsafe {
            held_push(thr, self);

            if self.protocol == MutexProtocol::Protect {
                if self.ceiling < thr.as_ref().prio {
                    sched::set_effective_prio(thr, self.ceiling);
                }
            }
        }
    }

    /// Hand the mutex to the most urgent waiter, or leave it free.
    /// Caller holds the interrupt lock.
    unsafe fn pass_to_next_waiter(&mut self) {
        if self.robust && self.robust_state == RobustState::Inconsistent {
            // released without recovery: the protected state is lost
            // and the mutex stays unusable; fail everyone still queued
            self.owner = None;
            unsafe { wait::wake_all(&mut self.waiters, OsPendStatus::Reset) };
            return;
        }

        let Some(next) = self.waiters.head() else {
            self.owner = None;
            return;
        };

        let status = if self.robust && self.robust_state == RobustState::OwnerDied {
            self.robust_state = RobustState::Inconsistent;
            OsPendStatus::OwnerDead
        } else {
            OsPendStatus::Ok
        };

        unsafe {
            wait::unblock(next, status);
            self.acquire(next);

            // remaining waiters may already demand a boost from the
            // new owner
            if self.protocol == MutexProtocol::Inherit {
                if let Some(w) = self.waiters.head() {
                    let wp = w.as_ref().prio;
                    if wp < next.as_ref().prio {
                        sched::set_effective_prio(next, wp);
                    }
                }
            }
        }
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Inheritance bookkeeping ============

/// Link a mutex into its new owner's held list
unsafe fn held_push(owner: NonNull<OsTcb>, m: &mut OsMutex) {
    unsafe {
        let t = &mut *owner.as_ptr();
        m.grp_next = t.held_mutexes as *mut OsMutex;
        t.held_mutexes = m as *mut OsMutex as *mut ();
    }
}

/// Unlink a mutex from its owner's held list
unsafe fn held_remove(owner: NonNull<OsTcb>, m: &mut OsMutex) {
    unsafe {
        let t = &mut *owner.as_ptr();
        let mptr = m as *mut OsMutex;

        let head = t.held_mutexes as *mut OsMutex;
        if head == mptr {
            t.held_mutexes = (*mptr).grp_next as *mut ();
        } else {
            let mut cur = head;
            while !cur.is_null() {
                if (*cur).grp_next == mptr {
                    (*cur).grp_next = (*mptr).grp_next;
                    break;
                }
                cur = (*cur).grp_next;
            }
        }

        m.grp_next = core::ptr::null_mut();
    }
}

/// Most urgent priority demanded of `owner` by the mutexes it holds
pub(crate) unsafe fn held_boost(owner: NonNull<OsTcb>) -> Option<OsPrio> {
    let mut best: Option<OsPrio> = None;

    unsafe {
        let mut m = owner.as_ref().held_mutexes as *mut OsMutex;
        while !m.is_null() {
            let demand = match (*m).protocol {
                MutexProtocol::Inherit => (*m).waiters.head().map(|w| w.as_ref().prio),
                MutexProtocol::Protect => Some((*m).ceiling),
                MutexProtocol::None => None,
            };
            if let Some(d) = demand {
                best = Some(best.map_or(d, |b| b.min(d)));
            }
            m = (*m).grp_next;
        }
    }

    best
}

/// Recompute an owner's effective priority as the maximum urgency of
/// its stable priority and every demand across held mutexes.
pub(crate) unsafe fn recompute_owner_prio(owner: NonNull<OsTcb>) {
    unsafe {
        let base = owner.as_ref().base_prio;
        let eff = match held_boost(owner) {
            Some(boost) => base.min(boost),
            None => base,
        };
        sched::set_effective_prio(owner, eff);
    }
}

/// Propagate a waiter's urgency along the ownership chain.
///
/// Stops once an owner is already urgent enough (which also terminates
/// cyclic chains) or after `CFG_MUTEX_CHAIN_MAX` hops.
unsafe fn boost_chain(first: *mut OsMutex, waiter_prio: OsPrio) {
    unsafe {
        let mut m = first;
        for _ in 0..CFG_MUTEX_CHAIN_MAX {
            let Some(owner) = (*m).owner else { return };

            if owner.as_ref().prio <= waiter_prio {
                return;
            }
            sched::set_effective_prio(owner, waiter_prio);

            let o = owner.as_ref();
            if o.is_blocked() && o.pend_on == OsPendOn::Mutex {
                let next = o.pend_obj as *mut OsMutex;
                if !next.is_null() && (*next).protocol == MutexProtocol::Inherit {
                    m = next;
                    continue;
                }
            }
            return;
        }
    }
}

/// A blocked waiter changed priority: refresh the owner's boost and
/// re-propagate. Called by `os_thread_set_prio`.
pub(crate) unsafe fn on_waiter_prio_change(waiter: NonNull<OsTcb>) {
    unsafe {
        let m = waiter.as_ref().pend_obj as *mut OsMutex;
        if m.is_null() || (*m).protocol != MutexProtocol::Inherit {
            return;
        }

        if let Some(owner) = (*m).owner {
            recompute_owner_prio(owner);
            boost_chain(m, waiter.as_ref().prio);
        }
    }
}

/// A waiter gave up (timeout or cancellation): the owner's boost may
/// have lapsed. Called from the wake path after the waiter left the
/// queue.
pub(crate) unsafe fn on_waiter_abandoned(obj: *const ()) {
    unsafe {
        let m = obj as *mut OsMutex;
        if m.is_null() || (*m).obj_type != OsObjType::Mutex {
            return;
        }

        if (*m).protocol == MutexProtocol::Inherit {
            if let Some(owner) = (*m).owner {
                recompute_owner_prio(owner);
            }
        }
    }
}

/// Release everything a terminating thread still holds.
///
/// Robust mutexes are marked so the next acquirer learns of the owner's
/// death; non-robust ones pass to the next waiter as a plain release.
pub(crate) unsafe fn release_all_on_exit(owner: NonNull<OsTcb>) {
    unsafe {
        let t = &mut *owner.as_ptr();
        let mut m = t.held_mutexes as *mut OsMutex;
        t.held_mutexes = core::ptr::null_mut();

        while !m.is_null() {
            let next = (*m).grp_next;
            (*m).grp_next = core::ptr::null_mut();
            (*m).nesting = 0;

            if (*m).robust {
                (*m).robust_state = RobustState::OwnerDied;
            }

            (*m).pass_to_next_waiter();

            m = next;
        }
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable mutex handle
pub struct Mutex {
    inner: UnsafeCell<OsMutex>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(OsMutex::new()),
        }
    }

    pub fn create(&self, attr: MutexAttr, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(attr, name) }
    }

    pub fn lock(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).lock() }
    }

    pub fn try_lock(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).try_lock() }
    }

    pub fn timed_lock(&self, ticks: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).timed_lock(ticks) }
    }

    pub fn unlock(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).unlock() }
    }

    pub fn mark_consistent(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).mark_consistent() }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        unsafe { (*self.inner.get()).is_owned() }
    }

    pub(crate) fn raw(&self) -> *mut OsMutex {
        self.inner.get()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

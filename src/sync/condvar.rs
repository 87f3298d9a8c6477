//! Condition variable implementation
//!
//! A condition variable pairs with a mutex: `wait` atomically parks the
//! caller and releases the mutex, and the mutex is reacquired before
//! `wait` returns, timeout included. The kernel introduces no spurious
//! wakeups, but callers should still loop on their predicate.

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::mutex::{Mutex, OsMutex};
use crate::sync::wait::{self, WaitQueue};
use crate::types::{OsObjType, OsPendOn, OsPendStatus, OsTick, FOREVER};

/// Condition variable
pub struct OsCondVar {
    /// Object type marker
    obj_type: OsObjType,
    /// Threads waiting to be notified
    waiters: WaitQueue,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsCondVar {
    /// Create a new condition variable
    pub const fn new() -> Self {
        OsCondVar {
            obj_type: OsObjType::Cond,
            waiters: WaitQueue::new(),
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the condition variable
    pub fn create(&mut self, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Cond;
            self.waiters.init();
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Wait to be notified (unbounded).
    ///
    /// The caller must hold `mutex`; it is released and the thread
    /// parked in one atomic step, and reacquired before returning.
    pub fn wait(&mut self, mutex: &mut OsMutex) -> OsResult<()> {
        self.pend(mutex, FOREVER)
    }

    /// Wait with a deadline, in ticks from now.
    ///
    /// On timeout the mutex is still reacquired before `Err(Timeout)`
    /// is returned.
    pub fn timed_wait(&mut self, mutex: &mut OsMutex, ticks: OsTick) -> OsResult<()> {
        self.pend(mutex, clock::deadline_after(ticks))
    }

    fn pend(&mut self, mutex: &mut OsMutex, deadline: OsTick) -> OsResult<()> {
        if self.obj_type != OsObjType::Cond {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            let cur = wait::blocking_checks()?;

            if mutex.owner() != Some(cur) {
                return Err(OsError::NotPermitted);
            }

            // a recursively-held mutex would stay locked across the
            // wait and deadlock the notifier
            if mutex.depth() > 1 {
                return Err(OsError::NotPermitted);
            }

            unsafe {
                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.waiters),
                    OsPendOn::Cond,
                    token,
                    deadline,
                );
            }

            // park first, then release: a notify between unlock and
            // park can therefore never be lost
            mutex.unlock()?;
            Ok(())
        })?;

        let woke = critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
            unsafe { wait::pend_result(cur) }
        });

        // reacquire regardless of how the wait ended
        mutex.lock()?;
        woke
    }

    /// Wake the most urgent waiter
    pub fn notify_one(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Cond {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if unsafe { wait::wake_one(&mut self.waiters, OsPendStatus::Ok) }.is_some() {
                sched::os_sched();
            }
            Ok(())
        })
    }

    /// Wake every waiter
    pub fn notify_all(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Cond {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if unsafe { wait::wake_all(&mut self.waiters, OsPendStatus::Ok) } > 0 {
                sched::os_sched();
            }
            Ok(())
        })
    }

    /// Tear the condition variable down.
    ///
    /// Destroying one with waiters is a programming error and is fatal.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::None {
                return Ok(());
            }

            if !self.waiters.is_empty() {
                crate::port::os_fatal("condvar destroyed with waiters");
            }

            self.obj_type = OsObjType::None;
            Ok(())
        })
    }
}

impl Default for OsCondVar {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable condition variable handle
pub struct CondVar {
    inner: UnsafeCell<OsCondVar>,
}

unsafe impl Sync for CondVar {}
unsafe impl Send for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            inner: UnsafeCell::new(OsCondVar::new()),
        }
    }

    pub fn create(&self, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(name) }
    }

    pub fn wait(&self, mutex: &Mutex) -> OsResult<()> {
        unsafe { (*self.inner.get()).wait(&mut *mutex.raw()) }
    }

    pub fn timed_wait(&self, mutex: &Mutex, ticks: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).timed_wait(&mut *mutex.raw(), ticks) }
    }

    pub fn notify_one(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).notify_one() }
    }

    pub fn notify_all(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).notify_all() }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

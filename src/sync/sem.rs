//! Semaphore implementation
//!
//! Counting semaphores for thread synchronization and resource
//! counting. A post with waiters present hands the token straight to
//! the most urgent waiter; the count is untouched.

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::sched;
use crate::sync::wait::{self, WaitQueue};
use crate::types::{OsObjType, OsPendOn, OsPendStatus, OsSemCtr, OsTick, FOREVER};

/// Counting semaphore
pub struct OsSem {
    /// Object type marker
    obj_type: OsObjType,
    /// Threads waiting on this semaphore
    waiters: WaitQueue,
    /// Current count
    count: OsSemCtr,
    /// Count ceiling
    max: OsSemCtr,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsSem {
    /// Create a new semaphore
    pub const fn new(count: OsSemCtr, max: OsSemCtr) -> Self {
        OsSem {
            obj_type: OsObjType::Sem,
            waiters: WaitQueue::new(),
            count,
            max,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Create a new binary semaphore
    pub const fn binary(count: OsSemCtr) -> Self {
        Self::new(count, 1)
    }

    /// Initialize the semaphore
    pub fn create(&mut self, count: OsSemCtr, max: OsSemCtr, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        if max == 0 || count > max {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Sem;
            self.waiters.init();
            self.count = count;
            self.max = max;
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Acquire the semaphore, blocking until a token is available
    pub fn wait(&mut self) -> OsResult<()> {
        self.pend(FOREVER, true)
    }

    /// Acquire without blocking
    ///
    /// Fails with `ResourceUnavailable` if no token is available.
    pub fn try_wait(&mut self) -> OsResult<()> {
        self.pend(FOREVER, false)
    }

    /// Acquire with a deadline, in ticks from now
    pub fn timed_wait(&mut self, ticks: OsTick) -> OsResult<()> {
        self.pend(clock::deadline_after(ticks), true)
    }

    fn pend(&mut self, deadline: OsTick, blocking: bool) -> OsResult<()> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::InvalidArgument);
        }

        let blocked = critical_section(|_cs| {
            if self.count > 0 {
                self.count -= 1;
                return Ok(None);
            }

            if !blocking {
                return Err(OsError::ResourceUnavailable);
            }

            let cur = wait::blocking_checks()?;

            unsafe {
                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.waiters),
                    OsPendOn::Sem,
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

    /// Release the semaphore. ISR-safe.
    ///
    /// With waiters present the token transfers directly; otherwise the
    /// count increments, failing with `ResourceUnavailable` at the cap.
    pub fn post(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            if unsafe { wait::wake_one(&mut self.waiters, OsPendStatus::Ok) }.is_some() {
                if !is_isr_context() {
                    sched::os_sched();
                }
                return Ok(());
            }

            if self.count == self.max {
                return Err(OsError::ResourceUnavailable);
            }
            self.count += 1;
            Ok(())
        })
    }

    /// Clear the count and fail every waiter with `ResourceUnavailable`.
    pub fn reset(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            self.count = 0;
            if unsafe { wait::wake_all(&mut self.waiters, OsPendStatus::Reset) } > 0 {
                sched::os_sched();
            }
            Ok(())
        })
    }

    /// Tear the semaphore down.
    ///
    /// Destroying a semaphore with waiters is a programming error and
    /// is fatal. Idempotent on an idle semaphore.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::None {
                return Ok(());
            }

            if !self.waiters.is_empty() {
                crate::port::os_fatal("semaphore destroyed with waiters");
            }

            self.obj_type = OsObjType::None;
            self.count = 0;
            Ok(())
        })
    }

    /// Current semaphore count
    #[inline(always)]
    pub fn count(&self) -> OsSemCtr {
        self.count
    }

    /// Number of waiting threads
    pub fn waiter_count(&self) -> usize {
        critical_section(|_cs| self.waiters.len())
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0, OsSemCtr::MAX)
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable semaphore handle
pub struct Semaphore {
    inner: UnsafeCell<OsSem>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(count: OsSemCtr, max: OsSemCtr) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::new(count, max)),
        }
    }

    pub const fn binary(count: OsSemCtr) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::binary(count)),
        }
    }

    pub fn create(&self, count: OsSemCtr, max: OsSemCtr, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(count, max, name) }
    }

    pub fn wait(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).wait() }
    }

    pub fn try_wait(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).try_wait() }
    }

    pub fn timed_wait(&self, ticks: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).timed_wait(ticks) }
    }

    pub fn post(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).post() }
    }

    pub fn reset(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).reset() }
    }

    #[inline]
    pub fn count(&self) -> OsSemCtr {
        unsafe { (*self.inner.get()).count() }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0, OsSemCtr::MAX)
    }
}

//! Event flags implementation
//!
//! A 32-bit mask per object. Setting bits wakes every waiter whose
//! predicate (any/all of its mask) is now satisfied, in priority order;
//! a waiter that asked to consume clears its matched bits as it wakes,
//! which later waiters in the same sweep observe.

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::wait::{self, WaitQueue};
use crate::types::{FlagMode, OsFlags, OsObjType, OsPendOn, OsPendStatus, OsTick, FOREVER};

/// Event flag group
pub struct OsFlagGrp {
    /// Object type marker
    obj_type: OsObjType,
    /// Threads waiting for bits
    waiters: WaitQueue,
    /// Current flag bits
    flags: OsFlags,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsFlagGrp {
    /// Create a new flag group
    pub const fn new(initial: OsFlags) -> Self {
        OsFlagGrp {
            obj_type: OsObjType::Flags,
            waiters: WaitQueue::new(),
            flags: initial,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the flag group
    pub fn create(&mut self, initial: OsFlags, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Flags;
            self.waiters.init();
            self.flags = initial;
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Wait for bits (unbounded). Returns the satisfying bits.
    pub fn wait(&mut self, mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
        self.pend(mask, mode, consume, FOREVER, true)
    }

    /// Non-blocking check for bits
    pub fn try_wait(&mut self, mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
        self.pend(mask, mode, consume, FOREVER, false)
    }

    /// Wait for bits with a deadline, in ticks from now
    pub fn timed_wait(
        &mut self,
        mask: OsFlags,
        mode: FlagMode,
        consume: bool,
        ticks: OsTick,
    ) -> OsResult<OsFlags> {
        self.pend(mask, mode, consume, clock::deadline_after(ticks), true)
    }

    fn pend(
        &mut self,
        mask: OsFlags,
        mode: FlagMode,
        consume: bool,
        deadline: OsTick,
        blocking: bool,
    ) -> OsResult<OsFlags> {
        if self.obj_type != OsObjType::Flags {
            return Err(OsError::InvalidArgument);
        }

        if mask == 0 {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let immediate = critical_section(|_cs| {
            if let Some(matched) = mode.matched(self.flags, mask) {
                if consume {
                    self.flags &= !matched;
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
                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.waiters),
                    OsPendOn::Flags,
                    token,
                    deadline,
                );
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

    /// OR bits into the group and wake satisfied waiters. ISR-safe.
    pub fn set(&mut self, bits: OsFlags) -> OsResult<()> {
        if self.obj_type != OsObjType::Flags {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.flags |= bits;

            // priority-ordered sweep; a consuming waiter changes what
            // the rest of the sweep sees
            let mut woke = false;
            let mut cursor = self.waiters.head();
            while let Some(tcb) = cursor {
                let next = unsafe { tcb.as_ref().pend_next };

                let t = unsafe { &mut *tcb.as_ptr() };
                if let Some(matched) = t.flags_mode.matched(self.flags, t.flags_pend) {
                    t.flags_rdy = matched;
                    if t.flags_consume {
                        self.flags &= !matched;
                    }
                    unsafe { wait::unblock(tcb, OsPendStatus::Ok) };
                    woke = true;
                }

                cursor = next;
            }

            if woke && !is_isr_context() {
                sched::os_sched();
            }

            Ok(())
        })
    }

    /// Clear bits without waking anyone
    pub fn clear(&mut self, bits: OsFlags) -> OsResult<()> {
        if self.obj_type != OsObjType::Flags {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.flags &= !bits;
            Ok(())
        })
    }

    /// Current flag bits
    #[inline]
    pub fn get(&self) -> OsFlags {
        self.flags
    }

    /// Tear the flag group down.
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
                crate::port::os_fatal("flag group destroyed with waiters");
            }

            self.obj_type = OsObjType::None;
            self.flags = 0;
            Ok(())
        })
    }
}

impl Default for OsFlagGrp {
    fn default() -> Self {
        Self::new(0)
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable event flag handle
pub struct EventFlags {
    inner: UnsafeCell<OsFlagGrp>,
}

unsafe impl Sync for EventFlags {}
unsafe impl Send for EventFlags {}

impl EventFlags {
    pub const fn new(initial: OsFlags) -> Self {
        EventFlags {
            inner: UnsafeCell::new(OsFlagGrp::new(initial)),
        }
    }

    pub fn create(&self, initial: OsFlags, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(initial, name) }
    }

    pub fn wait(&self, mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
        unsafe { (*self.inner.get()).wait(mask, mode, consume) }
    }

    pub fn try_wait(&self, mask: OsFlags, mode: FlagMode, consume: bool) -> OsResult<OsFlags> {
        unsafe { (*self.inner.get()).try_wait(mask, mode, consume) }
    }

    pub fn timed_wait(
        &self,
        mask: OsFlags,
        mode: FlagMode,
        consume: bool,
        ticks: OsTick,
    ) -> OsResult<OsFlags> {
        unsafe { (*self.inner.get()).timed_wait(mask, mode, consume, ticks) }
    }

    pub fn set(&self, bits: OsFlags) -> OsResult<()> {
        unsafe { (*self.inner.get()).set(bits) }
    }

    pub fn clear(&self, bits: OsFlags) -> OsResult<()> {
        unsafe { (*self.inner.get()).clear(bits) }
    }

    #[inline]
    pub fn get(&self) -> OsFlags {
        unsafe { (*self.inner.get()).get() }
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new(0)
    }
}

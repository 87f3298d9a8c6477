//! Software timers
//!
//! One-shot and periodic timers dispatched from a dedicated
//! timer-service thread running at the most urgent priority slot. The
//! tick ISR only raises a signal; callbacks run in thread context with
//! no kernel lock held, so a callback may itself use kernel services.

use core::ptr::NonNull;

use crate::clock;
use crate::config::{CFG_PRIO_TIMER, CFG_TIMER_STK_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::thread::{self, OsTcb};
use crate::types::{FlagMode, OsObjType, OsStkElement, OsTick, SIG_TIMER_TICK};

/// Timer callback type
pub type OsTmrFn = fn(*mut ());

/// Timer kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsTmrKind {
    /// Fires once, then stops
    OneShot = 0,
    /// Fires every period until stopped
    Periodic = 1,
}

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsTmrState {
    Stopped = 0,
    Armed = 1,
    /// Callback in progress on the timer-service thread
    Firing = 2,
}

/// Software timer control block
pub struct OsTmr {
    obj_type: OsObjType,
    /// Links in the armed-timer list, ordered by `next_fire`
    next: Option<NonNull<OsTmr>>,
    prev: Option<NonNull<OsTmr>>,
    kind: OsTmrKind,
    state: OsTmrState,
    /// Period for periodic timers, delay for one-shot timers
    period: OsTick,
    /// Absolute tick of the next expiry
    next_fire: OsTick,
    callback: Option<OsTmrFn>,
    arg: *mut (),
    #[cfg(feature = "defmt")]
    name: &'static str,
}

unsafe impl Send for OsTmr {}
unsafe impl Sync for OsTmr {}

impl OsTmr {
    /// Create a new, inert timer
    pub const fn new() -> Self {
        OsTmr {
            obj_type: OsObjType::Timer,
            next: None,
            prev: None,
            kind: OsTmrKind::OneShot,
            state: OsTmrState::Stopped,
            period: 0,
            next_fire: 0,
            callback: None,
            arg: core::ptr::null_mut(),
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the timer
    ///
    /// `period` is the delay for one-shot timers and the repeat period
    /// for periodic ones; it must be non-zero.
    pub fn create(
        &mut self,
        kind: OsTmrKind,
        period: OsTick,
        callback: OsTmrFn,
        arg: *mut (),
        _name: &'static str,
    ) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Timer;
            self.next = None;
            self.prev = None;
            self.kind = kind;
            self.state = OsTmrState::Stopped;
            self.period = period;
            self.next_fire = 0;
            self.callback = Some(callback);
            self.arg = arg;
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Arm the timer. ISR-safe.
    ///
    /// Restarting an armed timer re-bases its expiry on the current
    /// tick.
    pub fn start(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Timer {
            return Err(OsError::InvalidArgument);
        }

        if self.callback.is_none() {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            let this = unsafe { NonNull::new_unchecked(self as *mut OsTmr) };
            let list = unsafe { TMR_LIST.get_unchecked() };

            if self.state == OsTmrState::Armed {
                list.remove(this);
            }

            self.next_fire = clock::deadline_after(self.period);
            self.state = OsTmrState::Armed;
            list.insert(this);

            Ok(())
        })
    }

    /// Disarm the timer. ISR-safe.
    ///
    /// A callback already in progress completes, but a periodic timer
    /// stopped mid-callback is not re-armed.
    pub fn stop(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Timer {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            if self.state == OsTmrState::Armed {
                let this = unsafe { NonNull::new_unchecked(self as *mut OsTmr) };
                unsafe { TMR_LIST.get_unchecked() }.remove(this);
            }
            self.state = OsTmrState::Stopped;
            Ok(())
        })
    }

    /// Tear the timer down; idempotent on a stopped timer.
    pub fn destroy(&mut self) -> OsResult<()> {
        self.stop()?;
        critical_section(|_cs| {
            self.obj_type = OsObjType::None;
            self.callback = None;
            Ok(())
        })
    }

    /// Current timer state
    #[inline]
    pub fn state(&self) -> OsTmrState {
        self.state
    }
}

impl Default for OsTmr {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Armed-timer list ============

/// Intrusive list of armed timers, ascending by `next_fire`
struct TmrList {
    head: Option<NonNull<OsTmr>>,
}

impl TmrList {
    const fn new() -> Self {
        TmrList { head: None }
    }

    fn insert(&mut self, tmr: NonNull<OsTmr>) {
        let fire = unsafe { tmr.as_ref().next_fire };

        let mut prev: Option<NonNull<OsTmr>> = None;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if unsafe { cur.as_ref().next_fire } > fire {
                break;
            }
            prev = cursor;
            cursor = unsafe { cur.as_ref().next };
        }

        let tmr_ref = unsafe { &mut *tmr.as_ptr() };
        tmr_ref.prev = prev;
        tmr_ref.next = cursor;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = Some(tmr) },
            None => self.head = Some(tmr),
        }
        if let Some(c) = cursor {
            unsafe { (*c.as_ptr()).prev = Some(tmr) };
        }
    }

    fn remove(&mut self, tmr: NonNull<OsTmr>) {
        let tmr_ref = unsafe { &mut *tmr.as_ptr() };

        match tmr_ref.prev {
            Some(p) => unsafe { (*p.as_ptr()).next = tmr_ref.next },
            None => self.head = tmr_ref.next,
        }
        if let Some(n) = tmr_ref.next {
            unsafe { (*n.as_ptr()).prev = tmr_ref.prev };
        }

        tmr_ref.next = None;
        tmr_ref.prev = None;
    }

    /// Pop the earliest timer if it is due at `now`
    fn pop_due(&mut self, now: OsTick) -> Option<NonNull<OsTmr>> {
        let head = self.head?;
        if unsafe { head.as_ref().next_fire } > now {
            return None;
        }
        self.remove(head);
        Some(head)
    }
}

/// Global armed-timer list
static TMR_LIST: CsCell<TmrList> = CsCell::new(TmrList::new());

// ============ Timer-service thread ============

/// Timer-service thread TCB
static mut TMR_TCB: OsTcb = OsTcb::new();

/// Timer-service thread stack
static mut TMR_STK: [OsStkElement; CFG_TIMER_STK_SIZE] = [0; CFG_TIMER_STK_SIZE];

/// Create the timer-service thread. Called from `os_init`.
#[allow(static_mut_refs)]
pub(crate) unsafe fn os_tmr_module_init() -> OsResult<()> {
    unsafe {
        TMR_LIST.get_unchecked().head = None;

        thread::os_thread_create_raw(
            &raw mut TMR_TCB,
            "tmr_svc",
            os_tmr_thread,
            core::ptr::null_mut(),
            CFG_PRIO_TIMER,
            TMR_STK.as_mut_ptr(),
            TMR_STK.len(),
            0,
        )
    }
}

/// Kick the timer-service thread when the earliest timer is due.
///
/// Called from the tick handler inside the interrupt lock.
pub(crate) fn os_tmr_tick_notify(now: OsTick) {
    let due = unsafe {
        TMR_LIST
            .get_unchecked()
            .head
            .map_or(false, |h| h.as_ref().next_fire <= now)
    };

    if due {
        let tcb = unsafe { NonNull::new_unchecked(&raw mut TMR_TCB) };
        let _ = thread::os_thread_sig_set(tcb, SIG_TIMER_TICK);
    }
}

/// Next expiry strictly after `now`, aligned to the original grid.
///
/// Missed periods are discarded, not queued, so a long stall produces a
/// single catch-up invocation and firing resumes on the old alignment.
fn next_aligned_fire(prev_fire: OsTick, period: OsTick, now: OsTick) -> OsTick {
    let mut next = prev_fire.saturating_add(period);
    while next <= now {
        next = next.saturating_add(period);
    }
    next
}

/// Timer-service thread body
fn os_tmr_thread(_: *mut ()) -> ! {
    loop {
        let _ = thread::os_thread_sig_wait(SIG_TIMER_TICK, FlagMode::Any, true);

        loop {
            let now = clock::os_clock_now();

            let due = critical_section(|_cs| {
                let list = unsafe { TMR_LIST.get_unchecked() };
                list.pop_due(now).map(|tmr| {
                    let t = unsafe { &mut *tmr.as_ptr() };
                    t.state = OsTmrState::Firing;
                    (tmr, t.callback, t.arg)
                })
            });

            let Some((tmr, callback, arg)) = due else {
                break;
            };

            // no kernel lock across the user callback
            if let Some(cb) = callback {
                cb(arg);
            }

            critical_section(|_cs| {
                let t = unsafe { &mut *tmr.as_ptr() };

                // stop() during the callback wins
                if t.state != OsTmrState::Firing {
                    return;
                }

                match t.kind {
                    OsTmrKind::OneShot => {
                        t.state = OsTmrState::Stopped;
                    }
                    OsTmrKind::Periodic => {
                        t.next_fire =
                            next_aligned_fire(t.next_fire, t.period, clock::os_clock_now());
                        t.state = OsTmrState::Armed;
                        unsafe { TMR_LIST.get_unchecked() }.insert(tmr);
                    }
                }
            });
        }
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable timer handle
pub struct Timer {
    inner: UnsafeCell<OsTmr>,
}

unsafe impl Sync for Timer {}
unsafe impl Send for Timer {}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            inner: UnsafeCell::new(OsTmr::new()),
        }
    }

    pub fn create(
        &self,
        kind: OsTmrKind,
        period: OsTick,
        callback: OsTmrFn,
        arg: *mut (),
        name: &'static str,
    ) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(kind, period, callback, arg, name) }
    }

    pub fn start(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).start() }
    }

    pub fn stop(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).stop() }
    }

    pub fn state(&self) -> OsTmrState {
        unsafe { (*self.inner.get()).state() }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realign_discards_missed_periods() {
        // armed at 0 with period 10, stalled until tick 55: one firing
        // has already been delivered, the next lands on the grid at 60
        assert_eq!(next_aligned_fire(10, 10, 55), 60);
        assert_eq!(next_aligned_fire(60, 10, 61), 70);
    }

    #[test]
    fn test_realign_no_stall() {
        assert_eq!(next_aligned_fire(10, 10, 12), 20);
        assert_eq!(next_aligned_fire(10, 10, 10), 20);
    }
}

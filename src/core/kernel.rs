//! Global kernel state and initialization
//!
//! This module manages the process-wide singleton: kernel flags, the
//! ready set, the deadline list, and the context-switch state shared
//! with the port layer.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{
    CFG_IDLE_STK_SIZE, CFG_PRIO_IDLE, CFG_PRIO_LEVELS, CFG_TICK_RATE_HZ,
};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::ReadyList;
use crate::thread::OsTcb;
use crate::types::{OsNestingCtr, OsPrio, OsStkElement, OsThreadState, OsTick};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    sched_lock_nesting: AtomicU8,
    tick_lo: AtomicU32,
    tick_hi: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            sched_lock_nesting: AtomicU8::new(0),
            tick_lo: AtomicU32::new(0),
            tick_hi: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
        self.tick_lo.store(0, Ordering::SeqCst);
        self.tick_hi.store(0, Ordering::SeqCst);
    }

    /// Check if the kernel is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if the kernel is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Current 64-bit tick count.
    ///
    /// The counter is kept as a hi/lo pair; the hi/lo/hi read loop
    /// defends against a carry racing the read.
    pub fn tick_now(&self) -> OsTick {
        loop {
            let hi1 = self.tick_hi.load(Ordering::Acquire);
            let lo = self.tick_lo.load(Ordering::Acquire);
            let hi2 = self.tick_hi.load(Ordering::Acquire);
            if hi1 == hi2 {
                return ((hi1 as OsTick) << 32) | lo as OsTick;
            }
        }
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Get scheduler lock nesting level
    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    /// Increment and return the tick count (tick ISR only, inside the
    /// interrupt lock)
    pub(crate) fn tick_increment(&self) -> OsTick {
        let lo = self.tick_lo.load(Ordering::Relaxed).wrapping_add(1);
        self.tick_lo.store(lo, Ordering::Release);
        if lo == 0 {
            let hi = self.tick_hi.load(Ordering::Relaxed) + 1;
            self.tick_hi.store(hi, Ordering::Release);
        }
        self.tick_now()
    }

    /// Enter ISR
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.load(Ordering::Relaxed);
            if nesting < OsNestingCtr::MAX {
                self.int_nesting.store(nesting + 1, Ordering::Relaxed);
            }
        }
    }

    /// Set initialized flag
    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    /// Set running flag
    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Decrement int nesting
    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }

    /// Lock the scheduler
    pub(crate) fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == OsNestingCtr::MAX {
            return Err(OsError::InvalidArgument);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Unlock the scheduler
    pub(crate) fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::NotPermitted);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }
}

// ============ Global Instances ============

/// Global kernel state instance
pub static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state
pub struct SchedState {
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_LEVELS],
    /// Deadline-ordered list of threads in timed waits
    pub(crate) tick_head: Option<NonNull<OsTcb>>,
    pub(crate) tick_tail: Option<NonNull<OsTcb>>,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_LEVELS],
            tick_head: None,
            tick_tail: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.prio_tbl = PrioTable::new();
        self.rdy_list = [ReadyList::new(); CFG_PRIO_LEVELS];
        self.tick_head = None;
        self.tick_tail = None;
    }

    /// Earliest pending deadline, if any
    #[inline]
    pub(crate) fn tick_head(&self) -> Option<NonNull<OsTcb>> {
        self.tick_head
    }

    /// Link a thread into the deadline list, ascending by expiry tick.
    ///
    /// Equal deadlines keep insertion order, so expirations dispatch in
    /// the order the waits were issued.
    pub(crate) unsafe fn tick_list_insert(&mut self, tcb: NonNull<OsTcb>, deadline: OsTick) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        tcb_ref.deadline = deadline;

        let mut at: Option<NonNull<OsTcb>> = None;
        let mut cursor = self.tick_head;
        while let Some(cur) = cursor {
            let cur_ref = unsafe { cur.as_ref() };
            if cur_ref.deadline > deadline {
                at = Some(cur);
                break;
            }
            cursor = cur_ref.tick_next;
        }

        match at {
            // insert before `cur`
            Some(cur) => {
                let cur_ref = unsafe { &mut *cur.as_ptr() };
                tcb_ref.tick_prev = cur_ref.tick_prev;
                tcb_ref.tick_next = Some(cur);
                match cur_ref.tick_prev {
                    Some(prev) => unsafe { (*prev.as_ptr()).tick_next = Some(tcb) },
                    None => self.tick_head = Some(tcb),
                }
                cur_ref.tick_prev = Some(tcb);
            }
            // append at the tail
            None => {
                tcb_ref.tick_next = None;
                tcb_ref.tick_prev = self.tick_tail;
                match self.tick_tail {
                    Some(tail) => unsafe { (*tail.as_ptr()).tick_next = Some(tcb) },
                    None => self.tick_head = Some(tcb),
                }
                self.tick_tail = Some(tcb);
            }
        }

        tcb_ref.in_tick_list = true;
    }

    /// Unlink a thread from the deadline list
    pub(crate) unsafe fn tick_list_remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        if !tcb_ref.in_tick_list {
            return;
        }

        match tcb_ref.tick_prev {
            Some(prev) => unsafe { (*prev.as_ptr()).tick_next = tcb_ref.tick_next },
            None => self.tick_head = tcb_ref.tick_next,
        }
        match tcb_ref.tick_next {
            Some(next) => unsafe { (*next.as_ptr()).tick_prev = tcb_ref.tick_prev },
            None => self.tick_tail = tcb_ref.tick_prev,
        }

        tcb_ref.tick_next = None;
        tcb_ref.tick_prev = None;
        tcb_ref.in_tick_list = false;
    }
}

/// Global scheduler state instance
pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// Idle thread TCB
static mut IDLE_TCB: OsTcb = OsTcb::new();

/// Idle thread stack
static mut IDLE_STK: [OsStkElement; CFG_IDLE_STK_SIZE] = [0; CFG_IDLE_STK_SIZE];

// ============ CPU/Context Switch State ============

/// CPU context switch state, shared with the port layer
#[repr(C)]
pub struct CpuState {
    /// Current running thread's TCB pointer
    pub tcb_cur: *mut OsTcb,
    /// Highest priority ready thread's TCB pointer
    pub tcb_high_rdy: *mut OsTcb,
    /// Current running thread's priority slot
    pub prio_cur: OsPrio,
    /// Highest ready priority slot
    pub prio_high_rdy: OsPrio,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
        }
    }

    pub fn reset(&mut self) {
        self.tcb_cur = core::ptr::null_mut();
        self.tcb_high_rdy = core::ptr::null_mut();
        self.prio_cur = 0;
        self.prio_high_rdy = 0;
    }
}

/// Global CPU state instance
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

// ============ Initialization ============

/// Internal idle thread function
fn os_idle_thread(_: *mut ()) -> ! {
    loop {
        crate::port::os_cpu_idle();
    }
}

/// Reset global kernel state
unsafe fn os_reset_globals() {
    KERNEL.reset();

    unsafe {
        CPU_STATE.reset();
        SCHED.get_unchecked().reset();
    }
}

// ============ Public API ============

/// Initialize the kernel
///
/// This must be called before any other kernel function. It prepares
/// the ready set and deadline list and creates the idle and
/// timer-service threads. Must not be called from ISR context.
///
/// # Returns
/// * `Ok(())` - Initialization successful
/// * `Err(OsError::IsrForbidden)` - Called from ISR context
/// * `Err(OsError::NotPermitted)` - Kernel is already running
#[allow(static_mut_refs)]
pub fn os_init() -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    if KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    unsafe {
        os_reset_globals();
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);

        sched.prio_tbl.init();
        for list in sched.rdy_list.iter_mut() {
            list.init();
        }

        unsafe {
            crate::thread::os_thread_create_raw(
                &raw mut IDLE_TCB,
                "idle",
                os_idle_thread,
                core::ptr::null_mut(),
                CFG_PRIO_IDLE,
                IDLE_STK.as_mut_ptr(),
                IDLE_STK.len(),
                0,
            )?;

            crate::time::timer::os_tmr_module_init()?;
        }

        KERNEL.set_initialized(true);
        Ok(())
    })
}

/// Start multitasking
///
/// Transfers control to the highest-priority ready thread. On success
/// this function does not return; before calling it, at least one
/// application thread should exist.
///
/// # Returns
/// * `Err(OsError::NotPermitted)` - Not initialized, or already running
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() || KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);

        let high_prio = sched.prio_tbl.get_highest();
        let head = sched.rdy_list[high_prio as usize]
            .head()
            .ok_or(OsError::NotPermitted)?;

        unsafe {
            CPU_STATE.prio_high_rdy = high_prio;
            CPU_STATE.prio_cur = high_prio;
            CPU_STATE.tcb_high_rdy = head.as_ptr();
            CPU_STATE.tcb_cur = head.as_ptr();
            (*head.as_ptr()).state = OsThreadState::Running;
        }

        KERNEL.set_running(true);
        Ok(())
    })?;

    crate::port::os_cpu_systick_init(crate::config::CFG_CPU_FREQ_HZ / CFG_TICK_RATE_HZ);

    crate::port::os_start_high_rdy()
}

/// Enter an ISR that may use kernel services.
///
/// Pair every call with [`os_int_exit`].
#[inline]
pub fn os_int_enter() {
    KERNEL.int_enter();
}

/// Exit an ISR, performing the deferred context switch if a more urgent
/// thread became ready while the interrupt ran.
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    if KERNEL.int_nesting() == 0 {
        return;
    }

    let new_nesting = KERNEL.int_nesting_dec();

    if new_nesting == 0 && KERNEL.sched_lock_nesting() == 0 {
        let sched = unsafe { SCHED.get_unchecked() };
        let high_prio = sched.prio_tbl.get_highest();

        unsafe {
            if high_prio < CPU_STATE.prio_cur {
                if let Some(head) = sched.rdy_list[high_prio as usize].head() {
                    for prev in [NonNull::new(CPU_STATE.tcb_cur), NonNull::new(CPU_STATE.tcb_high_rdy)] {
                        if let Some(p) = prev {
                            if p != head {
                                let p_ref = &mut *p.as_ptr();
                                if p_ref.state == OsThreadState::Running {
                                    p_ref.state = OsThreadState::Ready;
                                }
                            }
                        }
                    }
                    (*head.as_ptr()).state = OsThreadState::Running;

                    CPU_STATE.prio_high_rdy = high_prio;
                    CPU_STATE.tcb_high_rdy = head.as_ptr();
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    }
}

/// Lock the scheduler.
///
/// Context switches are suppressed until the matching
/// [`os_sched_unlock`]; interrupts stay enabled. Nestable.
pub fn os_sched_lock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| KERNEL.try_sched_lock())
}

/// Unlock the scheduler.
///
/// When the nesting count returns to zero, a deferred context switch
/// occurs if a more urgent thread became ready meanwhile.
pub fn os_sched_unlock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::NotPermitted);
    }

    if is_isr_context() {
        return Err(OsError::IsrForbidden);
    }

    critical_section(|_cs| {
        let remaining = KERNEL.try_sched_unlock()?;
        if remaining == 0 {
            crate::sched::os_sched();
        }
        Ok(())
    })
}

// ============ Internal accessors for other modules ============

/// Get mutable reference to the priority table
#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioTable {
    unsafe { &mut SCHED.get_unchecked().prio_tbl }
}

/// Get reference to the ready list for a priority slot
#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: OsPrio) -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().rdy_list[prio as usize] }
}

/// Get current TCB pointer as Option<NonNull>
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { NonNull::new(CPU_STATE.tcb_cur) }
}

/// Get high ready TCB pointer as Option<NonNull>
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_high_rdy_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { NonNull::new(CPU_STATE.tcb_high_rdy) }
}

/// Set high ready TCB pointer
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_high_rdy_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.tcb_high_rdy = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr()) }
}

/// Set high ready priority slot
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_prio_high_rdy(prio: OsPrio) {
    unsafe { CPU_STATE.prio_high_rdy = prio }
}

// ============ Deadline list management ============

/// Arm a timed wait for `tcb` at an absolute deadline
pub(crate) unsafe fn tick_list_insert(tcb: NonNull<OsTcb>, deadline: OsTick) {
    unsafe { SCHED.get_unchecked().tick_list_insert(tcb, deadline) }
}

/// Disarm a timed wait
pub(crate) unsafe fn tick_list_remove(tcb: NonNull<OsTcb>) {
    unsafe { SCHED.get_unchecked().tick_list_remove(tcb) }
}

/// Earliest armed deadline entry
#[inline]
pub(crate) unsafe fn tick_list_head() -> Option<NonNull<OsTcb>> {
    unsafe { SCHED.get_unchecked().tick_head() }
}

//! Thread Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a thread. It
//! is embedded in caller-provided storage; the kernel never allocates.

use core::ptr::NonNull;

use crate::sync::wait::WaitQueue;
use crate::types::{
    FlagMode, OsFlags, OsMsgPrio, OsMsgSize, OsNestingCtr, OsPendOn, OsPendStatus, OsPrio,
    OsStkElement, OsThreadState, OsTick,
};

/// Thread Control Block
#[repr(C)]
pub struct OsTcb {
    // ============ Stack pointer ============
    /// Current stack pointer (first field, saved/restored by the port)
    pub stk_ptr: *mut OsStkElement,

    // ============ Stack information ============
    /// Base of stack
    pub stk_base: *mut OsStkElement,
    /// Stack limit watermark; a saved SP below this is fatal
    pub stk_limit: *mut OsStkElement,
    /// Stack size in words
    pub stk_size: usize,

    // ============ Thread identification ============
    /// Thread name
    pub name: &'static str,

    // ============ Ready list links ============
    /// Next TCB in ready list
    pub rdy_next: Option<NonNull<OsTcb>>,
    /// Previous TCB in ready list
    pub rdy_prev: Option<NonNull<OsTcb>>,

    // ============ Wait queue links ============
    /// Next TCB in wait queue
    pub pend_next: Option<NonNull<OsTcb>>,
    /// Previous TCB in wait queue
    pub pend_prev: Option<NonNull<OsTcb>>,
    /// The wait queue this thread is enqueued on, if any
    pub pend_q: *mut WaitQueue,
    /// The wait object this thread is blocked on, if any
    pub pend_obj: *const (),
    /// What kind of object the thread is blocked on
    pub pend_on: OsPendOn,
    /// Outcome of the wait, written by the releasing side
    pub pend_status: OsPendStatus,

    // ============ Timeout list links ============
    /// Next TCB in the deadline list
    pub tick_next: Option<NonNull<OsTcb>>,
    /// Previous TCB in the deadline list
    pub tick_prev: Option<NonNull<OsTcb>>,
    /// Absolute expiry tick of the current timed wait
    pub deadline: OsTick,
    /// Whether the thread is linked into the deadline list
    pub in_tick_list: bool,

    // ============ Priority ============
    /// Effective priority index (may be boosted below `base_prio`)
    pub prio: OsPrio,
    /// Stable priority index assigned by the application
    pub base_prio: OsPrio,

    // ============ State ============
    /// Current thread state
    pub state: OsThreadState,
    /// Suspend nesting counter
    pub suspend_ctr: OsNestingCtr,
    /// Deferred cancellation flag, observed at the next suspension point
    pub cancel_pending: bool,

    // ============ Time slicing ============
    /// Time quanta for this thread
    pub time_quanta: u32,
    /// Remaining time quanta
    pub time_quanta_ctr: u32,

    // ============ Signal flags ============
    /// Per-thread signal flags (includes the reserved wakeup bit)
    pub sig_flags: OsFlags,

    // ============ Flag wait bookkeeping ============
    /// Mask being waited for
    pub flags_pend: OsFlags,
    /// Any/all wait mode
    pub flags_mode: FlagMode,
    /// Whether matched bits are consumed on wakeup
    pub flags_consume: bool,
    /// Bits that satisfied the wait
    pub flags_rdy: OsFlags,

    // ============ Message hand-off ============
    /// Buffer or block pointer exchanged during a direct hand-off
    pub msg_ptr: *mut (),
    /// Message length in the hand-off
    pub msg_size: OsMsgSize,
    /// Message priority in the hand-off
    pub msg_prio: OsMsgPrio,

    // ============ Mutex ownership ============
    /// Head of the list of mutexes owned by this thread (opaque here,
    /// threaded through the mutexes themselves)
    pub held_mutexes: *mut (),

    // ============ Lifecycle ============
    /// The single thread joined on this one, if any
    pub joiner: Option<NonNull<OsTcb>>,
    /// Value passed to `os_thread_exit`, collected by the joiner
    pub exit_val: *mut (),
    /// Detached threads release their runtime state on termination
    pub detached: bool,

    // ============ Entry point ============
    /// Thread function address
    pub entry: usize,
    /// Thread argument
    pub entry_arg: *mut (),
}

impl OsTcb {
    /// Create a new, uninitialized TCB
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_limit: core::ptr::null_mut(),
            stk_size: 0,

            name: "",

            rdy_next: None,
            rdy_prev: None,

            pend_next: None,
            pend_prev: None,
            pend_q: core::ptr::null_mut(),
            pend_obj: core::ptr::null(),
            pend_on: OsPendOn::Nothing,
            pend_status: OsPendStatus::Ok,

            tick_next: None,
            tick_prev: None,
            deadline: 0,
            in_tick_list: false,

            prio: 0,
            base_prio: 0,

            state: OsThreadState::Ready,
            suspend_ctr: 0,
            cancel_pending: false,

            time_quanta: 0,
            time_quanta_ctr: 0,

            sig_flags: 0,

            flags_pend: 0,
            flags_mode: FlagMode::Any,
            flags_consume: false,
            flags_rdy: 0,

            msg_ptr: core::ptr::null_mut(),
            msg_size: 0,
            msg_prio: 0,

            held_mutexes: core::ptr::null_mut(),

            joiner: None,
            exit_val: core::ptr::null_mut(),
            detached: false,

            entry: 0,
            entry_arg: core::ptr::null_mut(),
        }
    }

    /// Initialize TCB to default values
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Check if the thread is in the ready set
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, OsThreadState::Ready | OsThreadState::Running)
    }

    /// Check if the thread is blocked on a wait object or sleeping
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(
            self.state,
            OsThreadState::Blocked | OsThreadState::BlockedSuspended
        )
    }

    /// Check if the thread is suspended
    #[inline]
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.state,
            OsThreadState::Suspended | OsThreadState::BlockedSuspended
        )
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}

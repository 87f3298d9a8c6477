//! Core type definitions
//!
//! These types provide strong typing for kernel primitives.

/// Internal scheduling index (0 = most urgent)
pub type OsPrio = u8;

/// Application-visible thread priority, `-30..=+30`, 0 = normal.
///
/// Higher values are more urgent. The scheduler maps this onto the
/// internal index space, reserving the extremes for the timer-service
/// and idle threads.
pub type OsThreadPrio = i8;

/// Lowest application priority
pub const THREAD_PRIO_MIN: OsThreadPrio = -30;

/// Default application priority
pub const THREAD_PRIO_NORMAL: OsThreadPrio = 0;

/// Highest application priority
pub const THREAD_PRIO_MAX: OsThreadPrio = 30;

/// Tick counter type (monotonic, 64-bit)
pub type OsTick = u64;

/// Deadline sentinel: never expires
pub const FOREVER: OsTick = OsTick::MAX;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Message size type
pub type OsMsgSize = usize;

/// Message priority (higher = delivered earlier)
pub type OsMsgPrio = u8;

/// Stack element type
pub type OsStkElement = u32;

/// Event flags type
pub type OsFlags = u32;

/// Reserved per-thread signal bit raised by `os_thread_wakeup`
pub const SIG_WAKEUP: OsFlags = 0x8000_0000;

/// Reserved per-thread signal bit used by the tick ISR to kick the
/// timer-service thread
pub const SIG_TIMER_TICK: OsFlags = 0x4000_0000;

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsThreadState {
    /// In the ready set, not currently selected
    Ready = 0,
    /// Currently executing (exactly one outside critical sections)
    Running = 1,
    /// Waiting on a wait object or sleeping
    Blocked = 2,
    /// Blocked and suspended at the same time
    BlockedSuspended = 3,
    /// Explicitly suspended
    Suspended = 4,
    /// Exited; storage still owned by the creator until join/detach
    Terminated = 5,
}

/// What a blocked thread is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendOn {
    Nothing = 0,
    /// Private sleep (no wait queue, deadline only)
    Sleep = 1,
    Sem = 2,
    Mutex = 3,
    Cond = 4,
    Flags = 5,
    QueueSend = 6,
    QueueRecv = 7,
    Pool = 8,
    Join = 9,
    /// Per-thread signal flags
    Sig = 10,
}

/// Outcome of a wait, recorded by whoever released the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendStatus {
    /// Condition became true
    Ok = 0,
    /// Deadline elapsed first
    Timeout = 1,
    /// Thread was canceled while blocked
    Canceled = 2,
    /// Robust mutex acquired after its owner died
    OwnerDead = 3,
    /// Object was reset while the thread waited
    Reset = 4,
}

/// Kernel object type marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OsObjType {
    None = 0,
    Cond = 0x434F4E44,   // 'COND'
    Flags = 0x464C4147,  // 'FLAG'
    Pool = 0x504F4F4C,   // 'POOL'
    Mutex = 0x4D555458,  // 'MUTX'
    Queue = 0x51554555,  // 'QUEU'
    Sem = 0x53454D41,    // 'SEMA'
    Thread = 0x54485244, // 'THRD'
    Timer = 0x544D5220,  // 'TMR '
}

/// Flag wait mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlagMode {
    /// Any bit of the mask satisfies the wait
    Any = 0,
    /// All bits of the mask must be set
    All = 1,
}

impl FlagMode {
    /// Bits of `current` that satisfy a wait for `mask` under this mode,
    /// or `None` if the predicate does not hold.
    #[inline]
    pub fn matched(self, current: OsFlags, mask: OsFlags) -> Option<OsFlags> {
        match self {
            FlagMode::Any => {
                let m = current & mask;
                if m != 0 {
                    Some(m)
                } else {
                    None
                }
            }
            FlagMode::All => {
                if current & mask == mask {
                    Some(mask)
                } else {
                    None
                }
            }
        }
    }
}

/// Mutex locking discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MutexType {
    /// Relocking by the owner is an error (detected, not undefined)
    Normal = 0,
    /// Relocking by the owner fails with an explicit deadlock error
    ErrorCheck = 1,
    /// Relocking by the owner increments a depth counter
    Recursive = 2,
}

/// Mutex priority protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MutexProtocol {
    /// Plain blocking queue
    None = 0,
    /// Priority inheritance: the owner is boosted to the best waiter
    Inherit = 1,
    /// Priority ceiling: the owner is raised to the ceiling on acquire
    Protect = 2,
}

//! Compile-time configuration
//!
//! These constants control the behavior and resource limits of the kernel.

/// Number of internal priority levels (bitmap slots)
pub const CFG_PRIO_LEVELS: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1_000;

/// CPU core clock in Hz, used to program the SysTick reload value
pub const CFG_CPU_FREQ_HZ: u32 = 16_000_000;

/// Default time quanta (in ticks) for round-robin scheduling
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 10;

/// Minimum thread stack size in words
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Enable round-robin scheduling for same-priority threads
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Upper bound on the priority-inheritance propagation walk
pub const CFG_MUTEX_CHAIN_MAX: usize = 8;

/// Internal priority slot of the timer-service thread (most urgent)
pub const CFG_PRIO_TIMER: u8 = 0;

/// Internal priority slot of the idle thread (least urgent)
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_LEVELS - 1) as u8;

/// Stack size of the timer-service thread, in words
pub const CFG_TIMER_STK_SIZE: usize = 256;

/// Stack size of the idle thread, in words
pub const CFG_IDLE_STK_SIZE: usize = 128;

//! Synchronization primitives
//!
//! The shared wait-queue protocol plus mutexes, semaphores, condition
//! variables, and event flags.

pub mod wait;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "condvar")]
pub mod condvar;

#[cfg(feature = "flags")]
pub mod flags;

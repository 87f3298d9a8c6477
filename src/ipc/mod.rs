//! Bounded producer/consumer structures
//!
//! Message queues and fixed-block memory pools.

#[cfg(feature = "queue")]
pub mod queue;

#[cfg(feature = "pool")]
pub mod pool;

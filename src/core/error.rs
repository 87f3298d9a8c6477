//! Error types
//!
//! One enumeration is returned from every fallible primitive. The kernel
//! never aborts on a recoverable condition; fatal conditions go through
//! the port layer's panic hook instead.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsError {
    /// Parameter out of range, misaligned, or null where forbidden
    InvalidArgument = 1,
    /// Non-blocking variant failed; object busy or empty
    ResourceUnavailable = 2,
    /// Deadline elapsed before the operation could complete
    Timeout = 3,
    /// Thread was canceled while blocked
    Canceled = 4,
    /// Operation requires ownership or privilege the caller does not hold
    NotPermitted = 5,
    /// Called from interrupt context where not allowed
    IsrForbidden = 6,
    /// Acquired a robust mutex whose previous owner terminated
    OwnerDead = 7,
    /// Robust mutex is still inconsistent; recovery was skipped
    NotRecoverable = 8,
    /// Relock of a non-recursive mutex by its owner
    Deadlock = 9,
    /// Pool or queue exhausted in a context that could not block
    OutOfMemory = 10,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

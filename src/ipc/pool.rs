//! Memory pool implementation
//!
//! Fixed-block allocator over a caller-provided contiguous region. The
//! free list is threaded through the blocks themselves, so the pool
//! object carries only metadata. Freeing with waiters present hands
//! the block straight to the most urgent waiter.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::wait::{self, WaitQueue};
use crate::types::{OsObjType, OsPendOn, OsPendStatus, OsTick, FOREVER};

/// Fixed-block memory pool
pub struct OsMemPool {
    /// Object type marker
    obj_type: OsObjType,
    /// Start of the backing region
    base: *mut u8,
    /// Bytes per block
    block_size: usize,
    /// Total blocks in the region
    capacity: usize,
    /// Free list head (links stored in the blocks)
    free_head: *mut u8,
    /// Outstanding allocations
    in_use: usize,
    /// Threads blocked waiting for a block
    waiters: WaitQueue,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

unsafe impl Send for OsMemPool {}
unsafe impl Sync for OsMemPool {}

impl OsMemPool {
    /// Create a new, uninitialized pool
    pub const fn new() -> Self {
        OsMemPool {
            obj_type: OsObjType::None,
            base: core::ptr::null_mut(),
            block_size: 0,
            capacity: 0,
            free_head: core::ptr::null_mut(),
            in_use: 0,
            waiters: WaitQueue::new(),
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the pool over a caller-provided region.
    ///
    /// `block_size` must hold a pointer (the free-list link lives in
    /// the block) and be pointer-aligned, as must the region itself.
    /// The region stays owned by the caller and must outlive the pool.
    pub fn create(
        &mut self,
        region: &'static mut [u8],
        block_size: usize,
        _name: &'static str,
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        if block_size < size_of::<*mut u8>() || block_size % align_of::<*mut u8>() != 0 {
            return Err(OsError::InvalidArgument);
        }

        if (region.as_ptr() as usize) % align_of::<*mut u8>() != 0 {
            return Err(OsError::InvalidArgument);
        }

        let capacity = region.len() / block_size;
        if capacity == 0 {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Pool;
            self.base = region.as_mut_ptr();
            self.block_size = block_size;
            self.capacity = capacity;
            self.in_use = 0;
            self.waiters.init();
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }

            // thread the free list through the blocks
            self.free_head = core::ptr::null_mut();
            for i in (0..capacity).rev() {
                let block = unsafe { self.base.add(i * block_size) };
                unsafe { (block as *mut *mut u8).write(self.free_head) };
                self.free_head = block;
            }

            Ok(())
        })
    }

    /// Allocate a block, blocking while the pool is empty
    pub fn alloc(&mut self) -> OsResult<NonNull<u8>> {
        self.pend(FOREVER, true)
    }

    /// Allocate without blocking
    ///
    /// Fails with `OutOfMemory` when no block is free.
    pub fn try_alloc(&mut self) -> OsResult<NonNull<u8>> {
        self.pend(FOREVER, false)
    }

    /// Allocate with a deadline, in ticks from now
    pub fn timed_alloc(&mut self, ticks: OsTick) -> OsResult<NonNull<u8>> {
        self.pend(clock::deadline_after(ticks), true)
    }

    fn pend(&mut self, deadline: OsTick, blocking: bool) -> OsResult<NonNull<u8>> {
        if self.obj_type != OsObjType::Pool {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let immediate = critical_section(|_cs| {
            if !self.free_head.is_null() {
                let block = self.free_head;
                self.free_head = unsafe { (block as *mut *mut u8).read() };
                self.in_use += 1;
                return Ok(Some(unsafe { NonNull::new_unchecked(block) }));
            }

            if !blocking {
                return Err(OsError::OutOfMemory);
            }

            let cur = wait::blocking_checks()?;

            unsafe {
                let t = &mut *cur.as_ptr();
                t.msg_ptr = core::ptr::null_mut();

                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.waiters),
                    OsPendOn::Pool,
                    token,
                    deadline,
                );
            }
            sched::os_sched();
            Ok(None)
        })?;

        if let Some(block) = immediate {
            return Ok(block);
        }

        critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
            unsafe { wait::pend_result(cur)? };
            // the freeing thread parked the block in our hand-off slot
            NonNull::new(unsafe { cur.as_ref().msg_ptr } as *mut u8).ok_or(OsError::OutOfMemory)
        })
    }

    /// Return a block to the pool.
    ///
    /// The address must lie inside the region on a block boundary. A
    /// parked waiter receives the block directly instead of it touching
    /// the free list.
    pub fn free(&mut self, block: NonNull<u8>) -> OsResult<()> {
        if self.obj_type != OsObjType::Pool {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let ptr = block.as_ptr();
        let offset = (ptr as usize).wrapping_sub(self.base as usize);
        if offset >= self.capacity * self.block_size || offset % self.block_size != 0 {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            if self.in_use == 0 {
                return Err(OsError::InvalidArgument);
            }

            if let Some(waiter) = self.waiters.head() {
                unsafe {
                    (*waiter.as_ptr()).msg_ptr = ptr as *mut ();
                    wait::unblock(waiter, OsPendStatus::Ok);
                }
                sched::os_sched();
                return Ok(());
            }

            unsafe { (ptr as *mut *mut u8).write(self.free_head) };
            self.free_head = ptr;
            self.in_use -= 1;
            Ok(())
        })
    }

    /// Tear the pool down.
    ///
    /// Destroying a pool with outstanding blocks or waiters is a
    /// programming error and is fatal. Idempotent on an idle pool.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::None {
                return Ok(());
            }

            if self.in_use != 0 || !self.waiters.is_empty() {
                crate::port::os_fatal("memory pool destroyed while in use");
            }

            self.obj_type = OsObjType::None;
            self.base = core::ptr::null_mut();
            self.free_head = core::ptr::null_mut();
            self.capacity = 0;
            Ok(())
        })
    }

    /// Blocks currently allocated
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Total blocks in the pool
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per block
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// True if no block is free
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free_head.is_null()
    }
}

impl Default for OsMemPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable memory pool handle
pub struct MemPool {
    inner: UnsafeCell<OsMemPool>,
}

unsafe impl Sync for MemPool {}
unsafe impl Send for MemPool {}

impl MemPool {
    pub const fn new() -> Self {
        MemPool {
            inner: UnsafeCell::new(OsMemPool::new()),
        }
    }

    pub fn create(
        &self,
        region: &'static mut [u8],
        block_size: usize,
        name: &'static str,
    ) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(region, block_size, name) }
    }

    pub fn alloc(&self) -> OsResult<NonNull<u8>> {
        unsafe { (*self.inner.get()).alloc() }
    }

    pub fn try_alloc(&self) -> OsResult<NonNull<u8>> {
        unsafe { (*self.inner.get()).try_alloc() }
    }

    pub fn timed_alloc(&self, ticks: OsTick) -> OsResult<NonNull<u8>> {
        unsafe { (*self.inner.get()).timed_alloc(ticks) }
    }

    pub fn free(&self, block: NonNull<u8>) -> OsResult<()> {
        unsafe { (*self.inner.get()).free(block) }
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        unsafe { (*self.inner.get()).in_use() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { (*self.inner.get()).capacity() }
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new()
    }
}

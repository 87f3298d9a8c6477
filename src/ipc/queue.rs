//! Message queue implementation
//!
//! Fixed-capacity priority queue over a caller-provided byte arena. The
//! arena is carved into `capacity` slots of `header + msg_size` bytes;
//! the queue object itself holds only metadata. Messages are kept in
//! non-increasing priority order, FIFO within equal priority.
//!
//! Hand-off is direct in both directions: an enqueue with a parked
//! receiver copies straight into the receiver's buffer, and a dequeue
//! with a parked sender pulls that sender's message into the freed
//! slot.

use core::mem::{align_of, size_of};

use crate::clock;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::wait::{self, WaitQueue};
use crate::types::{OsMsgPrio, OsMsgSize, OsObjType, OsPendOn, OsPendStatus, OsTick, FOREVER};

/// Per-slot header, stored in the arena in front of the payload
#[repr(C)]
struct MsgSlot {
    next: *mut MsgSlot,
    len: OsMsgSize,
    prio: OsMsgPrio,
}

/// Arena stride for one slot carrying `msg_size` payload bytes
const fn slot_stride(msg_size: usize) -> usize {
    let raw = size_of::<MsgSlot>() + msg_size;
    (raw + align_of::<MsgSlot>() - 1) & !(align_of::<MsgSlot>() - 1)
}

/// Bytes of arena needed for a queue of `capacity` messages of
/// `msg_size` bytes each. Useful for sizing the backing array.
pub const fn os_mq_arena_size(msg_size: usize, capacity: usize) -> usize {
    slot_stride(msg_size) * capacity
}

unsafe fn slot_payload(slot: *mut MsgSlot) -> *mut u8 {
    unsafe { (slot as *mut u8).add(size_of::<MsgSlot>()) }
}

/// Message queue
pub struct OsMsgQ {
    /// Object type marker
    obj_type: OsObjType,
    /// Maximum payload bytes per message
    msg_size: OsMsgSize,
    /// Maximum queued messages
    capacity: usize,
    /// Free slots (unordered)
    free_head: *mut MsgSlot,
    /// Queued messages, non-increasing priority, FIFO within a band
    used_head: *mut MsgSlot,
    used_tail: *mut MsgSlot,
    /// Number of queued messages
    count: usize,
    /// Threads blocked because the queue was full
    send_waiters: WaitQueue,
    /// Threads blocked because the queue was empty
    recv_waiters: WaitQueue,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

unsafe impl Send for OsMsgQ {}
unsafe impl Sync for OsMsgQ {}

impl OsMsgQ {
    /// Create a new, uninitialized queue
    pub const fn new() -> Self {
        OsMsgQ {
            obj_type: OsObjType::None,
            msg_size: 0,
            capacity: 0,
            free_head: core::ptr::null_mut(),
            used_head: core::ptr::null_mut(),
            used_tail: core::ptr::null_mut(),
            count: 0,
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the queue over a caller-provided arena.
    ///
    /// The arena must be at least [`os_mq_arena_size`] bytes and
    /// pointer-aligned; it stays owned by the caller and must outlive
    /// the queue.
    pub fn create(
        &mut self,
        arena: &'static mut [u8],
        msg_size: OsMsgSize,
        capacity: usize,
        _name: &'static str,
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        if msg_size == 0 || capacity == 0 {
            return Err(OsError::InvalidArgument);
        }

        if arena.len() < os_mq_arena_size(msg_size, capacity) {
            return Err(OsError::InvalidArgument);
        }

        if (arena.as_ptr() as usize) % align_of::<MsgSlot>() != 0 {
            return Err(OsError::InvalidArgument);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Queue;
            self.msg_size = msg_size;
            self.capacity = capacity;
            self.used_head = core::ptr::null_mut();
            self.used_tail = core::ptr::null_mut();
            self.count = 0;
            self.send_waiters.init();
            self.recv_waiters.init();
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }

            // thread the free list through the arena
            let stride = slot_stride(msg_size);
            let base = arena.as_mut_ptr();
            self.free_head = core::ptr::null_mut();
            for i in (0..capacity).rev() {
                let slot = unsafe { base.add(i * stride) } as *mut MsgSlot;
                unsafe {
                    (*slot).next = self.free_head;
                    (*slot).len = 0;
                    (*slot).prio = 0;
                }
                self.free_head = slot;
            }

            Ok(())
        })
    }

    /// Send a message, blocking while the queue is full
    pub fn send(&mut self, msg: &[u8], prio: OsMsgPrio) -> OsResult<()> {
        self.send_inner(msg, prio, FOREVER, true)
    }

    /// Send without blocking. ISR-safe.
    ///
    /// Fails with `ResourceUnavailable` when the queue is full.
    pub fn try_send(&mut self, msg: &[u8], prio: OsMsgPrio) -> OsResult<()> {
        self.send_inner(msg, prio, FOREVER, false)
    }

    /// Send with a deadline, in ticks from now
    pub fn timed_send(&mut self, msg: &[u8], prio: OsMsgPrio, ticks: OsTick) -> OsResult<()> {
        self.send_inner(msg, prio, clock::deadline_after(ticks), true)
    }

    fn send_inner(
        &mut self,
        msg: &[u8],
        prio: OsMsgPrio,
        deadline: OsTick,
        blocking: bool,
    ) -> OsResult<()> {
        if self.obj_type != OsObjType::Queue {
            return Err(OsError::InvalidArgument);
        }

        if msg.is_empty() || msg.len() > self.msg_size {
            return Err(OsError::InvalidArgument);
        }

        if blocking && is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let blocked = critical_section(|_cs| {
            // a parked receiver implies an empty queue: deliver direct
            if let Some(rx) = self.recv_waiters.head() {
                unsafe {
                    let r = &mut *rx.as_ptr();
                    core::ptr::copy_nonoverlapping(msg.as_ptr(), r.msg_ptr as *mut u8, msg.len());
                    r.msg_size = msg.len();
                    r.msg_prio = prio;
                    wait::unblock(rx, OsPendStatus::Ok);
                }
                if !is_isr_context() {
                    sched::os_sched();
                }
                return Ok(None);
            }

            if !self.free_head.is_null() {
                unsafe { self.enqueue(msg.as_ptr(), msg.len(), prio) };
                return Ok(None);
            }

            if !blocking {
                return Err(OsError::ResourceUnavailable);
            }

            let cur = wait::blocking_checks()?;

            unsafe {
                // the message stays in the sender's buffer until a
                // receiver frees a slot and pulls it over
                let t = &mut *cur.as_ptr();
                t.msg_ptr = msg.as_ptr() as *mut ();
                t.msg_size = msg.len();
                t.msg_prio = prio;

                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.send_waiters),
                    OsPendOn::QueueSend,
                    token,
                    deadline,
                );
            }
            sched::os_sched();
            Ok(Some(cur))
        })?;

        match blocked {
            None => Ok(()),
            Some(cur) => critical_section(|_cs| unsafe { wait::pend_result(cur) }),
        }
    }

    /// Receive a message, blocking while the queue is empty.
    ///
    /// Returns the payload length and the message priority.
    pub fn receive(&mut self, buf: &mut [u8]) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        self.recv_inner(buf, FOREVER, true)
    }

    /// Receive without blocking
    pub fn try_receive(&mut self, buf: &mut [u8]) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        self.recv_inner(buf, FOREVER, false)
    }

    /// Receive with a deadline, in ticks from now
    pub fn timed_receive(
        &mut self,
        buf: &mut [u8],
        ticks: OsTick,
    ) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        self.recv_inner(buf, clock::deadline_after(ticks), true)
    }

    fn recv_inner(
        &mut self,
        buf: &mut [u8],
        deadline: OsTick,
        blocking: bool,
    ) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        if self.obj_type != OsObjType::Queue {
            return Err(OsError::InvalidArgument);
        }

        if buf.len() < self.msg_size {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        let immediate = critical_section(|_cs| {
            if !self.used_head.is_null() {
                let (len, prio) = unsafe { self.dequeue_into(buf.as_mut_ptr()) };

                // the freed slot can absorb a parked sender's message
                if let Some(tx) = self.send_waiters.head() {
                    unsafe {
                        let s = &*tx.as_ptr();
                        self.enqueue(s.msg_ptr as *const u8, s.msg_size, s.msg_prio);
                        wait::unblock(tx, OsPendStatus::Ok);
                    }
                    sched::os_sched();
                }

                return Ok(Some((len, prio)));
            }

            if !blocking {
                return Err(OsError::ResourceUnavailable);
            }

            let cur = wait::blocking_checks()?;

            unsafe {
                let t = &mut *cur.as_ptr();
                t.msg_ptr = buf.as_mut_ptr() as *mut ();
                t.msg_size = buf.len();
                t.msg_prio = 0;

                let token = self as *const _ as *const ();
                wait::block_current(
                    cur,
                    Some(&mut self.recv_waiters),
                    OsPendOn::QueueRecv,
                    token,
                    deadline,
                );
            }
            sched::os_sched();
            Ok(None)
        })?;

        if let Some(got) = immediate {
            return Ok(got);
        }

        critical_section(|_cs| {
            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::NotPermitted)?;
            unsafe { wait::pend_result(cur)? };
            let t = unsafe { cur.as_ref() };
            Ok((t.msg_size, t.msg_prio))
        })
    }

    /// Drop every queued message and fail parked senders.
    pub fn reset(&mut self) -> OsResult<()> {
        if self.obj_type != OsObjType::Queue {
            return Err(OsError::InvalidArgument);
        }

        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            while !self.used_head.is_null() {
                let slot = self.used_head;
                unsafe {
                    self.used_head = (*slot).next;
                    (*slot).next = self.free_head;
                }
                self.free_head = slot;
            }
            self.used_tail = core::ptr::null_mut();
            self.count = 0;

            if unsafe { wait::wake_all(&mut self.send_waiters, OsPendStatus::Reset) } > 0 {
                sched::os_sched();
            }

            Ok(())
        })
    }

    /// Tear the queue down.
    ///
    /// Destroying a queue with parked threads is a programming error
    /// and is fatal. Idempotent on an idle queue.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::IsrForbidden);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::None {
                return Ok(());
            }

            if !self.send_waiters.is_empty() || !self.recv_waiters.is_empty() {
                crate::port::os_fatal("message queue destroyed with waiters");
            }

            self.obj_type = OsObjType::None;
            self.free_head = core::ptr::null_mut();
            self.used_head = core::ptr::null_mut();
            self.used_tail = core::ptr::null_mut();
            self.count = 0;
            Ok(())
        })
    }

    /// Number of queued messages
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if no messages are queued
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True if every slot is occupied
    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Maximum payload bytes per message
    #[inline]
    pub fn msg_size(&self) -> OsMsgSize {
        self.msg_size
    }

    /// Pop a free slot, fill it, and link it in priority order.
    /// Caller holds the interrupt lock and has checked `free_head`.
    unsafe fn enqueue(&mut self, msg: *const u8, len: OsMsgSize, prio: OsMsgPrio) {
        unsafe {
            let slot = self.free_head;
            self.free_head = (*slot).next;

            core::ptr::copy_nonoverlapping(msg, slot_payload(slot), len);
            (*slot).len = len;
            (*slot).prio = prio;
            (*slot).next = core::ptr::null_mut();

            // insert after the last message of priority >= prio
            let mut prev: *mut MsgSlot = core::ptr::null_mut();
            let mut cur = self.used_head;
            while !cur.is_null() && (*cur).prio >= prio {
                prev = cur;
                cur = (*cur).next;
            }

            (*slot).next = cur;
            if prev.is_null() {
                self.used_head = slot;
            } else {
                (*prev).next = slot;
            }
            if cur.is_null() {
                self.used_tail = slot;
            }

            self.count += 1;
        }
    }

    /// Unlink the head message into `dst` and recycle its slot.
    /// Caller holds the interrupt lock and has checked `used_head`.
    unsafe fn dequeue_into(&mut self, dst: *mut u8) -> (OsMsgSize, OsMsgPrio) {
        unsafe {
            let slot = self.used_head;
            self.used_head = (*slot).next;
            if self.used_head.is_null() {
                self.used_tail = core::ptr::null_mut();
            }

            let len = (*slot).len;
            let prio = (*slot).prio;
            core::ptr::copy_nonoverlapping(slot_payload(slot), dst, len);

            (*slot).next = self.free_head;
            self.free_head = slot;
            self.count -= 1;

            (len, prio)
        }
    }
}

impl Default for OsMsgQ {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

/// Shareable message queue handle
pub struct MsgQueue {
    inner: UnsafeCell<OsMsgQ>,
}

unsafe impl Sync for MsgQueue {}
unsafe impl Send for MsgQueue {}

impl MsgQueue {
    pub const fn new() -> Self {
        MsgQueue {
            inner: UnsafeCell::new(OsMsgQ::new()),
        }
    }

    pub fn create(
        &self,
        arena: &'static mut [u8],
        msg_size: OsMsgSize,
        capacity: usize,
        name: &'static str,
    ) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(arena, msg_size, capacity, name) }
    }

    pub fn send(&self, msg: &[u8], prio: OsMsgPrio) -> OsResult<()> {
        unsafe { (*self.inner.get()).send(msg, prio) }
    }

    pub fn try_send(&self, msg: &[u8], prio: OsMsgPrio) -> OsResult<()> {
        unsafe { (*self.inner.get()).try_send(msg, prio) }
    }

    pub fn timed_send(&self, msg: &[u8], prio: OsMsgPrio, ticks: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).timed_send(msg, prio, ticks) }
    }

    pub fn receive(&self, buf: &mut [u8]) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        unsafe { (*self.inner.get()).receive(buf) }
    }

    pub fn try_receive(&self, buf: &mut [u8]) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        unsafe { (*self.inner.get()).try_receive(buf) }
    }

    pub fn timed_receive(&self, buf: &mut [u8], ticks: OsTick) -> OsResult<(OsMsgSize, OsMsgPrio)> {
        unsafe { (*self.inner.get()).timed_receive(buf, ticks) }
    }

    pub fn reset(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).reset() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        unsafe { (*self.inner.get()).len() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.inner.get()).is_empty() }
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}

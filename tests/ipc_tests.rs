//! Host tests for the wait queue and the non-blocking IPC paths
//!
//! Blocking behavior needs a live scheduler and a real port; what runs
//! here is everything that doesn't: wait-queue ordering, message
//! ordering in the queue arena, and pool free-list management.

use core::ptr::NonNull;

use osmos::error::OsError;
use osmos::ipc::pool::OsMemPool;
use osmos::ipc::queue::{os_mq_arena_size, OsMsgQ};
use osmos::thread::OsTcb;
use osmos::wait::WaitQueue;

/// Pointer-aligned byte arena for queue/pool backing storage
#[repr(align(8))]
struct Arena<const N: usize>([u8; N]);

fn leak_arena<const N: usize>() -> &'static mut [u8] {
    &mut Box::leak(Box::new(Arena([0u8; N]))).0
}

fn tcb_with_prio(prio: u8) -> &'static mut OsTcb {
    let tcb = Box::leak(Box::new(OsTcb::new()));
    tcb.prio = prio;
    tcb.base_prio = prio;
    tcb
}

fn queue_order(q: &WaitQueue) -> Vec<u8> {
    let mut out = Vec::new();
    let mut cursor = q.head();
    while let Some(cur) = cursor {
        let t = unsafe { cur.as_ref() };
        out.push(t.prio);
        cursor = t.pend_next;
    }
    out
}

#[test]
fn test_wait_queue_orders_by_urgency() {
    let mut q = WaitQueue::new();

    let a = NonNull::from(tcb_with_prio(20));
    let b = NonNull::from(tcb_with_prio(5));
    let c = NonNull::from(tcb_with_prio(40));
    let d = NonNull::from(tcb_with_prio(5));

    q.insert_by_prio(a);
    q.insert_by_prio(b);
    q.insert_by_prio(c);
    q.insert_by_prio(d);

    // lower index = more urgent; equal indices keep arrival order
    assert_eq!(queue_order(&q), vec![5, 5, 20, 40]);
    assert_eq!(q.head(), Some(b));
    assert_eq!(q.len(), 4);
}

#[test]
fn test_wait_queue_fifo_within_band() {
    let mut q = WaitQueue::new();

    let first = NonNull::from(tcb_with_prio(10));
    let second = NonNull::from(tcb_with_prio(10));
    let third = NonNull::from(tcb_with_prio(10));

    q.insert_by_prio(first);
    q.insert_by_prio(second);
    q.insert_by_prio(third);

    assert_eq!(q.head(), Some(first));
    q.remove(first);
    assert_eq!(q.head(), Some(second));
    q.remove(second);
    assert_eq!(q.head(), Some(third));
    q.remove(third);
    assert!(q.is_empty());
}

#[test]
fn test_wait_queue_reorder_after_boost() {
    let mut q = WaitQueue::new();

    let a = NonNull::from(tcb_with_prio(10));
    let b = NonNull::from(tcb_with_prio(20));

    q.insert_by_prio(a);
    q.insert_by_prio(b);
    assert_eq!(q.head(), Some(a));

    // boost b past a and re-sort it
    unsafe { (*b.as_ptr()).prio = 3 };
    q.reorder(b);

    assert_eq!(q.head(), Some(b));
    assert_eq!(queue_order(&q), vec![3, 10]);
}

#[test]
fn test_queue_priority_delivery_order() {
    const MSG: usize = 4;
    const CAP: usize = 4;

    let mut q = OsMsgQ::new();
    q.create(leak_arena::<{ os_mq_arena_size(MSG, CAP) }>(), MSG, CAP, "t")
        .unwrap();

    // [1, 5, 3, 5] in, tagged so the two fives are distinguishable
    q.try_send(b"p1_a", 1).unwrap();
    q.try_send(b"p5_a", 5).unwrap();
    q.try_send(b"p3_a", 3).unwrap();
    q.try_send(b"p5_b", 5).unwrap();

    assert!(q.is_full());
    assert_eq!(q.try_send(b"p9_x", 9), Err(OsError::ResourceUnavailable));

    let mut buf = [0u8; MSG];
    let mut got = Vec::new();
    while let Ok((len, prio)) = q.try_receive(&mut buf) {
        assert_eq!(len, MSG);
        got.push((prio, buf));
    }

    // highest priority first, FIFO within the two fives
    assert_eq!(
        got,
        vec![(5, *b"p5_a"), (5, *b"p5_b"), (3, *b"p3_a"), (1, *b"p1_a")]
    );

    assert!(q.is_empty());
    assert_eq!(
        q.try_receive(&mut buf),
        Err(OsError::ResourceUnavailable)
    );
}

#[test]
fn test_queue_short_messages_and_validation() {
    const MSG: usize = 8;
    const CAP: usize = 2;

    let mut q = OsMsgQ::new();
    q.create(leak_arena::<{ os_mq_arena_size(MSG, CAP) }>(), MSG, CAP, "t")
        .unwrap();

    // shorter payloads keep their length
    q.try_send(b"abc", 0).unwrap();
    let mut buf = [0u8; MSG];
    let (len, prio) = q.try_receive(&mut buf).unwrap();
    assert_eq!((len, prio), (3, 0));
    assert_eq!(&buf[..3], b"abc");

    // oversized payloads and undersized receive buffers are rejected
    assert_eq!(
        q.try_send(&[0u8; MSG + 1], 0),
        Err(OsError::InvalidArgument)
    );
    let mut small = [0u8; MSG - 1];
    assert_eq!(q.try_receive(&mut small), Err(OsError::InvalidArgument));
}

#[test]
fn test_queue_reset_recycles_slots() {
    const MSG: usize = 4;
    const CAP: usize = 2;

    let mut q = OsMsgQ::new();
    q.create(leak_arena::<{ os_mq_arena_size(MSG, CAP) }>(), MSG, CAP, "t")
        .unwrap();

    q.try_send(b"aaaa", 0).unwrap();
    q.try_send(b"bbbb", 0).unwrap();
    assert!(q.is_full());

    q.reset().unwrap();
    assert!(q.is_empty());

    q.try_send(b"cccc", 0).unwrap();
    let mut buf = [0u8; MSG];
    assert_eq!(q.try_receive(&mut buf).unwrap(), (4, 0));
    assert_eq!(&buf, b"cccc");
}

#[test]
fn test_pool_alloc_free_cycle() {
    const BLOCK: usize = 16;
    const BLOCKS: usize = 4;

    let mut pool = OsMemPool::new();
    pool.create(leak_arena::<{ BLOCK * BLOCKS }>(), BLOCK, "t").unwrap();

    assert_eq!(pool.capacity(), BLOCKS);
    assert_eq!(pool.in_use(), 0);

    let mut blocks = Vec::new();
    for _ in 0..BLOCKS {
        blocks.push(pool.try_alloc().unwrap());
    }
    assert_eq!(pool.in_use(), BLOCKS);
    assert!(pool.is_empty());
    assert_eq!(pool.try_alloc().unwrap_err(), OsError::OutOfMemory);

    // blocks are distinct and block-aligned within the region
    for (i, a) in blocks.iter().enumerate() {
        for b in blocks.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }

    for b in blocks.drain(..) {
        pool.free(b).unwrap();
    }
    assert_eq!(pool.in_use(), 0);

    // the pool is whole again
    for _ in 0..BLOCKS {
        blocks.push(pool.try_alloc().unwrap());
    }
}

#[test]
fn test_pool_free_validates_address() {
    const BLOCK: usize = 16;
    const BLOCKS: usize = 2;

    let mut pool = OsMemPool::new();
    pool.create(leak_arena::<{ BLOCK * BLOCKS }>(), BLOCK, "t").unwrap();

    let block = pool.try_alloc().unwrap();

    // misaligned interior pointer
    let inside = unsafe { NonNull::new_unchecked(block.as_ptr().add(1)) };
    assert_eq!(pool.free(inside), Err(OsError::InvalidArgument));

    // foreign pointer
    let mut elsewhere = [0u8; BLOCK];
    let foreign = NonNull::from(&mut elsewhere[0]);
    assert_eq!(pool.free(foreign), Err(OsError::InvalidArgument));

    pool.free(block).unwrap();
}

#[test]
fn test_pool_rejects_bad_geometry() {
    let mut pool = OsMemPool::new();

    // block too small to hold the free-list link
    assert_eq!(
        pool.create(leak_arena::<64>(), 4, "t"),
        Err(OsError::InvalidArgument)
    );

    // region smaller than one block
    let mut pool2 = OsMemPool::new();
    assert_eq!(
        pool2.create(leak_arena::<8>(), 16, "t"),
        Err(OsError::InvalidArgument)
    );
}

//! Producer-Consumer example over a priority message queue

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use osmos::ipc::queue::{os_mq_arena_size, MsgQueue};
use osmos::os_thread_create;
use osmos::thread::OsTcb;
use osmos::time::os_sleep;
use osmos::types::OsStkElement;

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

const MSG_SIZE: usize = 4;
const CAPACITY: usize = 8;

static QUEUE: MsgQueue = MsgQueue::new();

/// Queue arena, pointer-aligned for the slot headers
#[repr(align(4))]
struct QueueArena([u8; os_mq_arena_size(MSG_SIZE, CAPACITY)]);
static mut QUEUE_ARENA: QueueArena = QueueArena([0; os_mq_arena_size(MSG_SIZE, CAPACITY)]);

static mut PRODUCER_STK: [OsStkElement; 256] = [0; 256];
static mut PRODUCER_TCB: OsTcb = OsTcb::new();
static mut CONSUMER_STK: [OsStkElement; 256] = [0; 256];
static mut CONSUMER_TCB: OsTcb = OsTcb::new();

fn producer_thread(_arg: *mut ()) -> ! {
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;
        // every fourth message is urgent and jumps the queue
        let prio = if n % 4 == 0 { 9 } else { 1 };
        let _ = QUEUE.send(&n.to_le_bytes(), prio);
        info!("[P] produced #{} prio={}", n, prio);
        let _ = os_sleep(200);
    }
}

fn consumer_thread(_arg: *mut ()) -> ! {
    let mut buf = [0u8; MSG_SIZE];
    loop {
        if let Ok((len, prio)) = QUEUE.receive(&mut buf) {
            let n = u32::from_le_bytes(buf);
            let total = CONSUMED.fetch_add(1, Ordering::Relaxed) + 1;
            info!("[C] got #{} ({} bytes, prio={}), total={}", n, len, prio, total);
        }
        for _ in 0..10_000 { cortex_m::asm::nop(); }
    }
}

#[entry]
fn main() -> ! {
    info!("Producer-Consumer Demo");

    osmos::os_init().expect("kernel init failed");
    QUEUE
        .create(unsafe { &mut QUEUE_ARENA.0 }, MSG_SIZE, CAPACITY, "work")
        .unwrap();

    unsafe {
        os_thread_create(&mut PRODUCER_TCB, &mut PRODUCER_STK, "P", producer_thread, -5).unwrap();
        os_thread_create(&mut CONSUMER_TCB, &mut CONSUMER_STK, "C", consumer_thread, 5).unwrap();
    }

    info!("starting...");
    osmos::os_start().expect("kernel start failed");

    loop { cortex_m::asm::wfi(); }
}

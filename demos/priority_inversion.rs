//! Priority Inversion Demo - mutex priority inheritance
//!
//! Three threads: High(+10), Med(0), Low(-10).
//! Low holds the mutex -> High waits -> Low is boosted to +10 and runs
//! through the CPU-bound Med thread until it releases.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use osmos::os_thread_create;
use osmos::sync::mutex::{Mutex, MutexAttr};
use osmos::thread::OsTcb;
use osmos::time::os_sleep;
use osmos::types::{MutexProtocol, MutexType, OsStkElement};

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static MTX: Mutex = Mutex::new();

static mut HIGH_STK: [OsStkElement; 256] = [0; 256];
static mut HIGH_TCB: OsTcb = OsTcb::new();
static mut MED_STK: [OsStkElement; 256] = [0; 256];
static mut MED_TCB: OsTcb = OsTcb::new();
static mut LOW_STK: [OsStkElement; 256] = [0; 256];
static mut LOW_TCB: OsTcb = OsTcb::new();

/// High priority thread (+10)
fn high_thread(_arg: *mut ()) -> ! {
    let _ = os_sleep(50);

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.lock();
        info!("[HIGH] acquired #{}", n);

        for _ in 0..1_000 { cortex_m::asm::nop(); }

        let _ = MTX.unlock();
        let _ = os_sleep(100);
    }
}

/// Medium priority thread (0) - CPU bound
fn med_thread(_arg: *mut ()) -> ! {
    loop {
        for _ in 0..50_000 { cortex_m::asm::nop(); }
        let _ = os_sleep(10);
    }
}

/// Low priority thread (-10) - holds the mutex for a long time
fn low_thread(_arg: *mut ()) -> ! {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.lock();
        info!("[LOW] holding #{}", n);

        for _ in 0..100_000 { cortex_m::asm::nop(); }

        let _ = MTX.unlock();
        let _ = os_sleep(200);
    }
}

#[entry]
fn main() -> ! {
    info!("Priority Inversion Demo: H(+10) M(0) L(-10)");

    osmos::os_init().expect("kernel init failed");

    let attr = MutexAttr {
        mtype: MutexType::Normal,
        protocol: MutexProtocol::Inherit,
        ..Default::default()
    };
    MTX.create(attr, "guard").unwrap();

    unsafe {
        os_thread_create(&mut LOW_TCB, &mut LOW_STK, "L", low_thread, -10).unwrap();
        os_thread_create(&mut MED_TCB, &mut MED_STK, "M", med_thread, 0).unwrap();
        os_thread_create(&mut HIGH_TCB, &mut HIGH_STK, "H", high_thread, 10).unwrap();
    }

    info!("starting...");
    osmos::os_start().expect("kernel start failed");

    loop { cortex_m::asm::wfi(); }
}

//! Software timer demo: a periodic heartbeat and a one-shot alarm

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use osmos::os_thread_create;
use osmos::thread::OsTcb;
use osmos::time::os_sleep;
use osmos::time::timer::{OsTmrKind, Timer};
use osmos::types::OsStkElement;

static HEARTBEATS: AtomicU32 = AtomicU32::new(0);

static HEARTBEAT: Timer = Timer::new();
static ALARM: Timer = Timer::new();

static mut MAIN_STK: [OsStkElement; 256] = [0; 256];
static mut MAIN_TCB: OsTcb = OsTcb::new();

fn on_heartbeat(_arg: *mut ()) {
    let n = HEARTBEATS.fetch_add(1, Ordering::Relaxed) + 1;
    info!("heartbeat #{} at tick {}", n, osmos::os_clock_now());
}

fn on_alarm(_arg: *mut ()) {
    info!("alarm fired once, stopping the heartbeat");
    let _ = HEARTBEAT.stop();
}

fn main_thread(_arg: *mut ()) -> ! {
    HEARTBEAT
        .create(OsTmrKind::Periodic, 100, on_heartbeat, core::ptr::null_mut(), "beat")
        .unwrap();
    ALARM
        .create(OsTmrKind::OneShot, 1_000, on_alarm, core::ptr::null_mut(), "alarm")
        .unwrap();

    HEARTBEAT.start().unwrap();
    ALARM.start().unwrap();

    loop {
        let _ = os_sleep(500);
        info!("beats so far: {}", HEARTBEATS.load(Ordering::Relaxed));
    }
}

#[entry]
fn main() -> ! {
    info!("Timer Demo");

    osmos::os_init().expect("kernel init failed");

    unsafe {
        os_thread_create(&mut MAIN_TCB, &mut MAIN_STK, "main", main_thread, 0).unwrap();
    }

    osmos::os_start().expect("kernel start failed");

    loop { cortex_m::asm::wfi(); }
}

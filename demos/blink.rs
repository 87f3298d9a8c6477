//! Blink Example - LED blinking on STM32F401 driven by two threads

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use osmos::os_thread_create;
use osmos::thread::OsTcb;
use osmos::time::os_sleep_ms;
use osmos::types::OsStkElement;

#[cfg(feature = "pac")]
use osmos::pac;

// ============ Thread Storage ============

static mut BLINK_STK: [OsStkElement; 512] = [0; 512];
static mut BLINK_TCB: OsTcb = OsTcb::new();

static mut REPORT_STK: [OsStkElement; 512] = [0; 512];
static mut REPORT_TCB: OsTcb = OsTcb::new();

// ============ LED Control ============

#[cfg(feature = "pac")]
fn led_init() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::GPIOA.moder().modify(|w| w.set_moder(5, pac::gpio::vals::Moder::OUTPUT));
    pac::GPIOA.otyper().modify(|w| w.set_ot(5, pac::gpio::vals::Ot::PUSHPULL));
}

#[cfg(feature = "pac")]
fn led_on() { pac::GPIOA.bsrr().write(|w| w.set_bs(5, true)); }

#[cfg(feature = "pac")]
fn led_off() { pac::GPIOA.bsrr().write(|w| w.set_br(5, true)); }

#[cfg(not(feature = "pac"))]
fn led_init() {}
#[cfg(not(feature = "pac"))]
fn led_on() {}
#[cfg(not(feature = "pac"))]
fn led_off() {}

// ============ Threads ============

fn blink_thread(_: *mut ()) -> ! {
    osmos::info!("blink thread started");
    loop {
        led_on();
        osmos::info!("LED ON");
        let _ = os_sleep_ms(500);

        led_off();
        osmos::info!("LED OFF");
        let _ = os_sleep_ms(500);
    }
}

fn report_thread(_: *mut ()) -> ! {
    loop {
        osmos::info!("tick = {}", osmos::os_clock_now());
        let _ = os_sleep_ms(1000);
    }
}

// ============ Main ============

#[entry]
fn main() -> ! {
    led_init();

    osmos::os_init().expect("kernel init failed");

    os_thread_create(
        unsafe { &mut BLINK_TCB },
        unsafe { &mut BLINK_STK },
        "blink",
        blink_thread,
        5,
    ).expect("blink thread failed");

    os_thread_create(
        unsafe { &mut REPORT_TCB },
        unsafe { &mut REPORT_STK },
        "report",
        report_thread,
        0,
    ).expect("report thread failed");

    osmos::info!("starting kernel");
    osmos::os_start().expect("kernel start failed");

    loop { cortex_m::asm::nop(); }
}

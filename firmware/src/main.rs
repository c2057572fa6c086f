//! matrixkb keyboard firmware for ATmega32U4 (Teensy 2.0).
//!
//! - Matrix scanning with diode-aware ghost resolution
//! - USB HID boot keyboard (6KRO) with host LED support
//! - Debug HID interface carrying log output and reboot commands
//!
//! USB runs from the two controller interrupts; the main loop only scans
//! the matrix and hands changed reports to the keyboard interface.

#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]
#![feature(asm_experimental_arch)]

mod bootloader;
mod delay;
mod descriptors;
mod gpio;
mod keymap;
mod leds;
mod logger;
mod matrix;
mod usb_bus;

use core::cell::RefCell;

use avr_device::atmega32u4::Peripherals;
use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use log::{error, info};
use matrixkb_core::usb::{DebugIface, KeyboardIface, UsbController, UsbInterface};
use matrixkb_core::{DiodeKeyboard, Keyboard};
use static_cell::StaticCell;

use bootloader::Reboot;
use delay::AvrDelay;
use descriptors::*;
use leds::HostLeds;
use logger::LOG_SIZE;
use matrix::BoardMatrix;
use usb_bus::AvrUsb;

type Controller = UsbController<'static, AvrUsb>;
type KeyboardInterface = KeyboardIface<HostLeds>;
type DebugInterface = DebugIface<Reboot, LOG_SIZE>;

/// Milliseconds between matrix scans; long enough to ride out bounce.
const SCAN_INTERVAL_MS: u32 = 2;

static USB: Mutex<RefCell<Option<Controller>>> = Mutex::new(RefCell::new(None));
static KEYBOARD_IFACE: StaticCell<KeyboardInterface> = StaticCell::new();
static DEBUG_IFACE: StaticCell<DebugInterface> = StaticCell::new();

/// Panic handler: on AVR we just loop forever.
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

fn halt() -> ! {
    avr_device::interrupt::disable();
    loop {}
}

fn with_usb<R>(f: impl FnOnce(&mut Controller) -> R) -> Option<R> {
    critical_section::with(|cs| USB.borrow_ref_mut(cs).as_mut().map(f))
}

fn register(usb: &mut Controller, iface: &'static mut dyn UsbInterface<AvrUsb>) {
    let number = iface.number();
    if let Err(err) = usb.add_interface(iface) {
        error!("interface {} not registered: {}", number, err);
    }
}

#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    bootloader::disable_watchdog(&dp);

    // Disable clock prescaler (CLKPR)
    dp.CPU.clkpr.write(|w| w.clkpce().set_bit());
    dp.CPU.clkpr.write(|w| unsafe { w.bits(0) }); // Prescaler = 1

    logger::init();
    leds::init();
    info!("matrixkb starting");

    let mut usb = UsbController::new(AvrUsb::new(dp.USB_DEVICE, dp.PLL));
    let kbd = KEYBOARD_IFACE.init(KeyboardIface::new(KEYBOARD_INTERFACE, KEYBOARD_ENDPOINT, HostLeds));
    let dbg = DEBUG_IFACE.init(DebugIface::new(
        DEBUG_INTERFACE,
        DEBUG_ENDPOINT,
        DEBUG_SIZE,
        logger::buffer(),
        Reboot,
    ));
    register(&mut usb, kbd);
    register(&mut usb, dbg);
    usb.init(ENDPOINT0_SIZE, descriptors());

    critical_section::with(|cs| USB.borrow_ref_mut(cs).replace(usb));
    unsafe { avr_device::interrupt::enable() };

    // Blink until the host picks a configuration
    let mut delay = AvrDelay;
    while !with_usb(|usb| usb.configured()).unwrap_or(false) {
        leds::toggle();
        delay.delay_ms(100);
    }
    info!("usb configured");

    let mut keyboard = match DiodeKeyboard::<_, _, { keymap::MAP_BYTES }>::new(
        BoardMatrix,
        AvrDelay,
        keymap::table(),
        &keymap::DIODES,
    ) {
        Ok(keyboard) => keyboard,
        Err(err) => {
            error!("keyboard setup: {}", err);
            halt();
        }
    };
    keyboard.prepare();

    loop {
        if keyboard.scan_keys() {
            let report = keyboard.state();
            with_usb(|usb| {
                if let Some((iface, dev)) = usb.interface_mut::<KeyboardInterface>(KEYBOARD_INTERFACE) {
                    iface.update(dev, &report);
                }
            });
        }
        leds::apply();
        delay.delay_ms(SCAN_INTERVAL_MS);
    }
}

#[avr_device::interrupt(atmega32u4)]
fn USB_GEN() {
    with_usb(|usb| usb.general_interrupt());
}

#[avr_device::interrupt(atmega32u4)]
fn USB_COM() {
    with_usb(|usb| usb.endpoint_interrupt());
}

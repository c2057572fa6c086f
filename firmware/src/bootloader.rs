//! Reboot paths requested over the debug interface.

use avr_device::atmega32u4::Peripherals;
use matrixkb_core::usb::{DebugCommand, DebugCommandHandler};

use crate::delay::delay_ms;

// MCUSR
const WDRF: u8 = 1 << 3;
// WDTCSR
const WDE: u8 = 1 << 3;
const WDCE: u8 = 1 << 4;

pub struct Reboot;

impl DebugCommandHandler for Reboot {
    fn handle(&mut self, command: DebugCommand) {
        // Let the status stage of the request go out first.
        delay_ms(5);
        match command {
            DebugCommand::Bootloader => jump_to_bootloader(),
            DebugCommand::Reset => watchdog_reset(),
        }
    }
}

/// Turn the watchdog off. It stays armed across a watchdog reset.
pub fn disable_watchdog(dp: &Peripherals) {
    dp.CPU.mcusr.modify(|r, w| unsafe { w.bits(r.bits() & !WDRF) });
    avr_device::interrupt::free(|_| {
        dp.WDT.wdtcsr.write(|w| unsafe { w.bits(WDCE | WDE) });
        dp.WDT.wdtcsr.write(|w| unsafe { w.bits(0) });
    });
}

/// Reset through the watchdog with its shortest timeout (16ms).
fn watchdog_reset() -> ! {
    let dp = unsafe { Peripherals::steal() };
    avr_device::interrupt::disable();
    dp.WDT.wdtcsr.write(|w| unsafe { w.bits(WDCE | WDE) });
    dp.WDT.wdtcsr.write(|w| unsafe { w.bits(WDE) });
    loop {}
}

/// Disable all peripherals and jump to the HalfKay bootloader at 0x7E00.
fn jump_to_bootloader() -> ! {
    let dp = unsafe { Peripherals::steal() };
    avr_device::interrupt::disable();

    // Disconnect USB
    dp.USB_DEVICE.udcon.write(|w| w.detach().set_bit());
    dp.USB_DEVICE.usbcon.write(|w| w.frzclk().set_bit());

    // Give the host time to notice the disconnect
    delay_ms(5);

    // Disable peripherals
    dp.EXINT.eimsk.write(|w| w.bits(0));
    dp.SPI.spcr.write(|w| unsafe { w.bits(0) });
    dp.AC.acsr.write(|w| unsafe { w.bits(0) });
    dp.EEPROM.eecr.write(|w| unsafe { w.bits(0) });
    dp.ADC.adcsra.write(|w| unsafe { w.bits(0) });
    dp.TC0.timsk0.write(|w| unsafe { w.bits(0) });
    dp.TC1.timsk1.write(|w| unsafe { w.bits(0) });
    dp.TC3.timsk3.write(|w| unsafe { w.bits(0) });
    dp.TC4.timsk4.write(|w| unsafe { w.bits(0) });
    dp.USART1.ucsr1b.write(|w| unsafe { w.bits(0) });
    dp.TWI.twcr.write(|w| unsafe { w.bits(0) });

    // Reset all port directions and values
    dp.PORTB.ddrb.write(|w| unsafe { w.bits(0) });
    dp.PORTB.portb.write(|w| unsafe { w.bits(0) });
    dp.PORTC.ddrc.write(|w| unsafe { w.bits(0) });
    dp.PORTC.portc.write(|w| unsafe { w.bits(0) });
    dp.PORTD.ddrd.write(|w| unsafe { w.bits(0) });
    dp.PORTD.portd.write(|w| unsafe { w.bits(0) });
    dp.PORTE.ddre.write(|w| unsafe { w.bits(0) });
    dp.PORTE.porte.write(|w| unsafe { w.bits(0) });
    dp.PORTF.ddrf.write(|w| unsafe { w.bits(0) });
    dp.PORTF.portf.write(|w| unsafe { w.bits(0) });

    unsafe { core::arch::asm!("jmp 0x7E00", options(noreturn)) }
}

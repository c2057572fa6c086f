//! [`UsbBus`] on the ATmega32U4 USB controller registers.

use avr_device::atmega32u4::{PLL, USB_DEVICE};
use matrixkb_core::usb::{Banks, DeviceInterrupts, Direction, EndpointConfig, EndpointFlags, EndpointType, UsbBus};

// UECONX
const EPEN: u8 = 1 << 0;
const RSTDT: u8 = 1 << 3;
const STALLRQC: u8 = 1 << 4;
const STALLRQ: u8 = 1 << 5;
// UECFG1X
const ALLOC: u8 = 1 << 1;
// UEIENX
const RXSTPE: u8 = 1 << 3;

pub struct AvrUsb {
    usb: USB_DEVICE,
    pll: PLL,
}

impl AvrUsb {
    pub fn new(usb: USB_DEVICE, pll: PLL) -> Self {
        Self { usb, pll }
    }
}

impl UsbBus for AvrUsb {
    fn enable_controller(&mut self) {
        // Enable USB pad regulator
        self.usb.uhwcon.write(|w| w.uvrege().set_bit());
        // Controller on, clock frozen until the PLL runs
        self.usb.usbcon.write(|w| w.usbe().set_bit().frzclk().set_bit());
    }

    fn enable_pll(&mut self) {
        // 16MHz crystal: PINDIV=1 -> 96MHz PLL -> 48MHz USB clock
        self.pll.pllcsr.write(|w| w.pindiv().set_bit().plle().set_bit());
    }

    fn pll_locked(&self) -> bool {
        self.pll.pllcsr.read().plock().bit_is_set()
    }

    fn attach(&mut self) {
        self.usb.usbcon.write(|w| w.usbe().set_bit().otgpade().set_bit());
        self.usb.udcon.modify(|_, w| w.detach().clear_bit());
    }

    fn enable_interrupts(&mut self, interrupts: DeviceInterrupts) {
        self.usb
            .udien
            .modify(|r, w| unsafe { w.bits(r.bits() | interrupts.bits()) });
    }

    fn take_interrupts(&mut self) -> DeviceInterrupts {
        let pending = self.usb.udint.read().bits();
        // Flags clear on writing 0; writing 1 leaves them alone.
        self.usb.udint.write(|w| unsafe { w.bits(!pending) });
        DeviceInterrupts::from_bits_truncate(pending)
    }

    fn select_endpoint(&mut self, number: u8) {
        self.usb.uenum.write(|w| w.bits(number & 0x07));
    }

    fn flags(&self) -> EndpointFlags {
        EndpointFlags::from_bits_retain(self.usb.ueintx.read().bits())
    }

    fn clear_flags(&mut self, flags: EndpointFlags) {
        self.usb.ueintx.write(|w| unsafe { w.bits(!flags.bits()) });
    }

    fn configure_endpoint(&mut self, config: &EndpointConfig) {
        let eptype = match config.kind {
            EndpointType::Control => 0,
            EndpointType::Isochronous => 1,
            EndpointType::Bulk => 2,
            EndpointType::Interrupt => 3,
        };
        let epdir = (config.direction == Direction::In) as u8;
        let epbk = match config.banks {
            Banks::Single => 0,
            Banks::Double => 1,
        };

        self.usb.ueconx.write(|w| unsafe { w.bits(EPEN) });
        self.usb
            .uecfg0x
            .write(|w| unsafe { w.bits(eptype << 6 | epdir) });
        self.usb
            .uecfg1x
            .write(|w| unsafe { w.bits(config.size_code() << 4 | epbk << 2 | ALLOC) });
    }

    fn enable_setup_interrupt(&mut self) {
        self.usb.ueienx.write(|w| unsafe { w.bits(RXSTPE) });
    }

    fn read_byte(&mut self) -> u8 {
        self.usb.uedatx.read().bits()
    }

    fn write_byte(&mut self, byte: u8) {
        self.usb.uedatx.write(|w| w.bits(byte));
    }

    fn stall(&mut self) {
        self.usb.ueconx.write(|w| unsafe { w.bits(STALLRQ | EPEN) });
    }

    fn clear_stall(&mut self) {
        self.usb
            .ueconx
            .write(|w| unsafe { w.bits(STALLRQC | RSTDT | EPEN) });
    }

    fn is_stalled(&self) -> bool {
        self.usb.ueconx.read().bits() & STALLRQ != 0
    }

    fn reset_endpoints(&mut self, mask: u8) {
        self.usb.uerst.write(|w| unsafe { w.bits(mask) });
        self.usb.uerst.write(|w| unsafe { w.bits(0) });
    }

    fn set_address(&mut self, address: u8) {
        self.usb
            .udaddr
            .write(|w| w.uadd().bits(address & 0x7F).adden().set_bit());
    }
}

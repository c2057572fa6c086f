//! Register-level access to the USB device controller.
//!
//! The trait mirrors the endpoint-banked controller found on the AVR USB
//! parts: one endpoint is selected at a time, and FIFO access, flags and
//! stall control all apply to the selected endpoint.

use bitflags::bitflags;

use crate::usb::endpoint::EndpointConfig;

bitflags! {
    /// Per-endpoint interrupt flags (UEINTX on AVR).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointFlags: u8 {
        /// The IN bank is free to be filled.
        const TX_READY = 1 << 0;
        const STALLED = 1 << 1;
        /// An OUT packet (or control status stage) has arrived.
        const RX_OUT = 1 << 2;
        /// A SETUP packet has arrived.
        const RX_SETUP = 1 << 3;
        const NAK_OUT = 1 << 4;
        /// The current bank can be read or written.
        const RW_ALLOWED = 1 << 5;
        const NAK_IN = 1 << 6;
        /// Clearing this hands the current bank to the controller.
        const FIFO_CONTROL = 1 << 7;
    }
}

bitflags! {
    /// Device-level interrupt sources (UDINT/UDIEN on AVR).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceInterrupts: u8 {
        const SUSPEND = 1 << 0;
        const START_OF_FRAME = 1 << 2;
        const END_OF_RESET = 1 << 3;
        const WAKE_UP = 1 << 4;
        const END_OF_RESUME = 1 << 5;
        const UPSTREAM_RESUME = 1 << 6;
    }
}

pub trait UsbBus: Send {
    /// Enable the pad regulator, select device mode, and enable the
    /// controller with its clock frozen.
    fn enable_controller(&mut self);

    /// Start the USB PLL.
    fn enable_pll(&mut self);

    fn pll_locked(&self) -> bool;

    /// Unfreeze the clock, enable the OTG pad and connect the pull-up.
    fn attach(&mut self);

    fn enable_interrupts(&mut self, interrupts: DeviceInterrupts);

    /// Read and acknowledge every pending device interrupt.
    fn take_interrupts(&mut self) -> DeviceInterrupts;

    fn select_endpoint(&mut self, number: u8);

    /// Flags of the selected endpoint.
    fn flags(&self) -> EndpointFlags;

    /// Clear `flags` on the selected endpoint, leaving the others untouched.
    fn clear_flags(&mut self, flags: EndpointFlags);

    /// Enable and allocate the selected endpoint.
    fn configure_endpoint(&mut self, config: &EndpointConfig);

    /// Interrupt on SETUP packets for the selected endpoint.
    fn enable_setup_interrupt(&mut self);

    fn read_byte(&mut self) -> u8;

    fn write_byte(&mut self, byte: u8);

    /// Request a stall handshake on the selected endpoint.
    fn stall(&mut self);

    /// Clear a stall request and reset the data toggle of the selected
    /// endpoint.
    fn clear_stall(&mut self);

    fn is_stalled(&self) -> bool;

    /// Pulse the FIFO reset of every endpoint whose bit is set in `mask`.
    fn reset_endpoints(&mut self, mask: u8);

    /// Latch the device address assigned by the host.
    fn set_address(&mut self, address: u8);
}

//! HID boot keyboard interface.
//!
//! Reports are sent from the main loop through [`KeyboardIface::update`].
//! When the IN bank is busy the report is marked pending and retried from
//! the start-of-frame hook; since only the latest state is ever sent, a
//! retry never loses a change. The same hook implements the HID idle rate
//! by re-sending the unchanged report once the idle period expires.

use core::any::Any;

use log::{debug, trace};

use crate::report::{KeyReport, REPORT_SIZE};
use crate::usb::bus::{EndpointFlags, UsbBus};
use crate::usb::controller::{UsbDevice, UsbInterface};
use crate::usb::endpoint::{Banks, EndpointConfig, UsbEndpoint};
use crate::usb::{hid_request, request_type, std_request, SetupPacket};

/// Default idle period, in 4 ms units (500 ms).
pub const DEFAULT_IDLE: u8 = 125;
/// Boot protocol (0) or report protocol (1).
pub const DEFAULT_PROTOCOL: u8 = 1;

/// Frames per idle-counter tick.
const FRAMES_PER_IDLE_TICK: u8 = 4;

/// Receives the LED state pushed by the host with `SET_REPORT`.
pub trait LedCallback: Send {
    fn update_leds(&mut self, leds: u8);
}

/// For keyboards without LEDs.
pub struct NoLeds;

impl LedCallback for NoLeds {
    fn update_leds(&mut self, _leds: u8) {}
}

pub struct KeyboardIface<L> {
    number: u8,
    endpoints: [UsbEndpoint; 1],
    report: KeyReport,
    pending: bool,
    idle_config: u8,
    idle_count: u8,
    frame_count: u8,
    protocol: u8,
    leds: L,
}

impl<L: LedCallback> KeyboardIface<L> {
    pub fn new(number: u8, endpoint: u8, leds: L) -> Self {
        Self {
            number,
            endpoints: [UsbEndpoint::new(
                endpoint,
                EndpointConfig::interrupt_in(REPORT_SIZE as u8, Banks::Double),
            )],
            report: KeyReport::empty(),
            pending: false,
            idle_config: DEFAULT_IDLE,
            idle_count: 0,
            frame_count: 0,
            protocol: DEFAULT_PROTOCOL,
            leds,
        }
    }

    pub fn endpoint_number(&self) -> u8 {
        self.endpoints[0].number()
    }

    pub fn report(&self) -> &KeyReport {
        &self.report
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn idle(&self) -> u8 {
        self.idle_config
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn leds(&self) -> &L {
        &self.leds
    }

    /// Replace the stored report and try to send it right away.
    pub fn update<B: UsbBus>(&mut self, dev: &mut UsbDevice<B>, report: &KeyReport) {
        self.report = *report;
        self.send_report(dev);
    }

    /// Try to transmit the stored report. On failure the report stays
    /// pending for the next frame.
    fn send_report<B: UsbBus>(&mut self, dev: &mut UsbDevice<B>) -> bool {
        self.pending = true;

        critical_section::with(|_| {
            if !dev.configured() {
                return false;
            }

            let bus = dev.bus_mut();
            bus.select_endpoint(self.endpoint_number());
            if !bus.flags().contains(EndpointFlags::RW_ALLOWED) {
                trace!("keyboard bank busy");
                return false;
            }
            for byte in self.report.to_bytes() {
                bus.write_byte(byte);
            }
            bus.clear_flags(EndpointFlags::FIFO_CONTROL);

            self.idle_count = 0;
            self.frame_count = 0;
            self.pending = false;
            true
        })
    }
}

impl<B: UsbBus, L: LedCallback + 'static> UsbInterface<B> for KeyboardIface<L> {
    fn number(&self) -> u8 {
        self.number
    }

    fn endpoints(&self) -> &[UsbEndpoint] {
        &self.endpoints
    }

    fn start_of_frame(&mut self, dev: &mut UsbDevice<B>) {
        if self.pending {
            self.send_report(dev);
            return;
        }

        if self.idle_config == 0 {
            // Idle period is indefinite.
            return;
        }

        self.frame_count += 1;
        if self.frame_count < FRAMES_PER_IDLE_TICK {
            return;
        }
        self.frame_count = 0;
        self.idle_count = self.idle_count.saturating_add(1);
        if self.idle_count >= self.idle_config {
            trace!("idle period expired");
            self.send_report(dev);
        }
    }

    fn handle_setup_packet(&mut self, dev: &mut UsbDevice<B>, pkt: &SetupPacket) -> bool {
        match (pkt.bm_request_type, pkt.b_request) {
            (request_type::CLASS_IN, hid_request::GET_REPORT) => {
                dev.wait_for_tx_ready();
                for byte in self.report.to_bytes() {
                    dev.bus_mut().write_byte(byte);
                }
                dev.send_in();
                true
            }
            (request_type::CLASS_IN, hid_request::GET_IDLE) => {
                dev.wait_for_tx_ready();
                dev.bus_mut().write_byte(self.idle_config);
                dev.send_in();
                true
            }
            (request_type::CLASS_IN, hid_request::GET_PROTOCOL) => {
                dev.wait_for_tx_ready();
                dev.bus_mut().write_byte(self.protocol);
                dev.send_in();
                true
            }
            (request_type::STANDARD_INTERFACE_IN, std_request::GET_DESCRIPTOR) => {
                dev.handle_get_descriptor(pkt);
                true
            }
            (request_type::CLASS_OUT, hid_request::SET_REPORT) => {
                dev.wait_for_out_packet();
                let leds = dev.bus_mut().read_byte();
                debug!("leds = {:#04x}", leds);
                self.leds.update_leds(leds);
                dev.ack_out();
                dev.send_in();
                true
            }
            (request_type::CLASS_OUT, hid_request::SET_IDLE) => {
                self.idle_config = (pkt.w_value >> 8) as u8;
                self.idle_count = 0;
                debug!("idle = {}", self.idle_config);
                dev.send_in();
                true
            }
            (request_type::CLASS_OUT, hid_request::SET_PROTOCOL) => {
                self.protocol = pkt.w_value as u8;
                debug!("protocol = {}", self.protocol);
                dev.send_in();
                true
            }
            _ => false,
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
